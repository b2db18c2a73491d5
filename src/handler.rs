//! The handler trait a bot implements to react to control-channel events.
//! Grounded on the dispatch shape of `MessageHandler::handle` in the
//! teacher's server (one method per message kind, `async_trait`-based) and
//! on the original Python core's `getattr(self, "on_" + event)` dispatch:
//! here each event gets its own named, typed default method instead of
//! runtime attribute lookup, so an unhandled event is a silent no-op
//! rather than a missing-attribute guard.

use crate::proto::mumble;
use crate::response::Response;
use crate::voice::{Clientbound, VoicePacket};
use async_trait::async_trait;

/// Implemented by bots to react to events on a [`crate::connection::Connection`].
///
/// Every method defaults to logging at `debug` and returning
/// [`Response::None`]; override only the events a bot cares about.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn on_connect(&self) -> Response {
        tracing::debug!("unhandled event: connect");
        Response::None
    }

    async fn on_disconnect(&self) -> Response {
        tracing::debug!("unhandled event: disconnect");
        Response::None
    }

    async fn on_version(&self, message: mumble::Version) -> Response {
        tracing::debug!(?message, "unhandled event: version");
        Response::None
    }

    async fn on_udp_tunnel(&self, packet: VoicePacket<Clientbound>) -> Response {
        tracing::debug!(?packet, "unhandled event: udp_tunnel");
        Response::None
    }

    async fn on_authenticate(&self, message: mumble::Authenticate) -> Response {
        tracing::debug!(?message, "unhandled event: authenticate");
        Response::None
    }

    async fn on_ping(&self, message: mumble::Ping) -> Response {
        tracing::debug!(?message, "unhandled event: ping");
        Response::None
    }

    async fn on_reject(&self, message: mumble::Reject) -> Response {
        tracing::debug!(?message, "unhandled event: reject");
        Response::None
    }

    async fn on_server_sync(&self, message: mumble::ServerSync) -> Response {
        tracing::debug!(?message, "unhandled event: server_sync");
        Response::None
    }

    async fn on_channel_remove(&self, message: mumble::ChannelRemove) -> Response {
        tracing::debug!(?message, "unhandled event: channel_remove");
        Response::None
    }

    async fn on_channel_state(&self, message: mumble::ChannelState) -> Response {
        tracing::debug!(?message, "unhandled event: channel_state");
        Response::None
    }

    async fn on_user_remove(&self, message: mumble::UserRemove) -> Response {
        tracing::debug!(?message, "unhandled event: user_remove");
        Response::None
    }

    async fn on_user_state(&self, message: mumble::UserState) -> Response {
        tracing::debug!(?message, "unhandled event: user_state");
        Response::None
    }

    async fn on_ban_list(&self, message: mumble::BanList) -> Response {
        tracing::debug!(?message, "unhandled event: ban_list");
        Response::None
    }

    async fn on_text_message(&self, message: mumble::TextMessage) -> Response {
        tracing::debug!(?message, "unhandled event: text_message");
        Response::None
    }

    async fn on_permission_denied(&self, message: mumble::PermissionDenied) -> Response {
        tracing::debug!(?message, "unhandled event: permission_denied");
        Response::None
    }

    async fn on_acl(&self, message: mumble::ACL) -> Response {
        tracing::debug!(?message, "unhandled event: acl");
        Response::None
    }

    async fn on_query_users(&self, message: mumble::QueryUsers) -> Response {
        tracing::debug!(?message, "unhandled event: query_users");
        Response::None
    }

    async fn on_crypt_setup(&self, message: mumble::CryptSetup) -> Response {
        tracing::debug!(?message, "unhandled event: crypt_setup");
        Response::None
    }

    async fn on_context_action_modify(&self, message: mumble::ContextActionModify) -> Response {
        tracing::debug!(?message, "unhandled event: context_action_modify");
        Response::None
    }

    async fn on_context_action(&self, message: mumble::ContextAction) -> Response {
        tracing::debug!(?message, "unhandled event: context_action");
        Response::None
    }

    async fn on_user_list(&self, message: mumble::UserList) -> Response {
        tracing::debug!(?message, "unhandled event: user_list");
        Response::None
    }

    async fn on_voice_target(&self, message: mumble::VoiceTarget) -> Response {
        tracing::debug!(?message, "unhandled event: voice_target");
        Response::None
    }

    async fn on_permission_query(&self, message: mumble::PermissionQuery) -> Response {
        tracing::debug!(?message, "unhandled event: permission_query");
        Response::None
    }

    async fn on_codec_version(&self, message: mumble::CodecVersion) -> Response {
        tracing::debug!(?message, "unhandled event: codec_version");
        Response::None
    }

    async fn on_user_stats(&self, message: mumble::UserStats) -> Response {
        tracing::debug!(?message, "unhandled event: user_stats");
        Response::None
    }

    async fn on_request_blob(&self, message: mumble::RequestBlob) -> Response {
        tracing::debug!(?message, "unhandled event: request_blob");
        Response::None
    }

    async fn on_server_config(&self, message: mumble::ServerConfig) -> Response {
        tracing::debug!(?message, "unhandled event: server_config");
        Response::None
    }

    async fn on_suggest_config(&self, message: mumble::SuggestConfig) -> Response {
        tracing::debug!(?message, "unhandled event: suggest_config");
        Response::None
    }
}
