//! Port of the original Python core's `SimpleTrumble`: authenticates,
//! tracks channels and users as they're announced, and queries
//! certificate/version info the first time a session is seen.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::handler::Handler;
use crate::message::MessageKind;
use crate::proto::mumble;
use crate::response::{Outbound, Response};
use crate::sync::RwLock;
use crate::voice::{VoicePacketPayload, VoicePacket};

/// What's known about a channel from its most recent `ChannelState`.
#[derive(Debug, Clone, Default)]
pub struct ChannelInfo {
    pub name: String,
    pub parent: u32,
}

/// What's known about a session from `UserState`/`UserStats` so far.
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    pub name: String,
    pub user_id: u32,
    pub channel_id: u32,
    pub version: Option<(u8, u8, u8)>,
    pub opus: bool,
    pub certificates: Vec<Vec<u8>>,
    pub strong_certificate: bool,
}

/// A bot that authenticates and mirrors server-announced channel/user
/// state locally.
pub struct SimpleBot {
    pub username: String,
    pub password: String,
    pub access_tokens: Vec<String>,
    pub version: (u8, u8, u8),
    pub channels: RwLock<HashMap<u32, ChannelInfo>>,
    pub sessions: RwLock<HashMap<u32, SessionInfo>>,
}

impl SimpleBot {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: String::new(),
            access_tokens: Vec::new(),
            version: (1, 3, 0),
            channels: RwLock::default(),
            sessions: RwLock::default(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_access_tokens(mut self, tokens: Vec<String>) -> Self {
        self.access_tokens = tokens;
        self
    }
}

#[async_trait]
impl Handler for SimpleBot {
    async fn on_connect(&self) -> Response {
        let mut version = mumble::Version::new();
        let (major, minor, patch) = self.version;
        version.set_version((u32::from(major) << 16) + (u32::from(minor) << 8) + u32::from(patch));

        match Outbound::new(MessageKind::Version, &version) {
            Ok(outbound) => Response::Message(outbound),
            Err(err) => {
                tracing::error!(error = %err, "failed to encode version message");
                Response::None
            }
        }
    }

    async fn on_version(&self, _message: mumble::Version) -> Response {
        let mut authenticate = mumble::Authenticate::new();
        authenticate.set_username(self.username.clone());
        authenticate.set_password(self.password.clone());
        authenticate.set_tokens(self.access_tokens.clone().into());
        authenticate.set_opus(true);

        match Outbound::new(MessageKind::Authenticate, &authenticate) {
            Ok(outbound) => Response::Message(outbound),
            Err(err) => {
                tracing::error!(error = %err, "failed to encode authenticate message");
                Response::None
            }
        }
    }

    async fn on_channel_state(&self, message: mumble::ChannelState) -> Response {
        let Ok(mut channels) = self.channels.write_err().await else {
            return Response::None;
        };
        channels.insert(
            message.get_channel_id(),
            ChannelInfo {
                name: message.get_name().to_string(),
                parent: message.get_parent(),
            },
        );
        Response::None
    }

    async fn on_channel_remove(&self, message: mumble::ChannelRemove) -> Response {
        if let Ok(mut channels) = self.channels.write_err().await {
            channels.remove(&message.get_channel_id());
        }
        Response::None
    }

    async fn on_user_state(&self, message: mumble::UserState) -> Response {
        let session = message.get_session();
        let first_seen = {
            let Ok(sessions) = self.sessions.read_err().await else {
                return Response::None;
            };
            !sessions.contains_key(&session)
        };

        {
            let Ok(mut sessions) = self.sessions.write_err().await else {
                return Response::None;
            };
            let entry = sessions.entry(session).or_default();
            entry.name = message.get_name().to_string();
            entry.user_id = message.get_user_id();
            entry.channel_id = message.get_channel_id();
        }

        if first_seen {
            let mut user_stats = mumble::UserStats::new();
            user_stats.set_session(session);
            return match Outbound::new(MessageKind::UserStats, &user_stats) {
                Ok(outbound) => Response::Message(outbound),
                Err(err) => {
                    tracing::error!(error = %err, "failed to encode user_stats query");
                    Response::None
                }
            };
        }

        Response::None
    }

    async fn on_user_remove(&self, message: mumble::UserRemove) -> Response {
        if let Ok(mut sessions) = self.sessions.write_err().await {
            sessions.remove(&message.get_session());
        }
        Response::None
    }

    async fn on_user_stats(&self, message: mumble::UserStats) -> Response {
        let Ok(mut sessions) = self.sessions.write_err().await else {
            return Response::None;
        };
        let entry = sessions.entry(message.get_session()).or_default();
        let version = message.get_version();
        entry.version = Some((
            (version.get_version() >> 16) as u8,
            ((version.get_version() & 0xff00) >> 8) as u8,
            (version.get_version() & 0xff) as u8,
        ));
        entry.opus = message.get_opus();
        entry.certificates = message.get_certificates().to_vec();
        entry.strong_certificate = !message.get_certificates().is_empty() && message.get_strong_certificate();
        Response::None
    }

    async fn on_server_sync(&self, _message: mumble::ServerSync) -> Response {
        let channel_count = self.channels.read_err().await.map(|channels| channels.len()).unwrap_or(0);
        let session_count = self.sessions.read_err().await.map(|sessions| sessions.len()).unwrap_or(0);
        tracing::info!(channel_count, session_count, "state synchronized");
        Response::None
    }

    async fn on_udp_tunnel(&self, packet: VoicePacket<crate::voice::Clientbound>) -> Response {
        if let VoicePacket::Audio {
            payload: VoicePacketPayload::Opus(_),
            end_transmission: true,
            session_id,
            ..
        } = packet
        {
            let name = self
                .sessions
                .read_err()
                .await
                .ok()
                .and_then(|sessions| sessions.get(&session_id).map(|session| session.name.clone()));
            match name {
                Some(name) => tracing::info!(%name, "stopped talking"),
                None => tracing::info!(session_id, "stopped talking"),
            }
        }
        Response::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protobuf::Message;

    #[tokio::test]
    async fn on_connect_sends_a_version_message() {
        let bot = SimpleBot::new("trumble-bot");
        match bot.on_connect().await {
            Response::Message(outbound) => assert_eq!(outbound.kind as u16, MessageKind::Version as u16),
            _ => panic!("expected a Message response"),
        }
    }

    #[tokio::test]
    async fn on_version_authenticates_with_opus_enabled() {
        let bot = SimpleBot::new("trumble-bot").with_password("secret");
        match bot.on_version(mumble::Version::new()).await {
            Response::Message(outbound) => {
                let authenticate = mumble::Authenticate::parse_from_bytes(&outbound.payload).unwrap();
                assert_eq!(authenticate.get_username(), "trumble-bot");
                assert_eq!(authenticate.get_password(), "secret");
                assert!(authenticate.get_opus());
            }
            _ => panic!("expected a Message response"),
        }
    }

    #[tokio::test]
    async fn channel_state_and_remove_update_the_local_map() {
        let bot = SimpleBot::new("trumble-bot");
        let mut state = mumble::ChannelState::new();
        state.set_channel_id(7);
        state.set_name("General".to_string());
        bot.on_channel_state(state).await;

        {
            let channels = bot.channels.read_err().await.unwrap();
            assert_eq!(channels.get(&7).unwrap().name, "General");
        }

        let mut remove = mumble::ChannelRemove::new();
        remove.set_channel_id(7);
        bot.on_channel_remove(remove).await;

        let channels = bot.channels.read_err().await.unwrap();
        assert!(!channels.contains_key(&7));
    }

    #[tokio::test]
    async fn first_user_state_for_a_session_triggers_a_stats_query() {
        let bot = SimpleBot::new("trumble-bot");
        let mut state = mumble::UserState::new();
        state.set_session(3);
        state.set_name("alice".to_string());

        match bot.on_user_state(state.clone()).await {
            Response::Message(outbound) => assert_eq!(outbound.kind as u16, MessageKind::UserStats as u16),
            _ => panic!("expected a user_stats query on first sighting"),
        }

        // second time for the same session: no new query, just an update
        match bot.on_user_state(state).await {
            Response::None => {}
            _ => panic!("expected no response for an already-seen session"),
        }
    }

    #[tokio::test]
    async fn user_stats_parses_the_packed_version_field() {
        let bot = SimpleBot::new("trumble-bot");
        let mut stats = mumble::UserStats::new();
        stats.set_session(3);
        stats.set_opus(true);
        stats.set_strong_certificate(true);
        stats.set_certificates(vec![vec![1, 2, 3]].into());
        let mut version = mumble::Version::new();
        version.set_version((1u32 << 16) + (2 << 8) + 3);
        stats.set_version(version);

        bot.on_user_stats(stats).await;

        let sessions = bot.sessions.read_err().await.unwrap();
        let session = sessions.get(&3).unwrap();
        assert_eq!(session.version, Some((1, 2, 3)));
        assert!(session.opus);
        assert!(session.strong_certificate);
        assert_eq!(session.certificates, vec![vec![1, 2, 3]]);
    }
}
