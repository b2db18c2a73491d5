//! The outer TCP framing (`[type:u16][len:u32][payload]`) and the registry
//! mapping message-type IDs to protobuf message types and dispatch names.
//! Adapted from the teacher's `proto::MessageKind`/`send_message`/
//! `get_message`, generalized for the client's read side: the server knows
//! statically which reply it's waiting for, while the client has to decode
//! whatever arrives next against a runtime ID, so framing and payload
//! decoding are split into separate steps here.

use crate::error::{Result, TrumbleError};
use crate::voice::{Clientbound, Serverbound, VoicePacket};
use bytes::{Bytes, BytesMut};
use protobuf::Message;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A control-channel message type. `UDPTunnel` (1) is the one ID whose
/// payload is not a protobuf message -- see [`crate::voice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Version = 0,
    UDPTunnel = 1,
    Authenticate = 2,
    Ping = 3,
    Reject = 4,
    ServerSync = 5,
    ChannelRemove = 6,
    ChannelState = 7,
    UserRemove = 8,
    UserState = 9,
    BanList = 10,
    TextMessage = 11,
    PermissionDenied = 12,
    ACL = 13,
    QueryUsers = 14,
    CryptSetup = 15,
    ContextActionModify = 16,
    ContextAction = 17,
    UserList = 18,
    VoiceTarget = 19,
    PermissionQuery = 20,
    CodecVersion = 21,
    UserStats = 22,
    RequestBlob = 23,
    ServerConfig = 24,
    SuggestConfig = 25,
}

impl MessageKind {
    /// The `on_<event_name>` handler method this message kind dispatches to.
    pub fn event_name(self) -> &'static str {
        match self {
            MessageKind::Version => "version",
            MessageKind::UDPTunnel => "udp_tunnel",
            MessageKind::Authenticate => "authenticate",
            MessageKind::Ping => "ping",
            MessageKind::Reject => "reject",
            MessageKind::ServerSync => "server_sync",
            MessageKind::ChannelRemove => "channel_remove",
            MessageKind::ChannelState => "channel_state",
            MessageKind::UserRemove => "user_remove",
            MessageKind::UserState => "user_state",
            MessageKind::BanList => "ban_list",
            MessageKind::TextMessage => "text_message",
            MessageKind::PermissionDenied => "permission_denied",
            MessageKind::ACL => "acl",
            MessageKind::QueryUsers => "query_users",
            MessageKind::CryptSetup => "crypt_setup",
            MessageKind::ContextActionModify => "context_action_modify",
            MessageKind::ContextAction => "context_action",
            MessageKind::UserList => "user_list",
            MessageKind::VoiceTarget => "voice_target",
            MessageKind::PermissionQuery => "permission_query",
            MessageKind::CodecVersion => "codec_version",
            MessageKind::UserStats => "user_stats",
            MessageKind::RequestBlob => "request_blob",
            MessageKind::ServerConfig => "server_config",
            MessageKind::SuggestConfig => "suggest_config",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.event_name())
    }
}

impl TryFrom<u16> for MessageKind {
    type Error = TrumbleError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(MessageKind::Version),
            1 => Ok(MessageKind::UDPTunnel),
            2 => Ok(MessageKind::Authenticate),
            3 => Ok(MessageKind::Ping),
            4 => Ok(MessageKind::Reject),
            5 => Ok(MessageKind::ServerSync),
            6 => Ok(MessageKind::ChannelRemove),
            7 => Ok(MessageKind::ChannelState),
            8 => Ok(MessageKind::UserRemove),
            9 => Ok(MessageKind::UserState),
            10 => Ok(MessageKind::BanList),
            11 => Ok(MessageKind::TextMessage),
            12 => Ok(MessageKind::PermissionDenied),
            13 => Ok(MessageKind::ACL),
            14 => Ok(MessageKind::QueryUsers),
            15 => Ok(MessageKind::CryptSetup),
            16 => Ok(MessageKind::ContextActionModify),
            17 => Ok(MessageKind::ContextAction),
            18 => Ok(MessageKind::UserList),
            19 => Ok(MessageKind::VoiceTarget),
            20 => Ok(MessageKind::PermissionQuery),
            21 => Ok(MessageKind::CodecVersion),
            22 => Ok(MessageKind::UserStats),
            23 => Ok(MessageKind::RequestBlob),
            24 => Ok(MessageKind::ServerConfig),
            25 => Ok(MessageKind::SuggestConfig),
            other => Err(TrumbleError::UnknownMessageId(other)),
        }
    }
}

/// A single inbound frame: its type ID (already validated against the
/// registry) and the still-undecoded payload bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: MessageKind,
    pub payload: Bytes,
}

/// The result of reading one frame off the wire: either a frame whose type
/// ID is in the registry, or an ID the registry doesn't know about. Per
/// spec.md §7, an unknown message ID is logged and skipped, not fatal --
/// but the length-prefixed payload still has to be consumed either way, or
/// framing desyncs for every frame after it.
#[derive(Debug)]
pub enum Incoming {
    Frame(Frame),
    UnknownKind(u16),
}

/// Reads one `[type:u16][len:u32][payload]` frame, translating EOF into
/// [`TrumbleError::ConnectionClosed`] only when it occurs before any bytes
/// of a new frame have been read, and into [`TrumbleError::TruncatedFrame`]
/// if it occurs mid-frame. The type ID is resolved only after the length
/// and payload are read, so an unknown ID can be reported as
/// [`Incoming::UnknownKind`] without leaving unread payload bytes behind.
pub async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Incoming> {
    let kind = match stream.read_u16().await {
        Ok(kind) => kind,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Err(TrumbleError::ConnectionClosed),
        Err(err) => return Err(err.into()),
    };

    let len = stream.read_u32().await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            TrumbleError::TruncatedFrame
        } else {
            TrumbleError::from(err)
        }
    })?;

    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            TrumbleError::TruncatedFrame
        } else {
            TrumbleError::from(err)
        }
    })?;

    match MessageKind::try_from(kind) {
        Ok(kind) => Ok(Incoming::Frame(Frame {
            kind,
            payload: Bytes::from(payload),
        })),
        Err(_) => Ok(Incoming::UnknownKind(kind)),
    }
}

/// Frames a raw payload under the given message kind.
pub fn frame_bytes(kind: MessageKind, payload: &[u8]) -> Bytes {
    let mut buffer = BytesMut::with_capacity(6 + payload.len());
    buffer.extend_from_slice(&(kind as u16).to_be_bytes());
    buffer.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buffer.extend_from_slice(payload);
    buffer.freeze()
}

/// Serializes a protobuf message and frames it under `kind`.
pub fn message_to_bytes<T: Message>(kind: MessageKind, message: &T) -> Result<Bytes> {
    let payload = message.write_to_bytes()?;
    Ok(frame_bytes(kind, &payload))
}

/// Writes a framed protobuf message to the stream.
pub async fn write_message<T: Message, S: AsyncWrite + Unpin>(kind: MessageKind, message: &T, stream: &mut S) -> Result<()> {
    tracing::trace!(kind = %kind, "send message");
    let bytes = message_to_bytes(kind, message)?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Writes a framed UDP-tunnel voice packet to the stream.
pub async fn write_voice_packet<S: AsyncWrite + Unpin>(packet: &VoicePacket<Serverbound>, stream: &mut S) -> Result<()> {
    let mut payload = BytesMut::new();
    crate::voice::encode_voice_packet(packet, &mut payload)?;
    let bytes = frame_bytes(MessageKind::UDPTunnel, &payload);
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Decodes a received frame's payload as an incoming UDP-tunnel voice
/// packet. Only valid when `frame.kind == MessageKind::UDPTunnel`.
pub fn decode_voice_frame(frame: &Frame) -> Result<VoicePacket<Clientbound>> {
    let mut payload = BytesMut::from(frame.payload.as_ref());
    crate::voice::decode_voice_packet(&mut payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::mumble;

    #[tokio::test]
    async fn round_trips_a_protobuf_message_through_the_outer_frame() {
        let mut version = mumble::Version::new();
        version.set_version((1u32 << 16) + (5 << 8) + 0);
        version.set_release("trumble".to_string());

        let mut buf = Vec::new();
        write_message(MessageKind::Version, &version, &mut buf).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let frame = match read_frame(&mut cursor).await.unwrap() {
            Incoming::Frame(frame) => frame,
            Incoming::UnknownKind(kind) => panic!("unexpected unknown kind {kind}"),
        };
        assert_eq!(frame.kind, MessageKind::Version);

        let decoded = mumble::Version::parse_from_bytes(&frame.payload).unwrap();
        assert_eq!(decoded.get_version(), (1u32 << 16) + (5 << 8));
    }

    #[test]
    fn unknown_message_id_is_rejected_by_the_registry() {
        assert!(matches!(MessageKind::try_from(26), Err(TrumbleError::UnknownMessageId(26))));
    }

    #[tokio::test]
    async fn unknown_message_id_consumes_its_payload_without_desyncing_framing() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&26u16.to_be_bytes()); // 26 is outside the registry
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(&[1, 2, 3]);
        write_message(MessageKind::Ping, &mumble::Ping::new(), &mut buf).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        match read_frame(&mut cursor).await.unwrap() {
            Incoming::UnknownKind(kind) => assert_eq!(kind, 26),
            Incoming::Frame(frame) => panic!("expected an unknown kind, got {:?}", frame.kind),
        }

        match read_frame(&mut cursor).await.unwrap() {
            Incoming::Frame(frame) => assert_eq!(frame.kind, MessageKind::Ping),
            Incoming::UnknownKind(kind) => panic!("framing desynced, read unknown kind {kind}"),
        }
    }

    #[test]
    fn event_names_are_snake_case() {
        assert_eq!(MessageKind::UDPTunnel.event_name(), "udp_tunnel");
        assert_eq!(MessageKind::ACL.event_name(), "acl");
        assert_eq!(MessageKind::ContextActionModify.event_name(), "context_action_modify");
    }

    #[tokio::test]
    async fn truncated_frame_is_reported_distinctly_from_closed_connection() {
        // header present, but payload cut short
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MessageKind::Ping as u16).to_be_bytes());
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(&[1, 2, 3]);

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(TrumbleError::TruncatedFrame)));

        let mut empty_cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut empty_cursor).await;
        assert!(matches!(result, Err(TrumbleError::ConnectionClosed)));
    }
}
