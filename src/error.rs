use thiserror::Error;

/// Errors produced by the wire codec and the connection runtime.
#[derive(Error, Debug)]
pub enum TrumbleError {
    /// The TLS stream hit EOF or was reset while a frame was still being read.
    #[error("connection closed")]
    ConnectionClosed,
    /// TLS setup (handshake or configuration) failed.
    #[error("tls handshake failed: {0}")]
    TlsHandshakeFailed(String),
    /// A frame header claimed a length that could not be fully read before EOF.
    #[error("truncated frame")]
    TruncatedFrame,
    /// A varint's prefix implied more bytes than were available.
    #[error("truncated varint")]
    TruncatedVarint,
    /// The received message-type ID has no entry in the registry.
    #[error("unknown message id: {0}")]
    UnknownMessageId(u16),
    /// The UDP-tunnel header named a `type` outside {0,1,2,3,4}.
    #[error("unsupported udp tunnel type: {0}")]
    UnsupportedUdpTunnelType(u8),
    /// A UDP-tunnel field failed serialize-time validation (oversize frame,
    /// wrong frame count, non-conforming position vector).
    #[error("invalid udp tunnel field: {0}")]
    InvalidUdpTunnelField(String),
    /// Underlying I/O error (including `ErrorKind::UnexpectedEof` translated to
    /// the more specific variants above at framing boundaries).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Protobuf (de)serialization failure.
    #[error("protobuf error: {0}")]
    Protobuf(#[from] protobuf::ProtobufError),
    /// Shared-state lock timed out; see [`crate::sync`].
    #[error("lock error: {0}")]
    Lock(#[from] crate::sync::Error),
}

pub type Result<T> = std::result::Result<T, TrumbleError>;
