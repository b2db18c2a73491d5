//! Async client library for the Mumble voice-chat control protocol: wire
//! codecs for the TCP frame, the UDP-tunnel voice format, and Mumble's
//! varint encoding, plus a connection runtime that dials a server and
//! drives a [`handler::Handler`] implementation against it.

pub mod bots;
pub mod connection;
pub mod error;
pub mod handler;
pub mod message;
pub mod proto;
pub mod response;
pub mod sync;
pub mod varint;
pub mod voice;

pub use connection::{Config, Connection};
pub use error::{Result, TrumbleError};
pub use handler::Handler;
pub use response::Response;
