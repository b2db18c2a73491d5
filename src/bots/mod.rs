//! Ready-made [`crate::handler::Handler`] implementations.

mod simple;

pub use simple::{ChannelInfo, SessionInfo, SimpleBot};
