//! Flattens whatever a handler returns -- nothing, one message, several,
//! an async stream of more responses, or any nesting thereof -- into a
//! single ordered stream of outbound messages. Grounded on the recursive
//! `_get_messages` generator in the original Python core: `none -> []`,
//! `awaitable -> recurse on its result`, `iterable -> concatenate
//! recursing on each item`, `async generator -> concatenate recursing on
//! each yielded item`. [`Response`] makes those cases an explicit enum
//! instead of duck-typing on the runtime value.

use crate::voice::{Serverbound, VoicePacket};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

use crate::message::MessageKind;

/// A protobuf-backed message paired with its wire type, ready to be framed.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub kind: MessageKind,
    pub payload: Bytes,
}

impl Outbound {
    pub fn new<T: protobuf::Message>(kind: MessageKind, message: &T) -> crate::error::Result<Self> {
        Ok(Self {
            kind,
            payload: Bytes::from(message.write_to_bytes()?),
        })
    }
}

/// Anything a handler may hand back, to be flattened into zero or more
/// outbound messages.
pub enum Response {
    /// No reply.
    None,
    /// A single protobuf message to send.
    Message(Outbound),
    /// A single voice packet to send over the UDP-tunnel message.
    Voice(VoicePacket<Serverbound>),
    /// Several responses, flattened in order.
    Many(Vec<Response>),
    /// A stream of further responses, each itself flattened in order.
    Stream(BoxStream<'static, Response>),
}

impl Response {
    /// Flattens `self` into an ordered stream of leaf responses
    /// ([`Response::Message`]/[`Response::Voice`] only).
    pub fn flatten(self) -> BoxStream<'static, Response> {
        match self {
            Response::None => stream::empty().boxed(),
            Response::Message(_) | Response::Voice(_) => stream::once(async { self }).boxed(),
            Response::Many(items) => stream::iter(items).flat_map(Response::flatten).boxed(),
            Response::Stream(inner) => inner.flat_map(Response::flatten).boxed(),
        }
    }
}

impl From<Outbound> for Response {
    fn from(outbound: Outbound) -> Self {
        Response::Message(outbound)
    }
}

impl From<VoicePacket<Serverbound>> for Response {
    fn from(packet: VoicePacket<Serverbound>) -> Self {
        Response::Voice(packet)
    }
}

impl From<Vec<Response>> for Response {
    fn from(items: Vec<Response>) -> Self {
        Response::Many(items)
    }
}

impl From<Option<Response>> for Response {
    fn from(maybe: Option<Response>) -> Self {
        match maybe {
            Some(response) => response,
            None => Response::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use crate::proto::mumble;
    use futures::executor::block_on;

    fn message(text: &str) -> Outbound {
        let mut authenticate = mumble::Authenticate::new();
        authenticate.set_username(text.to_string());
        Outbound::new(MessageKind::Authenticate, &authenticate).unwrap()
    }

    fn usernames(responses: Vec<Response>) -> Vec<String> {
        responses
            .into_iter()
            .map(|response| match response {
                Response::Message(outbound) => {
                    let parsed = mumble::Authenticate::parse_from_bytes(&outbound.payload).unwrap();
                    parsed.get_username().to_string()
                }
                _ => panic!("expected a Message response"),
            })
            .collect()
    }

    #[test]
    fn none_flattens_to_empty() {
        let flattened: Vec<Response> = block_on(Response::None.flatten().collect());
        assert_eq!(flattened.len(), 0);
    }

    #[test]
    fn single_message_flattens_to_itself() {
        let flattened: Vec<Response> = block_on(Response::Message(message("a")).flatten().collect());
        assert_eq!(usernames(flattened), vec!["a"]);
    }

    #[test]
    fn nested_many_and_stream_flatten_in_order() {
        let nested = Response::Many(vec![
            Response::Message(message("msg1")),
            Response::Stream(stream::iter(vec![Response::Message(message("msg2")), Response::Message(message("msg3"))]).boxed()),
        ]);

        let flattened: Vec<Response> = block_on(nested.flatten().collect());
        assert_eq!(usernames(flattened), vec!["msg1", "msg2", "msg3"]);
    }

    #[test]
    fn empty_responses_inside_many_are_dropped() {
        let nested = Response::Many(vec![Response::None, Response::Message(message("only")), Response::None]);
        let flattened: Vec<Response> = block_on(nested.flatten().collect());
        assert_eq!(usernames(flattened), vec!["only"]);
    }
}
