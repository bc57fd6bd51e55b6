//! Messages exchanged between nodes.
//!
//! Messages travel in-process; there is no byte encoding. `wire_size`
//! approximates what each message would occupy on a real connection so link
//! bandwidth is charged realistically (block payloads dominate).

use crate::cid::ContentId;
use bytes::Bytes;
use ed25519_dalek::Signature;
use tricat_env::{Payload, PeerId};

/// Correlates a response with the request that caused it.
pub type RequestId = u64;

/// Fixed per-message framing overhead.
const HEADER_LEN: usize = 16;
const CID_LEN: usize = 32;
const PEER_LEN: usize = 32;
const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Clone)]
pub enum Message {
    /// Handshake: the sender signs `hello_transcript(sender, receiver)`.
    Hello {
        request: RequestId,
        signature: Signature,
    },

    /// Handshake reply: the responder signs `hello_ack_transcript(responder, initiator)`.
    HelloAck {
        request: RequestId,
        signature: Signature,
    },

    /// Announces that the sender holds these blocks.
    Provide {
        request: RequestId,
        cids: Vec<ContentId>,
    },

    /// Provider records were stored.
    ProvideAck { request: RequestId },

    FindProviders { request: RequestId, cid: ContentId },

    Providers {
        request: RequestId,
        cid: ContentId,
        providers: Vec<PeerId>,
    },

    WantBlock { request: RequestId, cid: ContentId },

    Block {
        request: RequestId,
        cid: ContentId,
        data: Bytes,
    },

    DontHave { request: RequestId, cid: ContentId },
}

impl Message {
    /// The request this message answers, if it is a response.
    pub fn response_to(&self) -> Option<RequestId> {
        match self {
            Message::HelloAck { request, .. }
            | Message::ProvideAck { request }
            | Message::Providers { request, .. }
            | Message::Block { request, .. }
            | Message::DontHave { request, .. } => Some(*request),
            Message::Hello { .. }
            | Message::Provide { .. }
            | Message::FindProviders { .. }
            | Message::WantBlock { .. } => None,
        }
    }

    /// Short name for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::HelloAck { .. } => "hello_ack",
            Message::Provide { .. } => "provide",
            Message::ProvideAck { .. } => "provide_ack",
            Message::FindProviders { .. } => "find_providers",
            Message::Providers { .. } => "providers",
            Message::WantBlock { .. } => "want_block",
            Message::Block { .. } => "block",
            Message::DontHave { .. } => "dont_have",
        }
    }
}

impl Payload for Message {
    fn wire_size(&self) -> usize {
        HEADER_LEN
            + match self {
                Message::Hello { .. } | Message::HelloAck { .. } => SIGNATURE_LEN,
                Message::Provide { cids, .. } => cids.len() * CID_LEN,
                Message::ProvideAck { .. } => 0,
                Message::FindProviders { .. }
                | Message::WantBlock { .. }
                | Message::DontHave { .. } => CID_LEN,
                Message::Providers { providers, .. } => CID_LEN + providers.len() * PEER_LEN,
                Message::Block { data, .. } => CID_LEN + data.len(),
            }
    }
}

/// Bytes the handshake initiator signs.
pub fn hello_transcript(initiator: &PeerId, responder: &PeerId) -> Vec<u8> {
    transcript(b"tricat/hello", initiator, responder)
}

/// Bytes the handshake responder signs.
pub fn hello_ack_transcript(responder: &PeerId, initiator: &PeerId) -> Vec<u8> {
    transcript(b"tricat/hello-ack", responder, initiator)
}

fn transcript(label: &[u8], first: &PeerId, second: &PeerId) -> Vec<u8> {
    let mut out = Vec::with_capacity(label.len() + 2 * PEER_LEN);
    out.extend_from_slice(label);
    out.extend_from_slice(first.as_bytes());
    out.extend_from_slice(second.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_dominated_by_payload() {
        let message = Message::Block {
            request: 1,
            cid: ContentId::of(b"x"),
            data: Bytes::from(vec![0u8; 1000]),
        };
        assert_eq!(message.wire_size(), HEADER_LEN + CID_LEN + 1000);
    }

    #[test]
    fn test_response_correlation() {
        let cid = ContentId::of(b"x");
        assert_eq!(Message::DontHave { request: 7, cid }.response_to(), Some(7));
        assert_eq!(Message::WantBlock { request: 7, cid }.response_to(), None);
        assert_eq!(Message::ProvideAck { request: 3 }.response_to(), Some(3));
        assert_eq!(
            Message::Provide {
                request: 3,
                cids: vec![cid]
            }
            .response_to(),
            None
        );
    }

    #[test]
    fn test_transcripts_are_direction_bound() {
        let a = PeerId::from_bytes([1; 32]);
        let b = PeerId::from_bytes([2; 32]);
        assert_ne!(hello_transcript(&a, &b), hello_transcript(&b, &a));
        assert_ne!(hello_transcript(&a, &b), hello_ack_transcript(&a, &b));
    }
}
