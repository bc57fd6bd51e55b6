//! Node error type.

use crate::cid::ContentId;
use crate::codec::CodecError;
use crate::store::StoreError;
use thiserror::Error;
use tricat_env::{EnvError, PeerId};

/// Errors surfaced by node operations.
///
/// Lower layers are wrapped, not converted, so callers can still see the
/// original storage, codec or transport condition.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Transport or simulator failure.
    #[error(transparent)]
    Env(#[from] EnvError),

    /// Storage-layer failure.
    #[error("block store: {0}")]
    Store(#[from] StoreError),

    #[error("malformed block: {0}")]
    Codec(#[from] CodecError),

    /// The ingest stream could not be read.
    #[error("reading input: {0}")]
    Io(#[from] std::io::Error),

    #[error("signing key does not match transport identity {0}")]
    IdentityMismatch(PeerId),

    #[error("handshake with {peer} failed: {reason}")]
    Handshake { peer: PeerId, reason: &'static str },

    /// Routing could not locate any source for the block.
    #[error("no providers found for {0}")]
    NoProviders(ContentId),

    /// Sources were located but none could be reached.
    #[error("providers of {cid} unreachable: {source}")]
    Unreachable {
        cid: ContentId,
        #[source]
        source: Box<NodeError>,
    },

    /// A peer returned bytes that do not hash to the requested identifier.
    #[error("block {expected} failed verification (got {actual})")]
    BlockHashMismatch {
        expected: ContentId,
        actual: ContentId,
    },

    #[error("unexpected {kind} from {peer}")]
    UnexpectedResponse { peer: PeerId, kind: &'static str },

    #[error("request to {peer} timed out after {ms}ms")]
    Timeout { peer: PeerId, ms: u64 },

    /// The node's cancellation scope fired.
    #[error("operation cancelled")]
    Cancelled,

    #[error("node closed")]
    Closed,
}

impl NodeError {
    /// True if the error came from a cancelled scope rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            NodeError::Cancelled => true,
            NodeError::Unreachable { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// True for failures to reach a peer over the fabric.
    pub fn is_connectivity(&self) -> bool {
        match self {
            NodeError::Env(err) => err.is_connectivity(),
            NodeError::Unreachable { .. }
            | NodeError::Handshake { .. }
            | NodeError::Timeout { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let a = PeerId::from_bytes([1; 32]);
        let b = PeerId::from_bytes([2; 32]);

        assert!(NodeError::from(EnvError::no_link(a, b)).is_connectivity());
        assert!(NodeError::from(EnvError::Closed).is_connectivity());
        assert!(NodeError::Cancelled.is_cancelled());
        assert!(!NodeError::from(EnvError::Closed).is_cancelled());
        assert!(!NodeError::NoProviders(ContentId::of(b"x")).is_connectivity());

        let wrapped = NodeError::Unreachable {
            cid: ContentId::of(b"x"),
            source: Box::new(NodeError::Cancelled),
        };
        assert!(wrapped.is_cancelled());
    }

    #[test]
    fn test_store_error_is_preserved() {
        let err = NodeError::from(StoreError::Closed);
        assert!(matches!(err, NodeError::Store(StoreError::Closed)));
        assert_eq!(err.to_string(), "block store: block store closed");
    }
}
