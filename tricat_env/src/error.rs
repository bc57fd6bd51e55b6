//! Error types for the tricat environment abstraction.

use crate::types::PeerId;
use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The network (or this endpoint of it) has been closed.
    #[error("simulator closed")]
    Closed,

    /// No virtual link connects the two peers.
    #[error("no link from {from} to {to}")]
    NoLink { from: PeerId, to: PeerId },

    /// The destination endpoint has been closed.
    #[error("peer {0} is closed")]
    PeerClosed(PeerId),

    /// The peer identity is not part of this network.
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// A peer index beyond the fixed peer count was requested.
    #[error("peer index {index} out of range (network has {count} peers)")]
    PeerIndexOutOfRange { index: usize, count: usize },

    /// A network must contain at least one peer.
    #[error("invalid peer count: {0}")]
    InvalidPeerCount(usize),

    /// Identity generation produced the same identity twice.
    #[error("duplicate peer identity: {0}")]
    DuplicateIdentity(PeerId),

    /// The peer's endpoint was already handed out to a node.
    #[error("peer {0} is already bound")]
    PeerAlreadyBound(usize),

    /// A self-link was requested.
    #[error("cannot link peer {0} to itself")]
    LinkingSelf(PeerId),
}

impl EnvError {
    /// Creates a missing-link error.
    pub fn no_link(from: PeerId, to: PeerId) -> Self {
        Self::NoLink { from, to }
    }

    /// Returns true for errors caused by a missing or closed link.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::NoLink { .. } | Self::PeerClosed(_) | Self::UnknownPeer(_)
        )
    }
}
