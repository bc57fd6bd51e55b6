//! tricat Core - content-addressed storage and retrieval node
//!
//! A node splits a byte stream into blocks, names every block by its BLAKE3
//! digest, announces what it holds to its routing contacts, and serves and
//! fetches blocks from other nodes. Everything that touches the outside
//! world goes through `tricat_env`, so the same node runs over any
//! [`Transport`](tricat_env::Transport).
//!
//! Latency injection lives at the entry point of each subsystem:
//! - storage: [`LatentStore`] sleeps `storage_delay` on every access
//! - routing: [`Node`] sleeps `routing_delay` on every provide / lookup
//! - network: the transport shapes each link

pub mod chunker;
pub mod cid;
pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod node;
pub mod routing;
pub mod store;
mod sync;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use chunker::{Chunker, Ingested};
pub use cid::ContentId;
pub use codec::{Block, CodecError, Link};
pub use config::NodeConfig;
pub use error::NodeError;
pub use message::{Message, RequestId};
pub use node::{ContentStream, Node};
pub use routing::RoutingTable;
pub use store::{BlockStore, LatentStore, MemoryBlockStore, StoreError, StoreStats};
