//! Node configuration.

use std::time::Duration;

/// Default leaf size (256 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Default fan-out of a branch block.
pub const DEFAULT_MAX_LINKS: usize = 174;

/// Configuration for a tricat node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Node's logical name (for logging)
    pub name: String,

    /// Leaf size used when ingesting content.
    pub chunk_size: usize,

    /// Maximum number of children per branch block.
    pub max_links: usize,

    /// Leaves fetched concurrently during retrieval.
    pub fetch_concurrency: usize,

    /// Upper bound on a single request/response exchange (`None` = wait
    /// until the node's scope is cancelled or the peer goes away).
    pub request_timeout: Option<Duration>,

    /// Local store capacity in bytes (`None` = unbounded).
    pub store_capacity: Option<u64>,
}

impl NodeConfig {
    /// Default configuration with a logical name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "tricat-node".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_links: DEFAULT_MAX_LINKS,
            fetch_concurrency: 8,
            request_timeout: None,
            store_capacity: None,
        }
    }
}
