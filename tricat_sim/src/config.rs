//! Simulation run configuration.

use crate::network::NetworkConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tricat_core::NodeConfig;
use tricat_env::{LatencyProfile, LinkOptions};

/// 500 MiB/s, the link ceiling of every scenario.
pub const DEFAULT_BANDWIDTH: u64 = 500 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration for a simulation run.
///
/// Every field has a default, so a JSON file only needs the fields it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Link bandwidth ceiling in bytes/second
    pub bandwidth: u64,

    /// Messages queued per link before senders wait
    pub link_buffer: usize,

    /// Messages queued per peer inbox before links wait
    pub inbox_buffer: usize,

    /// Leaf size used by the producer
    pub chunk_size: usize,

    /// Children per branch block
    pub max_links: usize,

    /// Leaves the consumer fetches concurrently
    pub fetch_concurrency: usize,

    /// Per-request timeout in milliseconds (`None` = bounded only by the
    /// scenario's cancellation scope)
    pub request_timeout_ms: Option<u64>,

    /// Per-node store capacity in bytes (`None` = unbounded)
    pub store_capacity: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        let node = NodeConfig::default();
        let network = NetworkConfig::default();
        Self {
            seed: 42,
            bandwidth: DEFAULT_BANDWIDTH,
            link_buffer: network.link_buffer,
            inbox_buffer: network.inbox_buffer,
            chunk_size: node.chunk_size,
            max_links: node.max_links,
            fetch_concurrency: node.fetch_concurrency,
            request_timeout_ms: node.request_timeout.map(|t| t.as_millis() as u64),
            store_capacity: node.store_capacity,
        }
    }
}

impl SimConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Sets the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Network parameters with every link carrying the profile's delay.
    pub fn network_config(&self, profile: &LatencyProfile) -> NetworkConfig {
        NetworkConfig {
            default_link: LinkOptions::new(self.bandwidth, profile.network_delay),
            link_buffer: self.link_buffer,
            inbox_buffer: self.inbox_buffer,
        }
    }

    /// Node parameters for the node called `name`.
    pub fn node_config(&self, name: &str) -> NodeConfig {
        NodeConfig {
            name: name.to_string(),
            chunk_size: self.chunk_size,
            max_links: self.max_links,
            fetch_concurrency: self.fetch_concurrency,
            request_timeout: self.request_timeout_ms.map(Duration::from_millis),
            store_capacity: self.store_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_node_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.bandwidth, 500 * 1024 * 1024);
        assert_eq!(config.chunk_size, NodeConfig::default().chunk_size);
        assert_eq!(config.node_config("x").request_timeout, None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SimConfig =
            serde_json::from_str(r#"{ "seed": 7, "chunk_size": 1024, "request_timeout_ms": 1500 }"#).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(
            config.node_config("x").request_timeout,
            Some(Duration::from_millis(1500))
        );
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.bandwidth, DEFAULT_BANDWIDTH);
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!("tricat-sim-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "store_capacity": 4096 }"#).unwrap();
        let config = SimConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.store_capacity, Some(4096));
        assert!(matches!(
            SimConfig::from_json_file(&path),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_network_config_carries_network_delay() {
        let profile = LatencyProfile::all_instantaneous().network_cross_country();
        let network = SimConfig::default().network_config(&profile);
        assert_eq!(network.default_link.delay, LatencyProfile::CROSS_COUNTRY);
        assert_eq!(network.default_link.bandwidth, Some(DEFAULT_BANDWIDTH));
    }
}
