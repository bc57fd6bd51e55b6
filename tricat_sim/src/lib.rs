//! tricat Network Simulator and Transfer Harness
//!
//! This crate provides the virtual fabric that tricat nodes run on under
//! test, and the three-node add/cat scenario built on top of it.
//!
//! # Core Principle: Virtual Time
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: tokio's paused clock advances only when every task is idle
//! - **Network**: bounded per-link channels with bandwidth and delay shaping
//! - **Randomness**: identities and payloads derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── NetworkSimulator ─────────────────────────┐
//! │  peer 0 (producer) ◄──► peer 2 (bootstrap) ◄──► peer 1 (consumer) │
//! │         ▲                                              ▲          │
//! │         └──────────────────── direct link ─────────────┘          │
//! │                                                                   │
//! │  each directed link: queue -> transmit -> propagate -> inbox      │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tricat_sim::{SimConfig, ThreeNodeScenario};
//! use tricat_env::LatencyProfile;
//!
//! let scenario = ThreeNodeScenario::new(SimConfig::default(), LatencyProfile::default());
//! let report = scenario.run(&payload).await?;
//! ```

mod config;
mod context;
mod keys;
mod network;
pub mod payload;
mod runner;
pub mod scenarios;
mod sync;

pub use config::{ConfigError, SimConfig, DEFAULT_BANDWIDTH};
pub use context::SimContext;
pub use keys::DeterministicKeyProvider;
pub use network::{NetworkConfig, NetworkSimulator, SimTransport, Traffic};
pub use runner::{
    ScenarioError, ScenarioResult, ScenarioRunner, ScenarioStep, ThreeNodeScenario, TransferReport,
};
