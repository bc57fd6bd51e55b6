//! tricat Environment Abstraction Layer
//!
//! This crate provides the seams that let a tricat node run unchanged over
//! any transport: a real network in production, or the virtual fabric of
//! `tricat_sim` under test.
//!
//! # What is abstracted
//!
//! - Time (`now()`, `sleep()`) and task spawning, via [`NodeContext`]
//! - Network (`send()`, `recv()`), via [`Transport`]
//! - Link shaping (bandwidth, delay), via [`NetworkController`]
//! - Latency budgets for network, routing and storage, via [`LatencyProfile`]
//!
//! Identities are Ed25519 verifying keys ([`PeerId`]), so any implementation
//! that derives keys from a seed makes the whole run reproducible.
//!
//! # Example
//!
//! ```ignore
//! use tricat_env::{NodeContext, Transport};
//!
//! async fn event_loop<Ctx: NodeContext, Net: Transport>(ctx: &Ctx, net: &Net) {
//!     while let Some((from, message)) = net.recv().await {
//!         handle(ctx, from, message).await;
//!     }
//! }
//! ```

mod context;
mod error;
mod latency;
mod network;
mod types;

pub use context::NodeContext;
pub use error::EnvError;
pub use latency::LatencyProfile;
pub use network::{LinkOptions, NetworkController, Payload, Transport};
pub use types::PeerId;
