//! Network transport abstraction for tricat nodes.

use crate::error::EnvError;
use crate::types::PeerId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A message that can cross a link.
///
/// `wire_size` is the number of bytes charged against a link's bandwidth
/// ceiling. No byte-level encoding is required.
pub trait Payload: Send + 'static {
    /// Bytes this message occupies on the wire.
    fn wire_size(&self) -> usize;
}

impl Payload for Vec<u8> {
    fn wire_size(&self) -> usize {
        self.len()
    }
}

/// Abstraction for network I/O between tricat peers.
///
/// # Implementations
///
/// - **Simulation**: `tricat_sim::SimTransport`, a channel per virtual link
///   with bandwidth and delay shaping
///
/// # Delivery
///
/// Implementations must be lossless and FIFO per (sender, receiver) pair.
///
/// ```text
/// Peer A                     Link A->B                   Peer B
///   |                           |                          |
///   |-- send(B, m1) ----------->|                          |
///   |-- send(B, m2) ----------->|-- [size/bandwidth] ------>|
///   |                           |-- [delay] -------------->|-- recv() -> m1
///   |                           |                          |-- recv() -> m2
/// ```
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The message type carried by this transport.
    type Message: Payload;

    /// Queues a message for delivery to `target`.
    ///
    /// # Returns
    /// * `Ok(())` - Message accepted by the link; it will be delivered
    /// * `Err(EnvError::NoLink)` - No link connects this peer to `target`
    /// * `Err(EnvError::Closed)` - The transport or its network is closed
    async fn send(&self, target: PeerId, message: Self::Message) -> Result<(), EnvError>;

    /// Receives the next message addressed to this peer.
    ///
    /// Returns `None` once the transport is closed.
    async fn recv(&self) -> Option<(PeerId, Self::Message)>;

    /// Returns true if a link to `target` currently exists.
    ///
    /// Fails with `EnvError::Closed` once the transport or its network is
    /// closed, so callers can tell a shut-down fabric from a missing link.
    fn is_linked(&self, target: PeerId) -> Result<bool, EnvError>;

    /// Returns this peer's ID.
    fn local_id(&self) -> PeerId;

    /// Releases this endpoint. Idempotent.
    fn close(&self);
}

/// Characteristics of one direction of a virtual link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkOptions {
    /// Bandwidth ceiling in bytes/second (`None` = unlimited).
    pub bandwidth: Option<u64>,

    /// Fixed propagation delay charged once per message.
    pub delay: Duration,
}

impl LinkOptions {
    /// A zero-cost link: unlimited bandwidth, no delay.
    pub const fn unlimited() -> Self {
        Self {
            bandwidth: None,
            delay: Duration::ZERO,
        }
    }

    /// Creates link options from a bandwidth ceiling and a delay.
    pub const fn new(bandwidth: u64, delay: Duration) -> Self {
        Self {
            bandwidth: Some(bandwidth),
            delay,
        }
    }

    /// Returns a copy with the delay replaced.
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Time the link is busy transmitting `size` bytes.
    ///
    /// A zero ceiling is treated as unlimited.
    pub fn transmit_time(&self, size: usize) -> Duration {
        match self.bandwidth {
            Some(bandwidth) if bandwidth > 0 => {
                Duration::from_secs_f64(size as f64 / bandwidth as f64)
            }
            _ => Duration::ZERO,
        }
    }

    /// Minimum time between send and delivery of `size` bytes.
    pub fn transfer_time(&self, size: usize) -> Duration {
        self.transmit_time(size) + self.delay
    }
}

/// Control surface for shaping a network's links.
pub trait NetworkController: Send + Sync {
    /// Sets the options used by links that were not explicitly configured.
    ///
    /// Applies to transfers started after the call.
    fn set_default_link_options(&self, options: LinkOptions) -> Result<(), EnvError>;

    /// Configures both directions of the link between `a` and `b`.
    fn set_link_options(&self, a: PeerId, b: PeerId, options: LinkOptions) -> Result<(), EnvError>;

    /// Configures only the `from -> to` direction.
    fn set_directed_link_options(
        &self,
        from: PeerId,
        to: PeerId,
        options: LinkOptions,
    ) -> Result<(), EnvError>;

    /// Returns the effective options for `from -> to`, or `None` if unlinked.
    fn link_options(&self, from: PeerId, to: PeerId) -> Result<Option<LinkOptions>, EnvError>;

    /// Wires a link between `a` and `b` (both directions).
    fn link(&self, a: PeerId, b: PeerId) -> Result<(), EnvError>;

    /// Removes the link between `a` and `b` (both directions).
    fn unlink(&self, a: PeerId, b: PeerId) -> Result<(), EnvError>;
}
