//! Latency budgets for the three axes a node can be slowed down on.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Independent delay budgets for network, routing and storage.
///
/// A profile is an immutable value: every preset returns a new profile with
/// exactly one axis replaced, so presets compose by chaining:
///
/// ```
/// use tricat_env::LatencyProfile;
///
/// let profile = LatencyProfile::default()
///     .network_cross_country()
///     .storage_slow_ssd()
///     .routing_slow();
/// assert!(!profile.is_instantaneous());
/// ```
///
/// Zero means "no simulated delay". Scheduling overhead is not modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LatencyProfile {
    /// Per-message delay on every virtual link.
    pub network_delay: Duration,

    /// Delay added to every routing operation (provide, find providers).
    pub routing_delay: Duration,

    /// Delay added to every block store access.
    pub storage_delay: Duration,
}

impl LatencyProfile {
    /// One-way New York to San Francisco.
    pub const CROSS_COUNTRY: Duration = Duration::from_millis(200);
    /// Same-datacenter round trip.
    pub const INTRA_DATACENTER: Duration = Duration::from_micros(250);
    /// Seek on a slow rotational disk.
    pub const SLOW_ROTATIONAL: Duration = Duration::from_millis(20);
    /// Seek on a 7200 RPM disk.
    pub const DISK_7200_RPM: Duration = Duration::from_millis(8);
    /// Access on a 2014-era consumer SSD.
    pub const SLOW_SSD: Duration = Duration::from_micros(150);
    /// A DHT lookup spanning several hops.
    pub const SLOW_ROUTING: Duration = Duration::from_millis(200);

    /// Creates a profile from explicit budgets.
    pub const fn new(network_delay: Duration, routing_delay: Duration, storage_delay: Duration) -> Self {
        Self {
            network_delay,
            routing_delay,
            storage_delay,
        }
    }

    /// Every axis at zero.
    pub const fn all_instantaneous() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    /// Replaces the network axis.
    pub const fn with_network_delay(mut self, delay: Duration) -> Self {
        self.network_delay = delay;
        self
    }

    /// Replaces the routing axis.
    pub const fn with_routing_delay(mut self, delay: Duration) -> Self {
        self.routing_delay = delay;
        self
    }

    /// Replaces the storage axis.
    pub const fn with_storage_delay(mut self, delay: Duration) -> Self {
        self.storage_delay = delay;
        self
    }

    pub const fn network_cross_country(self) -> Self {
        self.with_network_delay(Self::CROSS_COUNTRY)
    }

    pub const fn network_intra_datacenter(self) -> Self {
        self.with_network_delay(Self::INTRA_DATACENTER)
    }

    pub const fn storage_slow_rotational(self) -> Self {
        self.with_storage_delay(Self::SLOW_ROTATIONAL)
    }

    pub const fn storage_7200rpm(self) -> Self {
        self.with_storage_delay(Self::DISK_7200_RPM)
    }

    pub const fn storage_slow_ssd(self) -> Self {
        self.with_storage_delay(Self::SLOW_SSD)
    }

    pub const fn routing_slow(self) -> Self {
        self.with_routing_delay(Self::SLOW_ROUTING)
    }

    /// True when no axis adds delay.
    pub fn is_instantaneous(&self) -> bool {
        self.network_delay.is_zero() && self.routing_delay.is_zero() && self.storage_delay.is_zero()
    }
}

impl std::fmt::Display for LatencyProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "network={:?} routing={:?} storage={:?}",
            self.network_delay, self.routing_delay, self.storage_delay
        )
    }
}
