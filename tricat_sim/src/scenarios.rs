//! Named three-node transfer scenarios.

use std::time::Duration;
use tricat_env::LatencyProfile;

const KB: usize = 1024;
const MB: usize = 1024 * KB;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// 100 MB over zero-cost links
    Transfer100Mb,

    // ═══════════════════════════════════════════════════
    // EPIC SCENARIOS - one degraded axis, or all of them
    // ═══════════════════════════════════════════════════
    /// 1 KB with a 50 ms block store
    SlowBlockstore,

    /// 1 KB over 400 ms links
    SlowNetwork,

    /// 1 KB with 400 ms routing lookups
    SlowRouting,

    /// 100 MB from New York to San Francisco on a 2014 laptop
    CoastToCoast100Mb,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Transfer100Mb,
            ScenarioId::SlowBlockstore,
            ScenarioId::SlowNetwork,
            ScenarioId::SlowRouting,
            ScenarioId::CoastToCoast100Mb,
        ]
    }

    /// Scenarios that run by default.
    pub fn standard() -> Vec<ScenarioId> {
        Self::all().into_iter().filter(|s| !s.is_epic()).collect()
    }

    /// Scenarios that only run on request.
    pub fn epic() -> Vec<ScenarioId> {
        Self::all().into_iter().filter(|s| s.is_epic()).collect()
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Transfer100Mb => "transfer_100mb",
            ScenarioId::SlowBlockstore => "slow_blockstore",
            ScenarioId::SlowNetwork => "slow_network",
            ScenarioId::SlowRouting => "slow_routing",
            ScenarioId::CoastToCoast100Mb => "coast_to_coast_100mb",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Transfer100Mb => "100 MB random payload, no simulated latency",
            ScenarioId::SlowBlockstore => "1 KB payload, 50ms on every block store access",
            ScenarioId::SlowNetwork => "1 KB payload, 400ms per message on every link",
            ScenarioId::SlowRouting => "1 KB payload, 400ms on every provide and lookup",
            ScenarioId::CoastToCoast100Mb => {
                "100 MB payload, cross-country links, slow SSD, slow routing"
            }
        }
    }

    /// Returns true if this scenario is skipped unless asked for.
    pub fn is_epic(&self) -> bool {
        !matches!(self, ScenarioId::Transfer100Mb)
    }

    /// Bytes the producer adds.
    pub fn payload_size(&self) -> usize {
        match self {
            ScenarioId::Transfer100Mb | ScenarioId::CoastToCoast100Mb => 100 * MB,
            ScenarioId::SlowBlockstore | ScenarioId::SlowNetwork | ScenarioId::SlowRouting => KB,
        }
    }

    pub fn profile(&self) -> LatencyProfile {
        let zero = LatencyProfile::all_instantaneous();
        match self {
            ScenarioId::Transfer100Mb => zero,
            ScenarioId::SlowBlockstore => zero.with_storage_delay(Duration::from_millis(50)),
            ScenarioId::SlowNetwork => zero.with_network_delay(Duration::from_millis(400)),
            ScenarioId::SlowRouting => zero.with_routing_delay(Duration::from_millis(400)),
            ScenarioId::CoastToCoast100Mb => zero
                .network_cross_country()
                .storage_slow_ssd()
                .routing_slow(),
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "transfer_100mb" | "transfer" => Ok(ScenarioId::Transfer100Mb),
            "slow_blockstore" | "slowblockstore" => Ok(ScenarioId::SlowBlockstore),
            "slow_network" | "slownetwork" => Ok(ScenarioId::SlowNetwork),
            "slow_routing" | "slowrouting" => Ok(ScenarioId::SlowRouting),
            "coast_to_coast_100mb" | "coast_to_coast" => Ok(ScenarioId::CoastToCoast100Mb),
            // Groups
            "epic" => Err("Use --epic flag for epic scenarios".to_string()),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
            assert_eq!(scenario.to_string(), scenario.name());
        }
        assert!("nope".parse::<ScenarioId>().is_err());
        assert!("epic".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_only_transfer_is_standard() {
        assert_eq!(ScenarioId::standard(), vec![ScenarioId::Transfer100Mb]);
        assert_eq!(ScenarioId::epic().len(), 4);
    }

    #[test]
    fn test_degraded_axes() {
        let storage = ScenarioId::SlowBlockstore.profile();
        assert_eq!(storage.storage_delay, Duration::from_millis(50));
        assert_eq!(storage.network_delay, Duration::ZERO);
        assert_eq!(storage.routing_delay, Duration::ZERO);

        let coast = ScenarioId::CoastToCoast100Mb.profile();
        assert_eq!(coast.network_delay, LatencyProfile::CROSS_COUNTRY);
        assert_eq!(coast.storage_delay, LatencyProfile::SLOW_SSD);
        assert_eq!(coast.routing_delay, LatencyProfile::SLOW_ROUTING);

        assert!(ScenarioId::Transfer100Mb.profile().is_instantaneous());
        assert_eq!(ScenarioId::Transfer100Mb.payload_size(), 100 * 1024 * 1024);
    }
}
