//! Scenario runner - the three-node add/cat transfer.
//!
//! ```text
//!  producer (peer 0) ──┐                  ┌── consumer (peer 1)
//!                      └── bootstrap (peer 2) ─┘
//! ```
//!
//! Producer and consumer both bootstrap against peer 2; the producer adds a
//! payload and the consumer retrieves it by root identifier, with every
//! block found through routing and carried over virtual links.

use crate::config::SimConfig;
use crate::context::SimContext;
use crate::network::{NetworkSimulator, Traffic};
use crate::payload::random_bytes;
use crate::scenarios::ScenarioId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tricat_core::{ContentId, Message, Node, NodeError};
use tricat_env::{EnvError, LatencyProfile, NodeContext, Payload, PeerId};

/// Stages of the three-node scenario, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioStep {
    SimulatorInit,
    NodeConstruction,
    Bootstrap,
    Ingest,
    Retrieve,
    Verify,
}

impl ScenarioStep {
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioStep::SimulatorInit => "simulator init",
            ScenarioStep::NodeConstruction => "node construction",
            ScenarioStep::Bootstrap => "bootstrap",
            ScenarioStep::Ingest => "ingest",
            ScenarioStep::Retrieve => "retrieve",
            ScenarioStep::Verify => "verify",
        }
    }
}

impl fmt::Display for ScenarioStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a scenario failed. Every variant names the step that failed.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The simulator or a node could not be built.
    #[error("test initialization error during {step}: {source}")]
    Initialization {
        step: ScenarioStep,
        #[source]
        source: NodeError,
    },

    /// A link was missing, a peer closed, or a located source was unreachable.
    #[error("connectivity error during {step}: {source}")]
    Connectivity {
        step: ScenarioStep,
        #[source]
        source: NodeError,
    },

    /// Storage, routing or block validation failed.
    #[error("{step} failed: {source}")]
    Operation {
        step: ScenarioStep,
        #[source]
        source: NodeError,
    },

    /// Retrieved bytes differ from the added bytes.
    #[error(
        "catted data does not match added data ({actual} bytes retrieved, {expected} added, first difference at {first_difference})"
    )]
    Integrity {
        expected: usize,
        actual: usize,
        first_difference: usize,
    },

    #[error("scenario cancelled during {step}")]
    Cancelled { step: ScenarioStep },
}

impl ScenarioError {
    /// Attaches the failing step to a lower-level error.
    pub fn at(step: ScenarioStep, source: NodeError) -> Self {
        if source.is_cancelled() {
            return ScenarioError::Cancelled { step };
        }
        match step {
            ScenarioStep::SimulatorInit | ScenarioStep::NodeConstruction => {
                ScenarioError::Initialization { step, source }
            }
            _ if source.is_connectivity() => ScenarioError::Connectivity { step, source },
            _ => ScenarioError::Operation { step, source },
        }
    }

    pub fn step(&self) -> ScenarioStep {
        match self {
            ScenarioError::Initialization { step, .. }
            | ScenarioError::Connectivity { step, .. }
            | ScenarioError::Operation { step, .. }
            | ScenarioError::Cancelled { step } => *step,
            ScenarioError::Integrity { .. } => ScenarioStep::Verify,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScenarioError::Cancelled { .. })
    }
}

/// What a successful transfer measured.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub root: ContentId,

    /// Payload size in bytes
    pub bytes: usize,

    /// Blocks the producer wrote
    pub blocks: usize,

    /// Virtual time from simulator setup to verification
    pub elapsed: Duration,

    /// Delivered messages and bytes summed over every link
    pub traffic: Traffic,
}

type SimNode = Node<SimContext, crate::network::SimTransport<Message>>;

/// One bootstrap / producer / consumer run over a fresh simulator.
pub struct ThreeNodeScenario {
    config: SimConfig,
    profile: LatencyProfile,
    scope: CancellationToken,
}

impl ThreeNodeScenario {
    pub const PEER_COUNT: usize = 3;
    pub const PRODUCER: usize = 0;
    pub const CONSUMER: usize = 1;
    pub const BOOTSTRAP: usize = 2;

    pub fn new(config: SimConfig, profile: LatencyProfile) -> Self {
        Self {
            config,
            profile,
            scope: CancellationToken::new(),
        }
    }

    /// Cancelling this token aborts the run; teardown still happens.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.scope.clone()
    }

    pub fn bootstrap_peer<M: Payload>(network: &NetworkSimulator<M>) -> Result<PeerId, EnvError> {
        network.peer(Self::BOOTSTRAP)
    }

    pub fn producer_peer<M: Payload>(network: &NetworkSimulator<M>) -> Result<PeerId, EnvError> {
        network.peer(Self::PRODUCER)
    }

    pub fn consumer_peer<M: Payload>(network: &NetworkSimulator<M>) -> Result<PeerId, EnvError> {
        network.peer(Self::CONSUMER)
    }

    /// Runs the scenario on `data`. The simulator and every node are closed
    /// before this returns, whatever the outcome.
    pub async fn run(&self, data: &[u8]) -> Result<TransferReport, ScenarioError> {
        let context = SimContext::shared();
        info!(
            "Three-node transfer: {} bytes, seed={}, profile: {}",
            data.len(),
            self.config.seed,
            self.profile
        );

        let network = NetworkSimulator::<Message>::with_config(
            Self::PEER_COUNT,
            self.config.seed,
            self.config.network_config(&self.profile),
        )
        .map_err(|err| ScenarioError::at(ScenarioStep::SimulatorInit, err.into()))?;

        let outcome = self.drive(&network, &context, data).await;

        network.close();
        debug!("Teardown complete");

        match &outcome {
            Ok(report) => info!(
                "Transfer of {} verified in {:?} ({} messages, {} bytes on the wire)",
                report.root, report.elapsed, report.traffic.messages, report.traffic.bytes
            ),
            Err(err) => warn!("Transfer failed: {}", err),
        }
        outcome
    }

    /// Runs the scenario, cancelling it if it has not finished after `limit`
    /// of simulated time.
    pub async fn run_with_timeout(
        &self,
        data: &[u8],
        limit: Duration,
    ) -> Result<TransferReport, ScenarioError> {
        let run = self.run(data);
        tokio::pin!(run);
        tokio::select! {
            outcome = &mut run => return outcome,
            _ = tokio::time::sleep(limit) => {
                warn!("Scenario exceeded {:?}, cancelling", limit);
                self.scope.cancel();
            }
        }
        run.await
    }

    async fn drive(
        &self,
        network: &NetworkSimulator<Message>,
        context: &Arc<SimContext>,
        data: &[u8],
    ) -> Result<TransferReport, ScenarioError> {
        // Nodes close on drop, so an early return releases what was built.
        let bootstrap = self.spawn_node(network, context, Self::BOOTSTRAP, "bootstrap")?;
        let producer = self.spawn_node(network, context, Self::PRODUCER, "producer")?;
        let consumer = self.spawn_node(network, context, Self::CONSUMER, "consumer")?;

        let rendezvous = [bootstrap.id()];
        step(ScenarioStep::Bootstrap, producer.bootstrap(&rendezvous)).await?;
        step(ScenarioStep::Bootstrap, consumer.bootstrap(&rendezvous)).await?;

        let root = step(ScenarioStep::Ingest, producer.add(data)).await?;
        let stream = step(ScenarioStep::Retrieve, consumer.cat(root)).await?;
        let output = step(ScenarioStep::Retrieve, stream.read_to_end()).await?;

        verify(data, &output)?;

        let report = TransferReport {
            root,
            bytes: data.len(),
            blocks: producer.store_stats().blocks,
            elapsed: context.now(),
            traffic: total_traffic(network),
        };

        consumer.close();
        producer.close();
        bootstrap.close();
        Ok(report)
    }

    fn spawn_node(
        &self,
        network: &NetworkSimulator<Message>,
        context: &Arc<SimContext>,
        index: usize,
        name: &str,
    ) -> Result<SimNode, ScenarioError> {
        let fail = |err: NodeError| ScenarioError::at(ScenarioStep::NodeConstruction, err);
        let transport = network.transport(index).map_err(|err| fail(err.into()))?;
        let key = network.signing_key(index).map_err(|err| fail(err.into()))?;

        Node::new(
            Arc::clone(context),
            transport,
            key,
            self.profile,
            self.config.node_config(name),
            &self.scope,
        )
        .map_err(fail)
    }
}

async fn step<T, F>(step: ScenarioStep, operation: F) -> Result<T, ScenarioError>
where
    F: std::future::Future<Output = Result<T, NodeError>>,
{
    debug!("Step: {}", step);
    operation.await.map_err(|err| ScenarioError::at(step, err))
}

fn verify(expected: &[u8], actual: &[u8]) -> Result<(), ScenarioError> {
    if expected == actual {
        return Ok(());
    }
    let first_difference = expected
        .iter()
        .zip(actual)
        .position(|(a, b)| a != b)
        .unwrap_or_else(|| expected.len().min(actual.len()));
    Err(ScenarioError::Integrity {
        expected: expected.len(),
        actual: actual.len(),
        first_difference,
    })
}

fn total_traffic<M: Payload>(network: &NetworkSimulator<M>) -> Traffic {
    let Ok(peers) = network.peers() else {
        return Traffic::default();
    };
    let mut total = Traffic::default();
    for from in peers {
        for to in peers {
            let link = network.traffic(*from, *to);
            total.messages += link.messages;
            total.bytes += link.bytes;
        }
    }
    total
}

/// Results from running a named scenario.
#[derive(Debug)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Payload size in bytes
    pub payload_size: usize,

    pub outcome: Result<TransferReport, ScenarioError>,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.outcome.as_ref().err().map(|err| err.to_string())
    }
}

/// Runs named scenarios.
pub struct ScenarioRunner {
    config: SimConfig,
    size_override: Option<usize>,
    timeout: Option<Duration>,
}

impl ScenarioRunner {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            size_override: None,
            timeout: None,
        }
    }

    /// Replaces every scenario's payload size.
    pub fn with_size(mut self, size: Option<usize>) -> Self {
        self.size_override = size;
        self
    }

    /// Bounds each scenario's simulated duration.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.config.seed);
        if scenario.is_epic() {
            info!("Epic scenario: {}", scenario.description());
        }

        let payload_size = self.size_override.unwrap_or_else(|| scenario.payload_size());
        let data = random_bytes(self.config.seed, payload_size);
        let harness = ThreeNodeScenario::new(self.config.clone(), scenario.profile());

        let outcome = match self.timeout {
            Some(limit) => harness.run_with_timeout(&data, limit).await,
            None => harness.run(&data).await,
        };

        ScenarioResult {
            scenario,
            seed: self.config.seed,
            payload_size,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::random_bytes;
    use tricat_env::NetworkController;

    const KB: usize = 1024;
    const MB: usize = 1024 * KB;

    fn run_profile(profile: LatencyProfile) -> ThreeNodeScenario {
        ThreeNodeScenario::new(SimConfig::default(), profile)
    }

    /// Small leaves so kilobyte payloads still build multi-level trees.
    fn small_blocks() -> SimConfig {
        SimConfig {
            chunk_size: 256,
            max_links: 4,
            ..SimConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_100mb() {
        let data = random_bytes(42, 100 * MB);
        let report = run_profile(LatencyProfile::all_instantaneous())
            .run(&data)
            .await
            .unwrap();

        assert_eq!(report.bytes, 100 * MB);
        assert!(report.blocks > 400);
        assert!(report.traffic.bytes > 100 * MB as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_blockstore_takes_at_least_storage_delay() {
        let data = random_bytes(1, KB);
        let report = run_profile(ScenarioId::SlowBlockstore.profile())
            .run(&data)
            .await
            .unwrap();
        assert!(report.elapsed >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_edge_sizes() {
        for size in [0, 1, 255, 256, 257, 10 * KB + 3] {
            let data = random_bytes(size as u64, size);
            let scenario = ThreeNodeScenario::new(small_blocks(), LatencyProfile::all_instantaneous());
            let report = scenario.run(&data).await.unwrap();
            assert_eq!(report.bytes, size);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_axis_degrades_monotonically() {
        let data = random_bytes(3, 4 * KB);
        let delay = Duration::from_millis(40);
        let base = LatencyProfile::all_instantaneous();

        let fast = ThreeNodeScenario::new(small_blocks(), base)
            .run(&data)
            .await
            .unwrap();

        for profile in [
            base.with_network_delay(delay),
            base.with_routing_delay(delay),
            base.with_storage_delay(delay),
        ] {
            let slow = ThreeNodeScenario::new(small_blocks(), profile)
                .run(&data)
                .await
                .unwrap();
            assert_eq!(slow.root, fast.root);
            assert!(slow.elapsed > fast.elapsed, "{profile} was not slower");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_minute_long_delays_still_complete() {
        let data = random_bytes(8, KB);
        let base = LatencyProfile::all_instantaneous();

        for (profile, floor) in [
            (base.with_storage_delay(Duration::from_secs(61)), Duration::from_secs(61)),
            (base.with_network_delay(Duration::from_secs(31)), Duration::from_secs(62)),
            (base.with_routing_delay(Duration::from_secs(90)), Duration::from_secs(90)),
        ] {
            let report = run_profile(profile).run(&data).await.unwrap();
            assert!(report.elapsed >= floor, "{profile}: {:?}", report.elapsed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_scenario_profile_completes() {
        // payloads shrunk so the 100 MB scenarios stay quick
        let runner = ScenarioRunner::new(small_blocks()).with_size(Some(2 * KB));
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario).await;
            assert!(result.passed(), "{scenario}: {:?}", result.failure_reason());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_and_tears_down() {
        let profile = LatencyProfile::all_instantaneous().with_routing_delay(Duration::from_secs(600));
        let scenario = ThreeNodeScenario::new(SimConfig::default(), profile);

        let err = scenario
            .run_with_timeout(&random_bytes(5, KB), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_cancelled(), "unexpected error: {err}");
        assert_eq!(err.step(), ScenarioStep::Ingest);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let scenario = run_profile(LatencyProfile::all_instantaneous());
        scenario.cancellation_token().cancel();

        let err = scenario.run(&random_bytes(5, KB)).await.unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Cancelled {
                step: ScenarioStep::NodeConstruction
            }
        ));
    }

    #[test]
    fn test_mismatch_is_integrity_error() {
        let err = verify(b"abcdef", b"abcxef").unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Integrity {
                first_difference: 3,
                ..
            }
        ));
        assert_eq!(err.step(), ScenarioStep::Verify);

        let err = verify(b"abc", b"ab").unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Integrity {
                expected: 3,
                actual: 2,
                first_difference: 2
            }
        ));
    }

    #[test]
    fn test_error_classification() {
        let peer = PeerId::from_bytes([1; 32]);
        let missing = NodeError::from(EnvError::no_link(peer, peer));

        assert!(matches!(
            ScenarioError::at(ScenarioStep::SimulatorInit, EnvError::InvalidPeerCount(0).into()),
            ScenarioError::Initialization { .. }
        ));
        assert!(matches!(
            ScenarioError::at(ScenarioStep::Bootstrap, missing),
            ScenarioError::Connectivity { .. }
        ));
        assert!(matches!(
            ScenarioError::at(ScenarioStep::Retrieve, NodeError::NoProviders(ContentId::of(b"x"))),
            ScenarioError::Operation { .. }
        ));
        assert!(matches!(
            ScenarioError::at(ScenarioStep::Ingest, NodeError::Cancelled),
            ScenarioError::Cancelled { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_named_peers_follow_creation_order() {
        let network = NetworkSimulator::<Message>::new(ThreeNodeScenario::PEER_COUNT).unwrap();
        let peers = network.peers().unwrap().to_vec();

        assert_eq!(ThreeNodeScenario::producer_peer(&network).unwrap(), peers[0]);
        assert_eq!(ThreeNodeScenario::consumer_peer(&network).unwrap(), peers[1]);
        assert_eq!(ThreeNodeScenario::bootstrap_peer(&network).unwrap(), peers[2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_over_missing_link_fails_cleanly() {
        let network = NetworkSimulator::<Message>::new(2).unwrap();
        let context = SimContext::shared();
        let scope = CancellationToken::new();
        let node = Node::new(
            Arc::clone(&context),
            network.transport(0).unwrap(),
            network.signing_key(0).unwrap(),
            LatencyProfile::all_instantaneous(),
            SimConfig::default().node_config("lonely"),
            &scope,
        )
        .unwrap();
        let other = network.peer(1).unwrap();

        network.unlink(node.id(), other).unwrap();
        let err = node.bootstrap(&[other]).await.unwrap_err();
        assert!(
            matches!(err, NodeError::Env(EnvError::NoLink { .. })),
            "unexpected error: {err}"
        );
        assert!(node.contacts().is_empty());

        network.link(node.id(), other).unwrap();
        network.close();
        let err = node.bootstrap(&[other]).await.unwrap_err();
        assert!(
            matches!(err, NodeError::Env(EnvError::Closed)),
            "unexpected error: {err}"
        );
        assert!(err.is_connectivity());
        assert!(node.contacts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_operations_fail_after_close() {
        let network = NetworkSimulator::<Message>::new(1).unwrap();
        let node = Node::new(
            SimContext::shared(),
            network.transport(0).unwrap(),
            network.signing_key(0).unwrap(),
            LatencyProfile::all_instantaneous(),
            SimConfig::default().node_config("solo"),
            &CancellationToken::new(),
        )
        .unwrap();

        node.close();
        node.close();
        assert!(matches!(node.add(&b"x"[..]).await, Err(NodeError::Closed)));
        assert!(matches!(
            node.cat(ContentId::of(b"x")).await,
            Err(NodeError::Closed)
        ));
    }
}
