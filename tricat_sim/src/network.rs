//! Simulated network: virtual peers, virtual links and their transports.
//!
//! Every directed link that carries traffic gets a pump made of two tasks:
//!
//! ```text
//! send() --[bounded queue]--> transmit --[ordered]--> propagate --> inbox
//!                             sleep size/bandwidth    sleep until
//!                             (link busy)             max(prev, t + delay)
//! ```
//!
//! Link options are captured when a message is sent, so reconfiguring a link
//! only affects later transfers. Delivery instants never decrease along one
//! link, so delay and throttling never reorder messages.

use crate::keys::DeterministicKeyProvider;
use crate::sync::{lock, read, write};
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use tricat_env::{EnvError, LinkOptions, NetworkController, Payload, PeerId, Transport};

/// Construction-time network parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Options of every link that has no explicit override.
    pub default_link: LinkOptions,

    /// Messages queued on one link before `send` waits.
    pub link_buffer: usize,

    /// Messages queued in one peer's inbox before delivery waits.
    pub inbox_buffer: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            default_link: LinkOptions::unlimited(),
            link_buffer: 1024,
            inbox_buffer: 1024,
        }
    }
}

/// Messages and bytes delivered over one directed link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Traffic {
    pub messages: u64,
    pub bytes: u64,
}

#[derive(Default)]
struct LinkCounters {
    messages: AtomicU64,
    bytes: AtomicU64,
}

impl LinkCounters {
    fn record(&self, bytes: usize) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Traffic {
        Traffic {
            messages: self.messages.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Which directed links exist and how they are shaped.
#[derive(Debug)]
struct Topology {
    default: LinkOptions,
    linked: HashSet<(PeerId, PeerId)>,
    overrides: BTreeMap<(PeerId, PeerId), LinkOptions>,
}

impl Topology {
    fn fully_connected(peers: &[PeerId], default: LinkOptions) -> Self {
        let mut linked = HashSet::new();
        for a in peers {
            for b in peers {
                if a != b {
                    linked.insert((*a, *b));
                }
            }
        }
        Self {
            default,
            linked,
            overrides: BTreeMap::new(),
        }
    }

    fn is_linked(&self, from: PeerId, to: PeerId) -> bool {
        self.linked.contains(&(from, to))
    }

    fn options(&self, from: PeerId, to: PeerId) -> Option<LinkOptions> {
        if !self.is_linked(from, to) {
            return None;
        }
        Some(self.overrides.get(&(from, to)).copied().unwrap_or(self.default))
    }
}

/// A message in flight, with the link options it was sent under.
struct Envelope<M> {
    from: PeerId,
    message: M,
    size: usize,
    options: LinkOptions,
}

struct Shared<M> {
    peers: Vec<PeerId>,
    index: HashMap<PeerId, usize>,
    config: NetworkConfig,
    topology: RwLock<Topology>,
    inboxes: Vec<mpsc::Sender<(PeerId, M)>>,
    endpoints: Vec<CancellationToken>,
    pumps: Mutex<HashMap<(PeerId, PeerId), mpsc::Sender<Envelope<M>>>>,
    traffic: Mutex<HashMap<(PeerId, PeerId), Arc<LinkCounters>>>,
    shutdown: CancellationToken,
}

impl<M: Payload> Shared<M> {
    fn ensure_open(&self) -> Result<(), EnvError> {
        if self.shutdown.is_cancelled() {
            Err(EnvError::Closed)
        } else {
            Ok(())
        }
    }

    fn position(&self, peer: PeerId) -> Result<usize, EnvError> {
        self.index
            .get(&peer)
            .copied()
            .ok_or(EnvError::UnknownPeer(peer))
    }

    fn counters(&self, from: PeerId, to: PeerId) -> Arc<LinkCounters> {
        Arc::clone(lock(&self.traffic).entry((from, to)).or_default())
    }

    /// Returns the queue of the `from -> to` pump, starting the pump on first use.
    fn pump(&self, from: PeerId, to: PeerId) -> Result<mpsc::Sender<Envelope<M>>, EnvError> {
        let target = self.position(to)?;
        let mut pumps = lock(&self.pumps);
        if let Some(queue) = pumps.get(&(from, to)) {
            return Ok(queue.clone());
        }

        let (queue, pending) = mpsc::channel(self.config.link_buffer.max(1));
        let link = LinkPump {
            from,
            to,
            inbox: self.inboxes[target].clone(),
            receiver_closed: self.endpoints[target].clone(),
            counters: self.counters(from, to),
            shutdown: self.shutdown.clone(),
        };
        tokio::spawn(link.run(pending));
        pumps.insert((from, to), queue.clone());
        Ok(queue)
    }
}

/// Moves messages across one directed link.
struct LinkPump<M> {
    from: PeerId,
    to: PeerId,
    inbox: mpsc::Sender<(PeerId, M)>,
    receiver_closed: CancellationToken,
    counters: Arc<LinkCounters>,
    shutdown: CancellationToken,
}

impl<M: Payload> LinkPump<M> {
    async fn run(self, mut pending: mpsc::Receiver<Envelope<M>>) {
        debug!("Link {} -> {} up", self.from, self.to);
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let propagate = tokio::spawn(Self::propagate(
            ready_rx,
            self.inbox,
            self.receiver_closed,
            self.counters,
            self.shutdown.clone(),
        ));

        let mut last_delivery = Instant::now();
        loop {
            let envelope = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                envelope = pending.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            let started = Instant::now();
            let transmit = envelope.options.transmit_time(envelope.size);
            if !transmit.is_zero() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(transmit) => {}
                }
            }

            let deliver_at = last_delivery.max(started + envelope.options.transfer_time(envelope.size));
            last_delivery = deliver_at;
            if ready_tx.send((deliver_at, envelope)).is_err() {
                break;
            }
        }

        drop(ready_tx);
        let _ = propagate.await;
        debug!("Link {} -> {} down", self.from, self.to);
    }

    async fn propagate(
        mut ready: mpsc::UnboundedReceiver<(Instant, Envelope<M>)>,
        inbox: mpsc::Sender<(PeerId, M)>,
        receiver_closed: CancellationToken,
        counters: Arc<LinkCounters>,
        shutdown: CancellationToken,
    ) {
        loop {
            let (deliver_at, envelope) = tokio::select! {
                _ = shutdown.cancelled() => return,
                next = ready.recv() => match next {
                    Some(next) => next,
                    None => return,
                },
            };

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep_until(deliver_at) => {}
            }

            let Envelope {
                from,
                message,
                size,
                ..
            } = envelope;
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = receiver_closed.cancelled() => {
                    trace!("Dropping message from {}: receiver closed", from);
                }
                delivered = inbox.send((from, message)) => {
                    if delivered.is_err() {
                        return;
                    }
                    counters.record(size);
                }
            }
        }
    }
}

/// Virtual network fabric for `M` messages.
///
/// Owns a fixed, ordered set of virtual peers (creation order = peer index)
/// and the links between them. Starts fully connected with zero-cost links
/// unless configured otherwise.
pub struct NetworkSimulator<M: Payload> {
    shared: Arc<Shared<M>>,
    keys: Vec<SigningKey>,
    endpoints: Mutex<Vec<Option<SimTransport<M>>>>,
}

impl<M: Payload> NetworkSimulator<M> {
    /// Creates `count` peers with seed 0 and default options.
    pub fn new(count: usize) -> Result<Self, EnvError> {
        Self::with_config(count, 0, NetworkConfig::default())
    }

    /// Creates `count` peers whose identities derive from `seed`.
    ///
    /// Fails without creating anything if `count` is zero or if two peers
    /// would share an identity.
    pub fn with_config(count: usize, seed: u64, config: NetworkConfig) -> Result<Self, EnvError> {
        if count == 0 {
            return Err(EnvError::InvalidPeerCount(count));
        }

        let keys = DeterministicKeyProvider::new(seed).generate_peer_keys(count);
        let peers: Vec<PeerId> = keys.iter().map(PeerId::from_signing_key).collect();

        let mut index = HashMap::with_capacity(count);
        for (i, peer) in peers.iter().enumerate() {
            if index.insert(*peer, i).is_some() {
                return Err(EnvError::DuplicateIdentity(*peer));
            }
        }

        let shutdown = CancellationToken::new();
        let mut inboxes = Vec::with_capacity(count);
        let mut receivers = Vec::with_capacity(count);
        for _ in 0..count {
            let (tx, rx) = mpsc::channel(config.inbox_buffer.max(1));
            inboxes.push(tx);
            receivers.push(rx);
        }
        let endpoints: Vec<CancellationToken> = (0..count).map(|_| shutdown.child_token()).collect();

        let shared = Arc::new(Shared {
            topology: RwLock::new(Topology::fully_connected(&peers, config.default_link)),
            peers,
            index,
            config,
            inboxes,
            endpoints,
            pumps: Mutex::new(HashMap::new()),
            traffic: Mutex::new(HashMap::new()),
            shutdown,
        });

        let transports = receivers
            .into_iter()
            .enumerate()
            .map(|(i, rx)| {
                Some(SimTransport {
                    id: shared.peers[i],
                    shared: Arc::clone(&shared),
                    inbox: tokio::sync::Mutex::new(rx),
                    closed: shared.endpoints[i].clone(),
                })
            })
            .collect();

        info!("Network simulator created with {} peers (seed={})", count, seed);
        Ok(Self {
            shared,
            keys,
            endpoints: Mutex::new(transports),
        })
    }

    /// Peer identities in creation order.
    pub fn peers(&self) -> Result<&[PeerId], EnvError> {
        self.shared.ensure_open()?;
        Ok(&self.shared.peers)
    }

    pub fn peer(&self, index: usize) -> Result<PeerId, EnvError> {
        self.shared.ensure_open()?;
        self.shared
            .peers
            .get(index)
            .copied()
            .ok_or(EnvError::PeerIndexOutOfRange {
                index,
                count: self.peer_count(),
            })
    }

    pub fn peer_count(&self) -> usize {
        self.shared.peers.len()
    }

    /// The signing key behind peer `index`'s identity.
    pub fn signing_key(&self, index: usize) -> Result<SigningKey, EnvError> {
        self.shared.ensure_open()?;
        self.keys
            .get(index)
            .cloned()
            .ok_or(EnvError::PeerIndexOutOfRange {
                index,
                count: self.peer_count(),
            })
    }

    /// Hands out peer `index`'s endpoint. Each endpoint can be taken once.
    pub fn transport(&self, index: usize) -> Result<SimTransport<M>, EnvError> {
        self.shared.ensure_open()?;
        let count = self.peer_count();
        let mut endpoints = lock(&self.endpoints);
        let slot = endpoints
            .get_mut(index)
            .ok_or(EnvError::PeerIndexOutOfRange { index, count })?;
        slot.take().ok_or(EnvError::PeerAlreadyBound(index))
    }

    /// Messages and bytes delivered so far over `from -> to`.
    pub fn traffic(&self, from: PeerId, to: PeerId) -> Traffic {
        lock(&self.shared.traffic)
            .get(&(from, to))
            .map(|counters| counters.snapshot())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Releases every peer and link. Idempotent.
    ///
    /// Pumps stop, endpoints report closed and every later operation fails
    /// with [`EnvError::Closed`].
    pub fn close(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        self.shared.shutdown.cancel();
        lock(&self.shared.pumps).clear();
        lock(&self.endpoints).clear();
        info!("Network simulator closed");
    }

    fn check_pair(&self, a: PeerId, b: PeerId) -> Result<(), EnvError> {
        self.shared.ensure_open()?;
        self.shared.position(a)?;
        self.shared.position(b)?;
        if a == b {
            return Err(EnvError::LinkingSelf(a));
        }
        Ok(())
    }
}

impl<M: Payload> Drop for NetworkSimulator<M> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<M: Payload> NetworkController for NetworkSimulator<M> {
    fn set_default_link_options(&self, options: LinkOptions) -> Result<(), EnvError> {
        self.shared.ensure_open()?;
        write(&self.shared.topology).default = options;
        debug!("Default link options: {:?}", options);
        Ok(())
    }

    fn set_link_options(&self, a: PeerId, b: PeerId, options: LinkOptions) -> Result<(), EnvError> {
        self.check_pair(a, b)?;
        let mut topology = write(&self.shared.topology);
        topology.overrides.insert((a, b), options);
        topology.overrides.insert((b, a), options);
        Ok(())
    }

    fn set_directed_link_options(
        &self,
        from: PeerId,
        to: PeerId,
        options: LinkOptions,
    ) -> Result<(), EnvError> {
        self.check_pair(from, to)?;
        write(&self.shared.topology).overrides.insert((from, to), options);
        Ok(())
    }

    fn link_options(&self, from: PeerId, to: PeerId) -> Result<Option<LinkOptions>, EnvError> {
        self.check_pair(from, to)?;
        Ok(read(&self.shared.topology).options(from, to))
    }

    fn link(&self, a: PeerId, b: PeerId) -> Result<(), EnvError> {
        self.check_pair(a, b)?;
        let mut topology = write(&self.shared.topology);
        topology.linked.insert((a, b));
        topology.linked.insert((b, a));
        Ok(())
    }

    fn unlink(&self, a: PeerId, b: PeerId) -> Result<(), EnvError> {
        self.check_pair(a, b)?;
        let mut topology = write(&self.shared.topology);
        topology.linked.remove(&(a, b));
        topology.linked.remove(&(b, a));
        Ok(())
    }
}

/// One virtual peer's endpoint.
pub struct SimTransport<M: Payload> {
    id: PeerId,
    shared: Arc<Shared<M>>,
    inbox: tokio::sync::Mutex<mpsc::Receiver<(PeerId, M)>>,
    closed: CancellationToken,
}

#[async_trait]
impl<M: Payload> Transport for SimTransport<M> {
    type Message = M;

    async fn send(&self, target: PeerId, message: M) -> Result<(), EnvError> {
        if self.closed.is_cancelled() {
            return Err(EnvError::Closed);
        }
        let position = self.shared.position(target)?;
        if self.shared.endpoints[position].is_cancelled() {
            return Err(EnvError::PeerClosed(target));
        }

        let options = read(&self.shared.topology)
            .options(self.id, target)
            .ok_or(EnvError::no_link(self.id, target))?;
        let queue = self.shared.pump(self.id, target)?;

        let envelope = Envelope {
            from: self.id,
            size: message.wire_size(),
            message,
            options,
        };
        tokio::select! {
            _ = self.closed.cancelled() => Err(EnvError::Closed),
            queued = queue.send(envelope) => queued.map_err(|_| EnvError::Closed),
        }
    }

    async fn recv(&self) -> Option<(PeerId, M)> {
        tokio::select! {
            _ = self.closed.cancelled() => None,
            next = async { self.inbox.lock().await.recv().await } => next,
        }
    }

    fn is_linked(&self, target: PeerId) -> Result<bool, EnvError> {
        if self.closed.is_cancelled() {
            return Err(EnvError::Closed);
        }
        Ok(read(&self.shared.topology).is_linked(self.id, target))
    }

    fn local_id(&self) -> PeerId {
        self.id
    }

    fn close(&self) {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            debug!("Peer {} closed", self.id);
        }
    }
}
