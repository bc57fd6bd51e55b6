//! Test-only environment pieces: a tokio-backed context and an in-memory
//! transport pair without shaping.

use crate::message::Message;
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tricat_env::{EnvError, NodeContext, PeerId, Transport};

pub(crate) struct TestContext {
    seed: u64,
    start: Instant,
}

impl TestContext {
    pub(crate) fn new(seed: u64) -> Self {
        Self {
            seed,
            start: Instant::now(),
        }
    }

    /// Reproducible key for mesh member `index`.
    pub(crate) fn signing_key(&self, index: u64) -> SigningKey {
        SigningKey::generate(&mut ChaCha8Rng::seed_from_u64(self.seed ^ index))
    }
}

#[async_trait]
impl NodeContext for TestContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }
}

type Inboxes = Arc<Mutex<HashMap<PeerId, mpsc::UnboundedSender<(PeerId, Message)>>>>;

/// Unshaped, fully connected in-memory transport.
pub(crate) struct TestTransport {
    id: PeerId,
    inboxes: Inboxes,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(PeerId, Message)>>,
    closed: AtomicBool,
}

/// Builds `count` connected transports with their signing keys.
pub(crate) fn test_mesh(ctx: &TestContext, count: usize) -> Vec<(SigningKey, TestTransport)> {
    let inboxes: Inboxes = Arc::default();
    (0..count as u64)
        .map(|i| {
            let key = ctx.signing_key(i);
            let id = PeerId::from_signing_key(&key);
            let (tx, rx) = mpsc::unbounded_channel();
            inboxes.lock().unwrap().insert(id, tx);
            let transport = TestTransport {
                id,
                inboxes: Arc::clone(&inboxes),
                rx: tokio::sync::Mutex::new(rx),
                closed: AtomicBool::new(false),
            };
            (key, transport)
        })
        .collect()
}

#[async_trait]
impl Transport for TestTransport {
    type Message = Message;

    async fn send(&self, target: PeerId, message: Message) -> Result<(), EnvError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EnvError::Closed);
        }
        let inboxes = self.inboxes.lock().unwrap();
        let inbox = inboxes
            .get(&target)
            .ok_or_else(|| EnvError::no_link(self.id, target))?;
        inbox.send((self.id, message)).map_err(|_| EnvError::Closed)
    }

    async fn recv(&self) -> Option<(PeerId, Message)> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.rx.lock().await.recv().await
    }

    fn is_linked(&self, target: PeerId) -> Result<bool, EnvError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EnvError::Closed);
        }
        Ok(target != self.id && self.inboxes.lock().unwrap().contains_key(&target))
    }

    fn local_id(&self) -> PeerId {
        self.id
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.inboxes.lock().unwrap().remove(&self.id);
        }
    }
}
