//! Block storage with injectable access latency.

use crate::cid::ContentId;
use crate::sync::lock;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tricat_env::NodeContext;

/// Errors raised by a block store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store cannot hold another block.
    #[error("capacity exceeded: {used} + {requested} bytes over limit of {capacity}")]
    CapacityExceeded {
        used: u64,
        requested: u64,
        capacity: u64,
    },

    #[error("block store closed")]
    Closed,
}

/// Occupancy snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub blocks: usize,
    pub bytes: u64,
}

/// Local block storage keyed by content identifier.
#[async_trait]
pub trait BlockStore: Send + Sync + 'static {
    async fn get(&self, cid: &ContentId) -> Result<Option<Bytes>, StoreError>;

    /// Stores an encoded block. Storing a block twice is a no-op.
    async fn put(&self, cid: ContentId, block: Bytes) -> Result<(), StoreError>;

    /// Current occupancy. Not a store access; never delayed.
    fn stats(&self) -> StoreStats;

    /// Releases the stored blocks. Idempotent.
    fn close(&self);
}

/// In-memory block store with an optional byte capacity.
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: Mutex<HashMap<ContentId, Bytes>>,
    used: Mutex<u64>,
    capacity: Option<u64>,
    closed: AtomicBool,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that refuses blocks beyond `capacity` bytes.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn get(&self, cid: &ContentId) -> Result<Option<Bytes>, StoreError> {
        self.ensure_open()?;
        Ok(lock(&self.blocks).get(cid).cloned())
    }

    async fn put(&self, cid: ContentId, block: Bytes) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut blocks = lock(&self.blocks);
        if blocks.contains_key(&cid) {
            return Ok(());
        }

        let mut used = lock(&self.used);
        let requested = block.len() as u64;
        if let Some(capacity) = self.capacity {
            if *used + requested > capacity {
                return Err(StoreError::CapacityExceeded {
                    used: *used,
                    requested,
                    capacity,
                });
            }
        }
        *used += requested;
        blocks.insert(cid, block);
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            blocks: lock(&self.blocks).len(),
            bytes: *lock(&self.used),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        lock(&self.blocks).clear();
        *lock(&self.used) = 0;
    }
}

/// Wraps a store so every access first waits `delay` on the node's clock.
///
/// This is where a profile's `storage_delay` enters: `get` and `put` each
/// pay the delay once, before touching the inner store.
pub struct LatentStore<C, S> {
    context: Arc<C>,
    inner: S,
    delay: Duration,
}

impl<C: NodeContext, S: BlockStore> LatentStore<C, S> {
    pub fn new(context: Arc<C>, inner: S, delay: Duration) -> Self {
        Self {
            context,
            inner,
            delay,
        }
    }

    async fn access(&self) {
        if !self.delay.is_zero() {
            self.context.sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl<C: NodeContext, S: BlockStore> BlockStore for LatentStore<C, S> {
    async fn get(&self, cid: &ContentId) -> Result<Option<Bytes>, StoreError> {
        self.access().await;
        self.inner.get(cid).await
    }

    async fn put(&self, cid: ContentId, block: Bytes) -> Result<(), StoreError> {
        self.access().await;
        self.inner.put(cid, block).await
    }

    fn stats(&self) -> StoreStats {
        self.inner.stats()
    }

    fn close(&self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;
    use tokio::time::Instant;

    fn block(data: &'static [u8]) -> (ContentId, Bytes) {
        (ContentId::of(data), Bytes::from_static(data))
    }

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryBlockStore::new();
        let (cid, data) = block(b"hello");

        assert_eq!(store.get(&cid).await.unwrap(), None);
        store.put(cid, data.clone()).await.unwrap();
        assert_eq!(store.get(&cid).await.unwrap(), Some(data));
        assert_eq!(store.stats(), StoreStats { blocks: 1, bytes: 5 });
    }

    #[tokio::test]
    async fn test_duplicate_put_is_noop() {
        let store = MemoryBlockStore::with_capacity(5);
        let (cid, data) = block(b"hello");

        store.put(cid, data.clone()).await.unwrap();
        store.put(cid, data).await.unwrap();
        assert_eq!(store.stats().bytes, 5);
    }

    #[tokio::test]
    async fn test_capacity_exceeded() {
        let store = MemoryBlockStore::with_capacity(8);
        let (a, data_a) = block(b"hello");
        let (b, data_b) = block(b"world");

        store.put(a, data_a).await.unwrap();
        let err = store.put(b, data_b).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::CapacityExceeded {
                used: 5,
                requested: 5,
                capacity: 8
            }
        );
        assert_eq!(store.get(&b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_access() {
        let store = MemoryBlockStore::new();
        let (cid, data) = block(b"hello");
        store.put(cid, data).await.unwrap();

        store.close();
        store.close();

        assert_eq!(store.get(&cid).await, Err(StoreError::Closed));
        assert_eq!(store.stats(), StoreStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latent_store_delays_every_access() {
        let ctx = Arc::new(TestContext::new(1));
        let store = LatentStore::new(ctx, MemoryBlockStore::new(), Duration::from_millis(50));
        let (cid, data) = block(b"hello");

        let start = Instant::now();
        store.put(cid, data).await.unwrap();
        assert!(store.get(&cid).await.unwrap().is_some());
        assert!(store.get(&ContentId::of(b"absent")).await.unwrap().is_none());

        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_store_is_free() {
        let ctx = Arc::new(TestContext::new(1));
        let store = LatentStore::new(ctx, MemoryBlockStore::new(), Duration::ZERO);
        let (cid, data) = block(b"hello");

        let start = Instant::now();
        store.put(cid, data).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
