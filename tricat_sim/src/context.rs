//! Simulation context implementing `NodeContext` on tokio's clock.
//!
//! Under a paused runtime (`start_paused`, or the CLI's runtime) tokio's
//! clock is virtual: it jumps straight to the next timer whenever every
//! task is idle, so simulated delays cost no wall-clock time.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;
use tricat_env::NodeContext;

/// Simulation context backed by tokio time.
#[derive(Debug, Clone)]
pub struct SimContext {
    /// Virtual time zero
    start: Instant,
}

impl SimContext {
    /// Creates a context whose clock starts now.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for SimContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeContext for SimContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = tracing::debug_span!("task", name = %name);
        tokio::spawn(future.instrument(span));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sim_context_time() {
        let ctx = SimContext::new();
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.sleep(Duration::from_secs(1)).await;
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.sleep(Duration::from_millis(500)).await;
        assert_eq!(ctx.now(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_task_runs() {
        let ctx = SimContext::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        ctx.spawn("ping", async move {
            let _ = tx.send(5u8);
        });
        assert_eq!(rx.await.unwrap(), 5);
    }
}
