//! Core environment context trait for tricat nodes.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// The central interface for environment interaction.
///
/// Node logic never touches the clock, the scheduler or an entropy source
/// directly; it goes through this trait so the same code runs against a
/// real runtime or a simulated one.
///
/// # Determinism
///
/// For simulation, every method that would normally introduce
/// non-determinism (time, scheduling) is controlled by the implementation.
#[async_trait]
pub trait NodeContext: Send + Sync + 'static {
    /// Returns the monotonic time elapsed since context creation.
    ///
    /// In simulation, this is the virtual clock.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// Latency injection (storage, routing) is expressed entirely through
    /// this call, so a paused virtual clock makes delays free in wall time.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// The name is only used for tracing.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
