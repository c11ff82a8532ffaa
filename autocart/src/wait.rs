//! Condition waiting on top of an injectable clock.
//!
//! Every "wait until the page shows X" in the engine goes through
//! [`wait_for`]. Waiting yields to the runtime between polls, so other tasks
//! (status queries, stop requests) keep being served while a wait is pending.

use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Smallest poll cadence; a zero interval would spin.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Source of monotonic time and of cooperative sleeping
#[async_trait::async_trait]
pub trait Clock: Send + Sync + Debug {
    /// Time elapsed since the clock was created
    fn now(&self) -> Duration;
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `tokio::time`
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock: `sleep` advances time instantly and yields once.
///
/// Clones share the same timeline.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    elapsed_nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.elapsed_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Poll `predicate` until it returns `true` or `timeout` elapses.
///
/// The predicate runs immediately, then every `poll_interval`; the last
/// evaluation happens at the deadline. Returns `false` on timeout, which is
/// an ordinary outcome for callers to report, not an error.
pub async fn wait_for<F, Fut>(
    clock: &dyn Clock,
    timeout: Duration,
    poll_interval: Duration,
    mut predicate: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let interval = poll_interval.max(MIN_POLL_INTERVAL);
    let start = clock.now();
    let mut polls: u32 = 0;
    loop {
        polls += 1;
        if predicate().await {
            trace!(polls, "condition met");
            return true;
        }
        let elapsed = clock.now().saturating_sub(start);
        if elapsed >= timeout {
            trace!(polls, ?timeout, "condition not met before timeout");
            return false;
        }
        clock.sleep(interval.min(timeout - elapsed)).await;
    }
}
