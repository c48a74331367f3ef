//! Clock abstraction
//!
//! Every subsystem that measures elapsed time or schedules future work
//! (retry backoff, circuit-breaker timers, DLQ/correlator sweepers,
//! health-monitor probes) goes through a [`Clock`] instead of calling
//! `std::time`/`tokio::time` directly, so tests can advance time
//! deterministically instead of racing real sleeps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;

/// Source of truth for "now" and for sleeping, abstracted so tests can
/// substitute a [`MockClock`] that advances on command.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock instant, as a duration since the Unix epoch
    fn now(&self) -> SystemTime;

    /// Suspends the caller for `duration`, as observed by this clock
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Elapsed time since `earlier`, saturating to zero if `earlier` is in the future
    fn elapsed_since(&self, earlier: SystemTime) -> Duration {
        self.now().duration_since(earlier).unwrap_or(Duration::ZERO)
    }
}

/// Production clock backed by the system clock and the Tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Deterministic clock for tests: `now()` starts at the Unix epoch and only
/// advances when [`MockClock::advance`] is called; `sleep` resolves as soon
/// as enough time has been advanced past the requested duration.
#[derive(Debug, Clone)]
pub struct MockClock {
    millis_since_epoch: Arc<AtomicU64>,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    /// Creates a mock clock fixed at the Unix epoch
    #[must_use]
    pub fn new() -> Self {
        Self {
            millis_since_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advances the mock clock by `duration`
    pub fn advance(&self, duration: Duration) {
        self.millis_since_epoch
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.millis_since_epoch.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let clock = self.clone();
        let deadline = self.now() + duration;
        Box::pin(async move {
            while clock.now() < deadline {
                tokio::task::yield_now().await;
            }
        })
    }
}

/// Shared handle to a clock, cloned into every subsystem that needs one
pub type SharedClock = Arc<dyn Clock>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_clock_advances_on_command() {
        let clock = MockClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now().duration_since(start).unwrap(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn mock_clock_sleep_waits_for_advance() {
        let clock = MockClock::new();
        let sleeper = clock.clone();
        let handle = tokio::spawn(async move {
            sleeper.sleep(Duration::from_millis(100)).await;
        });
        tokio::task::yield_now().await;
        clock.advance(Duration::from_millis(100));
        handle.await.unwrap();
    }

    #[test]
    fn elapsed_since_saturates_to_zero() {
        let clock = MockClock::new();
        let future = clock.now() + Duration::from_secs(10);
        assert_eq!(clock.elapsed_since(future), Duration::ZERO);
    }
}
