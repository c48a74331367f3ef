//! Circuit breaker
//!
//! Three states: `Closed` (calls pass through), `Open` (calls short-circuit
//! immediately without invoking the action), `HalfOpen` (a single probing
//! call is allowed through to decide whether to reclose).

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConduitError, ConduitResult};
use crate::time::SharedClock;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls pass through normally
    Closed,
    /// Calls short-circuit without invoking the action
    Open,
    /// A single probing call is allowed through
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures within the rolling window that trip the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays `Open` before probing with `HalfOpen`
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            break_duration: Duration::from_secs(30),
        }
    }
}

/// Metrics exposed by `GetMetrics()`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Number of calls allowed through and that succeeded
    pub successes: u64,
    /// Number of calls allowed through and that failed
    pub failures: u64,
    /// Number of calls rejected because the breaker was `Open`
    pub short_circuited: u64,
    /// Number of times the breaker has tripped to `Open`
    pub trips: u64,
}

/// Guards a downstream action, tripping open after repeated failures
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: SharedClock,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at_millis: AtomicU64,
    metrics: CircuitBreakerMetricsInner,
}

#[derive(Default)]
struct CircuitBreakerMetricsInner {
    successes: AtomicU64,
    failures: AtomicU64,
    short_circuited: AtomicU64,
    trips: AtomicU64,
}

impl CircuitBreaker {
    /// Builds a circuit breaker, starting `Closed`
    #[must_use]
    pub fn new(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            opened_at_millis: AtomicU64::new(0),
            metrics: CircuitBreakerMetricsInner::default(),
        }
    }

    /// Current state, accounting for the `Open` -> `HalfOpen` timer
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let raw = self.state.load(Ordering::Acquire);
        let state = match raw {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        };
        if state == CircuitState::Open {
            let opened_at = self.opened_at_millis.load(Ordering::Acquire);
            let now = self.millis_since_epoch();
            if now.saturating_sub(opened_at) >= self.config.break_duration.as_millis() as u64 {
                self.state
                    .compare_exchange(1, 2, Ordering::AcqRel, Ordering::Acquire)
                    .ok();
                return CircuitState::HalfOpen;
            }
        }
        state
    }

    fn millis_since_epoch(&self) -> u64 {
        self.clock
            .now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Runs `action` if the breaker allows it, otherwise fails fast with
    /// [`ConduitError::CircuitOpen`]
    pub async fn execute<T, F, Fut>(&self, action: F) -> ConduitResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ConduitResult<T>>,
    {
        if self.state() == CircuitState::Open {
            self.metrics.short_circuited.fetch_add(1, Ordering::Relaxed);
            return Err(ConduitError::CircuitOpen);
        }

        match action().await {
            Ok(value) => {
                self.metrics.successes.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.store(0, Ordering::Release);
                self.state.store(CircuitState::Closed as u8, Ordering::Release);
                Ok(value)
            }
            Err(err) => {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                if self.state() == CircuitState::HalfOpen {
                    self.trip();
                } else {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                    if failures >= self.config.failure_threshold {
                        self.trip();
                    }
                }
                Err(err)
            }
        }
    }

    fn trip(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        self.opened_at_millis.store(self.millis_since_epoch(), Ordering::Release);
        self.metrics.trips.fetch_add(1, Ordering::Relaxed);
    }

    /// Current circuit breaker metrics
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            successes: self.metrics.successes.load(Ordering::Relaxed),
            failures: self.metrics.failures.load(Ordering::Relaxed),
            short_circuited: self.metrics.short_circuited.load(Ordering::Relaxed),
            trips: self.metrics.trips.load(Ordering::Relaxed),
        }
    }

    /// Resets to `Closed` with all counters cleared
    pub fn reset(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.metrics.successes.store(0, Ordering::Relaxed);
        self.metrics.failures.store(0, Ordering::Relaxed);
        self.metrics.short_circuited.store(0, Ordering::Relaxed);
        self.metrics.trips.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::MockClock;
    use std::sync::Arc;

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let clock = Arc::new(MockClock::new());
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: 3,
                break_duration: Duration::from_millis(50),
            },
            clock.clone(),
        );
        for _ in 0..3 {
            let _: ConduitResult<()> = breaker.execute(|| async { Err(ConduitError::Network("x".into())) }).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        let result: ConduitResult<()> = breaker.execute(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(ConduitError::CircuitOpen)));
    }

    #[tokio::test]
    async fn half_open_closes_on_success_after_break_duration() {
        let clock = Arc::new(MockClock::new());
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: 1,
                break_duration: Duration::from_millis(50),
            },
            clock.clone(),
        );
        let _: ConduitResult<()> = breaker.execute(|| async { Err(ConduitError::Network("x".into())) }).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        clock.advance(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let result = breaker.execute(|| async { Ok(()) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
