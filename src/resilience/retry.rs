//! Retry policy
//!
//! Computes a backoff delay per attempt and drives re-invocation of a
//! fallible async action. The delay law is pure and unit-tested
//! independently of the execution loop so the "retry delay law" and
//! "Fibonacci law" testable properties can be checked directly.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ConduitError, ConduitResult};
use crate::time::SharedClock;

/// Backoff shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// No retries
    None,
    /// Retry immediately with zero delay
    Immediate,
    /// Constant delay every attempt
    FixedDelay,
    /// Delay grows linearly with attempt number
    LinearBackoff,
    /// Delay grows geometrically with attempt number
    ExponentialBackoff,
    /// Delay follows the Fibonacci sequence
    Fibonacci,
}

/// Retry policy parameters
#[derive(Clone)]
pub struct RetryConfig {
    /// Backoff shape
    pub strategy: Strategy,
    /// Maximum number of retry attempts after the initial call
    pub max_retries: u32,
    /// Base delay used by every strategy
    pub initial_delay: Duration,
    /// Delay is capped at this value after jitter is applied
    pub max_delay: Duration,
    /// Multiplier used by `ExponentialBackoff`
    pub backoff_multiplier: f64,
    /// Fractional jitter applied as ±`jitter_factor` of the computed delay
    pub jitter_factor: f64,
    /// Overrides the default non-retryable classification
    pub retryable_predicate: Option<Arc<dyn Fn(&ConduitError) -> bool + Send + Sync>>,
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("strategy", &self.strategy)
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter_factor", &self.jitter_factor)
            .field(
                "retryable_predicate",
                &self.retryable_predicate.as_ref().map(|_| "Fn(&ConduitError) -> bool"),
            )
            .finish()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::ExponentialBackoff,
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            retryable_predicate: None,
        }
    }
}

impl RetryConfig {
    /// Whether `error` should be retried
    ///
    /// Errors that represent the host being in an abnormal state
    /// (cancellation, resource exhaustion) are never retried by default,
    /// even with a custom predicate override, since retrying them cannot
    /// plausibly succeed and conflicts with the critical-error
    /// short-circuit in the propagation policy.
    #[must_use]
    pub fn is_retryable(&self, error: &ConduitError) -> bool {
        if matches!(error, ConduitError::Cancelled | ConduitError::ResourceExhausted(_)) {
            return false;
        }
        if let Some(predicate) = &self.retryable_predicate {
            return predicate(error);
        }
        matches!(
            error,
            ConduitError::Timeout(_) | ConduitError::Network(_) | ConduitError::Io(_)
        )
    }

    /// Computes the base delay (before jitter) for 1-indexed attempt `n`
    ///
    /// Zero for attempts `<= 0` or `> max_retries`, per the retry delay law.
    #[must_use]
    pub fn base_delay(&self, attempt: i64) -> Duration {
        if attempt <= 0 || attempt as u64 > u64::from(self.max_retries) {
            return Duration::ZERO;
        }
        let millis = match self.strategy {
            Strategy::None => 0.0,
            Strategy::Immediate => 0.0,
            Strategy::FixedDelay => self.initial_delay.as_secs_f64() * 1000.0,
            Strategy::LinearBackoff => self.initial_delay.as_secs_f64() * 1000.0 * attempt as f64,
            Strategy::ExponentialBackoff => {
                self.initial_delay.as_secs_f64() * 1000.0 * self.backoff_multiplier.powi(attempt as i32 - 1)
            }
            Strategy::Fibonacci => self.initial_delay.as_secs_f64() * 1000.0 * fibonacci(attempt as u64) as f64,
        };
        Duration::from_millis(millis.min(self.max_delay.as_millis() as f64) as u64)
    }

    /// Computes the delay for attempt `n`, applying the configured jitter
    /// and capping at `max_delay`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: i64) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }
        let mut rng = rand::thread_rng();
        let jitter: f64 = rng.gen_range(-self.jitter_factor..=self.jitter_factor);
        let jittered_millis = (base.as_millis() as f64) * (1.0 + jitter);
        let capped = jittered_millis.max(0.0).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// `fib(1) = fib(2) = 1`, matching "attempt 1 and 2 return `initialDelay × 1`"
fn fibonacci(n: u64) -> u64 {
    if n <= 2 {
        return 1;
    }
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 3..=n {
        let next = a + b;
        a = b;
        b = next;
    }
    b
}

/// Retry metrics exposed by `GetMetrics()`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryMetrics {
    /// Number of actions that succeeded without needing a retry
    pub successes_without_retry: u64,
    /// Number of actions that succeeded after at least one retry
    pub successes_after_retry: u64,
    /// Number of actions that exhausted all retries
    pub exhausted: u64,
    /// Total retry attempts made
    pub total_retry_attempts: u64,
}

/// Executes an action under a retry policy
pub struct RetryPolicy {
    config: RetryConfig,
    clock: SharedClock,
    metrics: std::sync::Mutex<RetryMetrics>,
}

impl RetryPolicy {
    /// Builds a retry policy
    #[must_use]
    pub fn new(config: RetryConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            metrics: std::sync::Mutex::new(RetryMetrics::default()),
        }
    }

    /// Runs `action` until it succeeds, a non-retryable error occurs, or
    /// retries are exhausted
    pub async fn execute<T, F, Fut>(&self, mut action: F) -> ConduitResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ConduitResult<T>>,
    {
        let mut attempt: i64 = 0;
        loop {
            match action().await {
                Ok(value) => {
                    let mut metrics = self.metrics.lock().unwrap();
                    if attempt == 0 {
                        metrics.successes_without_retry += 1;
                    } else {
                        metrics.successes_after_retry += 1;
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !self.config.is_retryable(&err) || attempt as u64 >= u64::from(self.config.max_retries)
                    {
                        self.metrics.lock().unwrap().exhausted += 1;
                        return Err(err);
                    }
                    attempt += 1;
                    self.metrics.lock().unwrap().total_retry_attempts += 1;
                    let delay = self.config.delay_for_attempt(attempt);
                    if !delay.is_zero() {
                        self.clock.sleep(delay).await;
                    }
                }
            }
        }
    }

    /// Current retry metrics
    #[must_use]
    pub fn metrics(&self) -> RetryMetrics {
        self.metrics.lock().unwrap().clone()
    }

    /// Resets accumulated metrics
    pub fn reset(&self) {
        *self.metrics.lock().unwrap() = RetryMetrics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SystemClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn exponential_backoff_delay_law() {
        let config = RetryConfig {
            strategy: Strategy::ExponentialBackoff,
            max_retries: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            retryable_predicate: None,
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(20));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(40));
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(6), Duration::ZERO);
    }

    #[test]
    fn fibonacci_delay_law() {
        let config = RetryConfig {
            strategy: Strategy::Fibonacci,
            max_retries: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            retryable_predicate: None,
        };
        let expected = [1, 1, 2, 3, 5];
        for (i, factor) in expected.iter().enumerate() {
            let attempt = (i + 1) as i64;
            assert_eq!(
                config.delay_for_attempt(attempt),
                Duration::from_millis(10 * factor)
            );
        }
    }

    #[test]
    fn delay_capped_at_max_delay() {
        let config = RetryConfig {
            strategy: Strategy::ExponentialBackoff,
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(150),
            backoff_multiplier: 3.0,
            jitter_factor: 0.0,
            retryable_predicate: None,
        };
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(150));
    }

    #[tokio::test]
    async fn retry_then_success_counts_two_retries() {
        let config = RetryConfig {
            strategy: Strategy::ExponentialBackoff,
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            retryable_predicate: None,
        };
        let policy = RetryPolicy::new(config, Arc::new(SystemClock));
        let calls = AtomicU32::new(0);
        let result = policy
            .execute(|| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(ConduitError::Timeout("slow".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(policy.metrics().total_retry_attempts, 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let config = RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        let policy = RetryPolicy::new(config, Arc::new(SystemClock));
        let result: ConduitResult<()> = policy
            .execute(|| async { Err(ConduitError::Timeout("slow".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(policy.metrics().exhausted, 1);
    }

    #[test]
    fn validation_errors_are_never_retryable() {
        let config = RetryConfig::default();
        assert!(!config.is_retryable(&ConduitError::Validation("bad".into())));
    }
}
