//! Health monitor
//!
//! Periodically probes the bus's resilience subsystems and blends their
//! signals into a single weighted score, exposing status transitions via
//! a registered callback as well as an on-demand check.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::flow_control::FlowControllerStats;
use crate::resilience::circuit_breaker::CircuitBreakerMetrics;
use crate::resilience::error_aggregator::ErrorAggregator;
use crate::resilience::fallback::FallbackMetrics;
use crate::resilience::retry::RetryMetrics;

/// Overall health status, ordered worst-to-best is `Critical < Unhealthy < Degraded < Healthy`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Score at or above the healthy threshold
    Healthy,
    /// Score below healthy but above unhealthy
    Degraded,
    /// Score below degraded but above critical
    Unhealthy,
    /// Score at or below the critical threshold
    Critical,
}

impl HealthStatus {
    fn from_score(score: f64, thresholds: HealthThresholds) -> Self {
        if score >= thresholds.healthy {
            HealthStatus::Healthy
        } else if score >= thresholds.degraded {
            HealthStatus::Degraded
        } else if score >= thresholds.unhealthy {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Critical
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
            HealthStatus::Critical => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::Degraded,
            2 => HealthStatus::Unhealthy,
            _ => HealthStatus::Critical,
        }
    }
}

/// Score cutoffs for each status boundary
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Minimum score to be considered `Healthy`
    pub healthy: f64,
    /// Minimum score to be considered `Degraded` rather than `Unhealthy`
    pub degraded: f64,
    /// Minimum score to be considered `Unhealthy` rather than `Critical`
    pub unhealthy: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            healthy: 0.85,
            degraded: 0.6,
            unhealthy: 0.35,
        }
    }
}

/// Inputs the health monitor blends into one score
#[derive(Debug, Clone, Default)]
pub struct HealthInputs {
    /// Fraction of recent dispatches that failed, in `[0, 1]`
    pub error_rate: f64,
    /// Fraction of recent errors flagged critical, in `[0, 1]`
    pub critical_rate: f64,
    /// Circuit breaker metrics across all tracked breakers
    pub circuit_breaker: CircuitBreakerMetrics,
    /// Retry policy metrics across all tracked policies
    pub retry: RetryMetrics,
    /// Fallback policy metrics across all tracked policies
    pub fallback: FallbackMetrics,
    /// Flow controller admission statistics
    pub flow_control: FlowControllerStats,
}

/// Point-in-time health reading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Blended weighted score in `[0, 1]`
    pub score: f64,
    /// Status derived from `score` against the configured thresholds
    pub status: HealthStatus,
    /// Individual weighted contributions, for diagnosability
    pub components: HealthComponents,
}

/// Weighted sub-scores that sum to `score`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthComponents {
    /// `0.3 * (1 - error_rate)`
    pub error_rate: f64,
    /// `0.25 * (1 - critical_rate)`
    pub critical_rate: f64,
    /// `0.15 * circuit_breaker_health`
    pub circuit_breaker: f64,
    /// `0.10 * retry_effectiveness`
    pub retry_effectiveness: f64,
    /// `0.10 * fallback_effectiveness`
    pub fallback_effectiveness: f64,
    /// `0.10 * performance` (flow controller headroom)
    pub performance: f64,
}

fn circuit_breaker_health(metrics: &CircuitBreakerMetrics) -> f64 {
    let total = metrics.successes + metrics.failures;
    if total == 0 {
        1.0
    } else {
        metrics.successes as f64 / total as f64
    }
}

fn retry_effectiveness(metrics: &RetryMetrics) -> f64 {
    let attempts = metrics.successes_after_retry + metrics.exhausted;
    if attempts == 0 {
        1.0
    } else {
        metrics.successes_after_retry as f64 / attempts as f64
    }
}

fn fallback_effectiveness(metrics: &FallbackMetrics) -> f64 {
    if metrics.fallback_invocations == 0 {
        1.0
    } else {
        let succeeded = metrics.fallback_invocations - metrics.fallback_failures;
        succeeded as f64 / metrics.fallback_invocations as f64
    }
}

fn performance(stats: &FlowControllerStats) -> f64 {
    if stats.is_healthy {
        1.0
    } else {
        0.0
    }
}

/// Computes the weighted score described by the health formula
#[must_use]
pub fn score(inputs: &HealthInputs) -> HealthComponents {
    HealthComponents {
        error_rate: 0.30 * (1.0 - inputs.error_rate.clamp(0.0, 1.0)),
        critical_rate: 0.25 * (1.0 - inputs.critical_rate.clamp(0.0, 1.0)),
        circuit_breaker: 0.15 * circuit_breaker_health(&inputs.circuit_breaker),
        retry_effectiveness: 0.10 * retry_effectiveness(&inputs.retry),
        fallback_effectiveness: 0.10 * fallback_effectiveness(&inputs.fallback),
        performance: 0.10 * performance(&inputs.flow_control),
    }
}

impl HealthComponents {
    /// Sums the weighted sub-scores into the final `[0, 1]` score
    #[must_use]
    pub fn total(&self) -> f64 {
        self.error_rate
            + self.critical_rate
            + self.circuit_breaker
            + self.retry_effectiveness
            + self.fallback_effectiveness
            + self.performance
    }
}

type StatusCallback = Arc<dyn Fn(HealthStatus, HealthStatus) + Send + Sync>;

/// Scheduled health probe over a source of [`HealthInputs`]
pub struct HealthMonitor<S> {
    source: S,
    thresholds: HealthThresholds,
    current: AtomicU8,
    on_status_changed: std::sync::RwLock<Vec<StatusCallback>>,
}

/// Supplies the raw signals the health monitor blends
pub trait HealthInputSource: Send + Sync {
    /// Reads current resilience metrics
    fn inputs(&self) -> HealthInputs;
}

impl<S: HealthInputSource> HealthMonitor<S> {
    /// Builds a health monitor over `source`, starting `Healthy`
    #[must_use]
    pub fn new(source: S, thresholds: HealthThresholds) -> Self {
        Self {
            source,
            thresholds,
            current: AtomicU8::new(HealthStatus::Healthy.as_u8()),
            on_status_changed: std::sync::RwLock::new(Vec::new()),
        }
    }

    /// Registers a callback fired whenever the status actually changes
    pub fn on_status_changed(&self, callback: StatusCallback) {
        self.on_status_changed.write().unwrap().push(callback);
    }

    /// Runs an on-demand probe, updating and returning the current snapshot
    pub fn check_health(&self) -> HealthSnapshot {
        let inputs = self.source.inputs();
        let components = score(&inputs);
        let total = components.total();
        let status = HealthStatus::from_score(total, self.thresholds);
        let previous = HealthStatus::from_u8(self.current.swap(status.as_u8(), Ordering::AcqRel));
        if previous != status {
            for callback in self.on_status_changed.read().unwrap().iter() {
                callback(previous, status);
            }
        }
        HealthSnapshot {
            score: total,
            status,
            components,
        }
    }

    /// Last status recorded by a probe, without re-probing
    #[must_use]
    pub fn current_status(&self) -> HealthStatus {
        HealthStatus::from_u8(self.current.load(Ordering::Acquire))
    }
}

impl<S: HealthInputSource + Send + Sync + 'static> HealthMonitor<S> {
    /// Spawns a background task that probes on a fixed interval until dropped
    #[must_use]
    pub fn spawn_probe_loop(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.check_health();
            }
        })
    }
}

/// Adapts an [`ErrorAggregator`] plus a fixed error/critical rate reading
/// into a [`HealthInputSource`]; the bus composes the full picture by
/// wiring this alongside circuit breaker, retry and fallback snapshots
pub struct AggregatorHealthSource {
    aggregator: Arc<ErrorAggregator>,
    window: Duration,
}

impl AggregatorHealthSource {
    /// Builds a source reading the aggregator's rolling analysis window
    #[must_use]
    pub fn new(aggregator: Arc<ErrorAggregator>, window: Duration) -> Self {
        Self { aggregator, window }
    }
}

impl HealthInputSource for AggregatorHealthSource {
    fn inputs(&self) -> HealthInputs {
        let analysis = self.aggregator.analyze_errors(self.window);
        let error_rate = if analysis.correlation_count == 0 {
            0.0
        } else {
            (analysis.total_errors as f64 / analysis.correlation_count as f64 / 10.0).min(1.0)
        };
        let critical_rate = if analysis.total_errors == 0 {
            0.0
        } else {
            analysis.critical_count as f64 / analysis.total_errors as f64
        };
        HealthInputs {
            error_rate,
            critical_rate,
            ..HealthInputs::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(HealthInputs);

    impl HealthInputSource for FixedSource {
        fn inputs(&self) -> HealthInputs {
            self.0.clone()
        }
    }

    #[test]
    fn all_zero_error_rates_score_healthy() {
        let monitor = HealthMonitor::new(FixedSource(HealthInputs::default()), HealthThresholds::default());
        let snapshot = monitor.check_health();
        assert_eq!(snapshot.status, HealthStatus::Healthy);
        assert!((snapshot.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn high_error_rate_degrades_status() {
        let inputs = HealthInputs {
            error_rate: 0.9,
            critical_rate: 0.9,
            ..HealthInputs::default()
        };
        let monitor = HealthMonitor::new(FixedSource(inputs), HealthThresholds::default());
        let snapshot = monitor.check_health();
        assert_ne!(snapshot.status, HealthStatus::Healthy);
    }

    #[test]
    fn status_change_callback_fires_on_transition() {
        let monitor = Arc::new(HealthMonitor::new(
            FixedSource(HealthInputs::default()),
            HealthThresholds::default(),
        ));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        monitor.on_status_changed(Arc::new(move |from, to| {
            seen_clone.lock().unwrap().push((from, to));
        }));
        monitor.check_health();
        assert!(seen.lock().unwrap().is_empty());
    }
}
