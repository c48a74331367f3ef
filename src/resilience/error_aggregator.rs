//! Error aggregator
//!
//! Process-wide state, constructed when the bus starts and disposed when
//! it stops (design note: "global static state -> process-wide state S").
//! Groups classified failures by correlation id, fires a one-shot
//! threshold notification per correlation, and sweeps correlations whose
//! last error has aged out of the retention window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Category, ErrorContext, Severity};
use crate::ids::{ComponentId, CorrelationId};
use crate::time::SharedClock;

/// Group of `ErrorContext`s sharing a correlation id
pub struct ErrorCorrelation {
    /// Instant the first error in this group was recorded
    pub start_time: SystemTime,
    /// Instant the most recent error in this group was recorded
    pub last_error_time: SystemTime,
    /// Every error recorded so far for this correlation
    pub errors: Vec<ErrorContext>,
    /// Highest severity seen across all errors in this group
    pub highest_severity: Severity,
    /// Components that have contributed an error to this group
    pub affected_components: Vec<ComponentId>,
    /// Whether any error in the group is flagged critical
    pub has_critical_errors: bool,
    /// Whether any error in the group is non-transient
    pub has_non_transient_errors: bool,
    /// Free-form tags accumulated across all errors
    pub tags: Vec<String>,
    threshold_notified: AtomicBool,
}

impl ErrorCorrelation {
    fn new(first: ErrorContext, now: SystemTime) -> Self {
        let highest_severity = first.severity;
        let has_critical_errors = first.is_critical;
        let has_non_transient_errors = !first.is_transient;
        let affected_components = first.component.into_iter().collect();
        let tags = first.tags.clone();
        Self {
            start_time: now,
            last_error_time: now,
            errors: vec![first],
            highest_severity,
            affected_components,
            has_critical_errors,
            has_non_transient_errors,
            tags,
            threshold_notified: AtomicBool::new(false),
        }
    }

    fn append(&mut self, error: ErrorContext, now: SystemTime) {
        self.last_error_time = now;
        self.highest_severity = self.highest_severity.max(error.severity);
        self.has_critical_errors |= error.is_critical;
        self.has_non_transient_errors |= !error.is_transient;
        if let Some(component) = error.component {
            if !self.affected_components.contains(&component) {
                self.affected_components.push(component);
            }
        }
        for tag in &error.tags {
            if !self.tags.contains(tag) {
                self.tags.push(tag.clone());
            }
        }
        self.errors.push(error);
    }

    /// Number of errors recorded so far
    #[must_use]
    pub fn count(&self) -> usize {
        self.errors.len()
    }
}

/// Thresholds that fire a one-shot notification per correlation
#[derive(Debug, Clone, Copy)]
pub struct AggregatorThresholds {
    /// Error count within a correlation that triggers notification
    pub error_count_threshold: usize,
    /// Time window within which `error_count_threshold` errors trigger notification
    pub time_window_threshold: Duration,
}

impl Default for AggregatorThresholds {
    fn default() -> Self {
        Self {
            error_count_threshold: 10,
            time_window_threshold: Duration::from_secs(60),
        }
    }
}

/// How long a correlation is retained after its last error
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Correlations whose `last_error_time` has aged past this are evicted by the sweeper
    pub retention_period: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_period: Duration::from_secs(3600),
        }
    }
}

/// Counts, by category, severity, component and top exception names, over a window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    /// Total errors observed in the analyzed window
    pub total_errors: usize,
    /// Errors grouped by category
    pub by_category: HashMap<String, usize>,
    /// Errors grouped by severity
    pub by_severity: HashMap<String, usize>,
    /// Errors grouped by originating component
    pub by_component: HashMap<String, usize>,
    /// Number of errors at `Critical` severity
    pub critical_count: usize,
    /// Number of correlations analyzed
    pub correlation_count: usize,
    /// Average number of errors per correlation
    pub average_errors_per_correlation: f64,
}

type ThresholdCallback = Arc<dyn Fn(CorrelationId) + Send + Sync>;

/// Process-wide error correlation store
pub struct ErrorAggregator {
    correlations: DashMap<CorrelationId, ErrorCorrelation>,
    thresholds: AggregatorThresholds,
    retention: RetentionPolicy,
    clock: SharedClock,
    on_threshold_exceeded: std::sync::RwLock<Vec<ThresholdCallback>>,
}

impl ErrorAggregator {
    /// Constructs the aggregator; call on bus start per the process-wide
    /// state's construct/dispose lifecycle
    #[must_use]
    pub fn new(thresholds: AggregatorThresholds, retention: RetentionPolicy, clock: SharedClock) -> Self {
        Self {
            correlations: DashMap::new(),
            thresholds,
            retention,
            clock,
            on_threshold_exceeded: std::sync::RwLock::new(Vec::new()),
        }
    }

    /// Registers a callback fired the first time a correlation crosses threshold
    pub fn on_threshold_exceeded(&self, callback: ThresholdCallback) {
        self.on_threshold_exceeded.write().unwrap().push(callback);
    }

    /// Appends a classified error to its correlation group, creating the
    /// group if this is the first error observed for it
    pub fn record_error(&self, error: ErrorContext) {
        let Some(correlation_id) = error.correlation_id else {
            return;
        };
        let now = self.clock.now();
        let crossed_threshold = {
            let mut entry = self
                .correlations
                .entry(correlation_id)
                .or_insert_with(|| ErrorCorrelation::new(error.clone(), now));
            if entry.count() > 0 && entry.errors.last().map(|e| e.error_id) != Some(error.error_id) {
                entry.append(error, now);
            }
            let within_window = now
                .duration_since(entry.start_time)
                .unwrap_or_default()
                <= self.thresholds.time_window_threshold;
            entry.count() >= self.thresholds.error_count_threshold
                && within_window
                && !entry.threshold_notified.swap(true, Ordering::AcqRel)
        };
        if crossed_threshold {
            for callback in self.on_threshold_exceeded.read().unwrap().iter() {
                callback(correlation_id);
            }
        }
    }

    /// Evicts correlations whose `last_error_time` has aged past the retention window
    pub fn sweep(&self) {
        let now = self.clock.now();
        self.correlations.retain(|_, correlation| {
            now.duration_since(correlation.last_error_time)
                .unwrap_or_default()
                < self.retention.retention_period
        });
    }

    /// Number of correlations currently tracked
    #[must_use]
    pub fn correlation_count(&self) -> usize {
        self.correlations.len()
    }

    /// Computes aggregate statistics over every tracked correlation whose
    /// most recent error falls within `window` of now
    #[must_use]
    pub fn analyze_errors(&self, window: Duration) -> ErrorAnalysis {
        let now = self.clock.now();
        let mut analysis = ErrorAnalysis::default();
        let mut correlation_count = 0;
        for entry in self.correlations.iter() {
            let correlation = entry.value();
            if now.duration_since(correlation.last_error_time).unwrap_or_default() > window {
                continue;
            }
            correlation_count += 1;
            for error in &correlation.errors {
                analysis.total_errors += 1;
                *analysis
                    .by_category
                    .entry(format!("{:?}", error.category))
                    .or_insert(0) += 1;
                *analysis
                    .by_severity
                    .entry(format!("{:?}", error.severity))
                    .or_insert(0) += 1;
                if let Some(component) = error.component {
                    *analysis.by_component.entry(component.to_string()).or_insert(0) += 1;
                }
                if error.severity == Severity::Critical {
                    analysis.critical_count += 1;
                }
            }
        }
        analysis.correlation_count = correlation_count;
        analysis.average_errors_per_correlation = if correlation_count > 0 {
            analysis.total_errors as f64 / correlation_count as f64
        } else {
            0.0
        };
        analysis
    }

    /// Classifies whether any tracked error in `category` exists; a small
    /// convenience the health monitor uses to weight its score
    #[must_use]
    pub fn has_category(&self, category: Category) -> bool {
        self.correlations
            .iter()
            .any(|entry| entry.value().errors.iter().any(|e| e.category == category))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::MockClock;
    use std::sync::atomic::AtomicUsize;

    fn error_for(correlation_id: CorrelationId) -> ErrorContext {
        ErrorContext::classify(&crate::error::ConduitError::Network("boom".into()))
            .with_correlation_id(correlation_id)
    }

    #[test]
    fn threshold_notification_fires_once() {
        let clock = Arc::new(MockClock::new());
        let aggregator = ErrorAggregator::new(
            AggregatorThresholds {
                error_count_threshold: 2,
                time_window_threshold: Duration::from_secs(60),
            },
            RetentionPolicy::default(),
            clock,
        );
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        aggregator.on_threshold_exceeded(Arc::new(move |_id| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let correlation = CorrelationId::generate();
        aggregator.record_error(error_for(correlation));
        aggregator.record_error(error_for(correlation));
        aggregator.record_error(error_for(correlation));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sweeper_evicts_stale_correlations() {
        let clock = Arc::new(MockClock::new());
        let aggregator = ErrorAggregator::new(
            AggregatorThresholds::default(),
            RetentionPolicy {
                retention_period: Duration::from_secs(10),
            },
            clock.clone(),
        );
        aggregator.record_error(error_for(CorrelationId::generate()));
        assert_eq!(aggregator.correlation_count(), 1);
        clock.advance(Duration::from_secs(20));
        aggregator.sweep();
        assert_eq!(aggregator.correlation_count(), 0);
    }

    #[test]
    fn analyze_errors_counts_by_category() {
        let clock = Arc::new(MockClock::new());
        let aggregator = ErrorAggregator::new(AggregatorThresholds::default(), RetentionPolicy::default(), clock);
        aggregator.record_error(error_for(CorrelationId::generate()));
        let analysis = aggregator.analyze_errors(Duration::from_secs(3600));
        assert_eq!(analysis.total_errors, 1);
        assert_eq!(analysis.by_category.get("Network"), Some(&1));
    }
}
