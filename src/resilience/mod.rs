//! Resilience: retry, fallback, circuit breaking, compensating actions,
//! error aggregation and health monitoring.

pub mod circuit_breaker;
pub mod compensating;
pub mod error_aggregator;
pub mod fallback;
pub mod health_monitor;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
pub use compensating::{
    CompensatingActionPolicy, CompensatingConfig, CompensatingStep, CompensationFailure,
};
pub use error_aggregator::{
    AggregatorThresholds, ErrorAggregator, ErrorAnalysis, ErrorCorrelation, RetentionPolicy,
};
pub use fallback::{FallbackAction, FallbackConfig, FallbackFailure, FallbackMetrics, FallbackPolicy};
pub use health_monitor::{
    AggregatorHealthSource, HealthComponents, HealthInputSource, HealthInputs, HealthMonitor,
    HealthSnapshot, HealthStatus, HealthThresholds,
};
pub use retry::{RetryConfig, RetryMetrics, RetryPolicy, Strategy};
