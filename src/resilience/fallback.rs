//! Fallback policy
//!
//! On a failure matching the fallback predicate (transient errors by
//! default), invokes a configured fallback action instead of surfacing the
//! original error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConduitError, ConduitResult, ErrorContext};

/// A fallback outcome: either run an alternate action or return a fixed value
pub enum FallbackAction<T> {
    /// Invoke an alternate async action with the original error as context
    Action(Arc<dyn Fn(&ConduitError) -> ConduitResult<T> + Send + Sync>),
    /// Always return this value
    Value(T),
}

/// Carries both the primary and fallback failures when both fail and
/// `throw_on_fallback_failure` is set
#[derive(Debug)]
pub struct FallbackFailure {
    /// The error from the primary action
    pub primary: ConduitError,
    /// The error from the fallback action
    pub fallback: ConduitError,
}

impl std::fmt::Display for FallbackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "primary action failed ({}) and fallback also failed ({})",
            self.primary, self.fallback
        )
    }
}

impl std::error::Error for FallbackFailure {}

/// Fallback policy configuration
pub struct FallbackConfig<T> {
    /// What to do when the primary action fails and the predicate matches
    pub action: FallbackAction<T>,
    /// Whether a failure is eligible for fallback; defaults to transient errors
    pub predicate: Arc<dyn Fn(&ConduitError) -> bool + Send + Sync>,
    /// If both primary and fallback fail, raise a [`FallbackFailure`]
    /// instead of rethrowing only the original cause
    pub throw_on_fallback_failure: bool,
}

impl<T> FallbackConfig<T> {
    /// Builds a fallback config defaulting to "transient errors only"
    #[must_use]
    pub fn new(action: FallbackAction<T>) -> Self {
        Self {
            action,
            predicate: Arc::new(|error| ErrorContext::classify(error).is_transient),
            throw_on_fallback_failure: false,
        }
    }
}

/// Metrics exposed by `GetMetrics()`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackMetrics {
    /// Number of times the primary action succeeded directly
    pub primary_successes: u64,
    /// Number of times the fallback action was invoked
    pub fallback_invocations: u64,
    /// Number of times the fallback action itself failed
    pub fallback_failures: u64,
}

/// Executes an action with a configured fallback
pub struct FallbackPolicy<T> {
    config: FallbackConfig<T>,
    metrics: std::sync::Mutex<FallbackMetrics>,
}

impl<T: Clone> FallbackPolicy<T> {
    /// Builds a fallback policy
    #[must_use]
    pub fn new(config: FallbackConfig<T>) -> Self {
        Self {
            config,
            metrics: std::sync::Mutex::new(FallbackMetrics::default()),
        }
    }

    /// Runs `action`, falling back on a matching failure
    pub async fn execute<F, Fut>(&self, action: F) -> ConduitResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ConduitResult<T>>,
    {
        match action().await {
            Ok(value) => {
                self.metrics.lock().unwrap().primary_successes += 1;
                Ok(value)
            }
            Err(primary_err) => {
                if !(self.config.predicate)(&primary_err) {
                    return Err(primary_err);
                }
                self.metrics.lock().unwrap().fallback_invocations += 1;
                let fallback_result = match &self.config.action {
                    FallbackAction::Action(action) => action(&primary_err),
                    FallbackAction::Value(value) => Ok(value.clone()),
                };
                match fallback_result {
                    Ok(value) => Ok(value),
                    Err(fallback_err) => {
                        self.metrics.lock().unwrap().fallback_failures += 1;
                        if self.config.throw_on_fallback_failure {
                            Err(ConduitError::unknown(FallbackFailure {
                                primary: primary_err,
                                fallback: fallback_err,
                            }))
                        } else {
                            Err(primary_err)
                        }
                    }
                }
            }
        }
    }

    /// Current fallback metrics
    #[must_use]
    pub fn metrics(&self) -> FallbackMetrics {
        self.metrics.lock().unwrap().clone()
    }

    /// Resets accumulated metrics
    pub fn reset(&self) {
        *self.metrics.lock().unwrap() = FallbackMetrics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn falls_back_to_default_value_on_transient_error() {
        let policy = FallbackPolicy::new(FallbackConfig::new(FallbackAction::Value(7)));
        let result = policy
            .execute(|| async { Err(ConduitError::Timeout("slow".into())) })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(policy.metrics().fallback_invocations, 1);
    }

    #[tokio::test]
    async fn non_matching_error_is_not_caught() {
        let policy = FallbackPolicy::new(FallbackConfig::new(FallbackAction::Value(7)));
        let result: ConduitResult<i32> = policy
            .execute(|| async { Err(ConduitError::Validation("bad".into())) })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn double_failure_raises_composite_when_configured() {
        let mut config = FallbackConfig::new(FallbackAction::Action(Arc::new(|_err| {
            Err(ConduitError::Unknown("fallback also broken".into()))
        })));
        config.throw_on_fallback_failure = true;
        let policy = FallbackPolicy::new(config);
        let result: ConduitResult<i32> = policy
            .execute(|| async { Err(ConduitError::Timeout("slow".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(policy.metrics().fallback_failures, 1);
    }
}
