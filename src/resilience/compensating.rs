//! Compensating action policy
//!
//! Registers ordered `compensate` (run on primary failure, priority
//! descending) and `commit` (run on primary success, priority ascending)
//! action chains — a saga-style undo/confirm pair around a primary action.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ConduitError, ConduitResult, ErrorContext};

/// One step of a compensate or commit chain
#[async_trait]
pub trait CompensatingStep: Send + Sync {
    /// Runs this step, given the primary action's outcome for context
    async fn run(&self) -> ConduitResult<()>;

    /// Ordering priority: compensate steps run priority-descending, commit
    /// steps run priority-ascending
    fn priority(&self) -> i32 {
        0
    }
}

/// A registered compensate or commit step with its priority
struct RankedStep {
    priority: i32,
    step: Arc<dyn CompensatingStep>,
}

/// Compensating action configuration
pub struct CompensatingConfig {
    /// Steps run when the primary action fails and `compensate_predicate` matches
    compensate_steps: Vec<RankedStep>,
    /// Steps run when the primary action succeeds
    commit_steps: Vec<RankedStep>,
    /// Whether a failure should trigger compensation; defaults to "anything but validation"
    pub compensate_predicate: Arc<dyn Fn(&ConduitError) -> bool + Send + Sync>,
    /// Stop the compensate chain at the first step failure instead of running every step
    pub stop_on_first_compensation_failure: bool,
    /// Raise if any compensate step fails, instead of only surfacing the primary error
    pub throw_on_compensation_failure: bool,
    /// Stop the commit chain at the first step failure
    pub stop_on_first_commit_failure: bool,
}

impl Default for CompensatingConfig {
    fn default() -> Self {
        Self {
            compensate_steps: Vec::new(),
            commit_steps: Vec::new(),
            compensate_predicate: Arc::new(|error| {
                !matches!(ErrorContext::classify(error).category, crate::error::Category::Validation)
            }),
            stop_on_first_compensation_failure: false,
            throw_on_compensation_failure: false,
            stop_on_first_commit_failure: false,
        }
    }
}

impl CompensatingConfig {
    /// Registers a compensate step, run on primary failure
    #[must_use]
    pub fn with_compensate_step(mut self, priority: i32, step: Arc<dyn CompensatingStep>) -> Self {
        self.compensate_steps.push(RankedStep { priority, step });
        self
    }

    /// Registers a commit step, run on primary success
    #[must_use]
    pub fn with_commit_step(mut self, priority: i32, step: Arc<dyn CompensatingStep>) -> Self {
        self.commit_steps.push(RankedStep { priority, step });
        self
    }
}

/// Errors raised while running the compensate chain
#[derive(Debug)]
pub struct CompensationFailure {
    /// The original primary-action error
    pub primary: ConduitError,
    /// Errors raised by the compensate steps that failed
    pub compensation_errors: Vec<ConduitError>,
}

impl std::fmt::Display for CompensationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "primary action failed ({}) and {} compensate step(s) also failed",
            self.primary,
            self.compensation_errors.len()
        )
    }
}

impl std::error::Error for CompensationFailure {}

/// Wraps a primary action with compensate/commit chains
pub struct CompensatingActionPolicy {
    config: CompensatingConfig,
}

impl CompensatingActionPolicy {
    /// Builds a compensating-action policy
    #[must_use]
    pub fn new(config: CompensatingConfig) -> Self {
        Self { config }
    }

    /// Runs `action`, then the commit or compensate chain depending on its outcome
    pub async fn execute<T, F, Fut>(&self, action: F) -> ConduitResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ConduitResult<T>>,
    {
        match action().await {
            Ok(value) => {
                self.run_commit_chain().await;
                Ok(value)
            }
            Err(primary_err) => {
                if (self.config.compensate_predicate)(&primary_err) {
                    let compensation_errors = self.run_compensate_chain().await;
                    if self.config.throw_on_compensation_failure && !compensation_errors.is_empty() {
                        return Err(ConduitError::unknown(CompensationFailure {
                            primary: primary_err,
                            compensation_errors,
                        }));
                    }
                }
                Err(primary_err)
            }
        }
    }

    async fn run_compensate_chain(&self) -> Vec<ConduitError> {
        let mut ordered: Vec<&RankedStep> = self.config.compensate_steps.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
        let mut errors = Vec::new();
        for ranked in ordered {
            if let Err(err) = ranked.step.run().await {
                errors.push(err);
                if self.config.stop_on_first_compensation_failure {
                    break;
                }
            }
        }
        errors
    }

    async fn run_commit_chain(&self) {
        let mut ordered: Vec<&RankedStep> = self.config.commit_steps.iter().collect();
        ordered.sort_by(|a, b| a.priority.cmp(&b.priority));
        for ranked in ordered {
            if (ranked.step.run().await).is_err() && self.config.stop_on_first_commit_failure {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingStep {
        label: &'static str,
        priority: i32,
        order: Arc<Mutex<Vec<&'static str>>>,
        fails: bool,
    }

    #[async_trait]
    impl CompensatingStep for RecordingStep {
        async fn run(&self) -> ConduitResult<()> {
            self.order.lock().unwrap().push(self.label);
            if self.fails {
                Err(ConduitError::Unknown("step failed".into()))
            } else {
                Ok(())
            }
        }

        fn priority(&self) -> i32 {
            self.priority
        }
    }

    #[tokio::test]
    async fn compensate_chain_runs_priority_descending_on_failure() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let config = CompensatingConfig::default()
            .with_compensate_step(
                1,
                Arc::new(RecordingStep {
                    label: "low",
                    priority: 1,
                    order: Arc::clone(&order),
                    fails: false,
                }),
            )
            .with_compensate_step(
                5,
                Arc::new(RecordingStep {
                    label: "high",
                    priority: 5,
                    order: Arc::clone(&order),
                    fails: false,
                }),
            );
        let policy = CompensatingActionPolicy::new(config);
        let result: ConduitResult<()> = policy
            .execute(|| async { Err(ConduitError::Network("boom".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
    }

    #[tokio::test]
    async fn commit_chain_runs_priority_ascending_on_success() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let config = CompensatingConfig::default()
            .with_commit_step(
                5,
                Arc::new(RecordingStep {
                    label: "high",
                    priority: 5,
                    order: Arc::clone(&order),
                    fails: false,
                }),
            )
            .with_commit_step(
                1,
                Arc::new(RecordingStep {
                    label: "low",
                    priority: 1,
                    order: Arc::clone(&order),
                    fails: false,
                }),
            );
        let policy = CompensatingActionPolicy::new(config);
        policy.execute(|| async { Ok(()) }).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["low", "high"]);
    }

    #[tokio::test]
    async fn validation_errors_do_not_trigger_compensation() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let config = CompensatingConfig::default().with_compensate_step(
            0,
            Arc::new(RecordingStep {
                label: "only",
                priority: 0,
                order: Arc::clone(&order),
                fails: false,
            }),
        );
        let policy = CompensatingActionPolicy::new(config);
        let result: ConduitResult<()> = policy
            .execute(|| async { Err(ConduitError::Validation("bad input".into())) })
            .await;
        assert!(result.is_err());
        assert!(order.lock().unwrap().is_empty());
    }
}
