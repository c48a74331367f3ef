//! Lifecycle orchestration
//!
//! Drives a loaded [`Component`] through its state machine by invoking
//! lifecycle hooks under a configurable timeout, and polls
//! `perform_health_check` at a configurable interval once a component is
//! `Started`. Publishes every state transition and health check onto an
//! event channel rather than requiring callers to poll.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{instrument, warn};

use crate::component::state::{Component, ComponentState, HealthCheckResult};
use crate::error::{ConduitError, ConduitResult};
use crate::ids::ComponentId;

/// A state change or health observation published by the lifecycle manager
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// A component moved from `from` to `to`
    StateChanged {
        /// Component that transitioned
        component_id: ComponentId,
        /// Previous state
        from: ComponentState,
        /// New state
        to: ComponentState,
    },
    /// A health probe completed
    HealthChecked {
        /// Component probed
        component_id: ComponentId,
        /// Probe result
        result: HealthCheckResult,
    },
    /// A lifecycle hook exceeded its timeout or returned an error
    HookFailed {
        /// Component whose hook failed
        component_id: ComponentId,
        /// Description of the failure
        reason: String,
    },
}

/// Per-hook timeout and health-probe interval configuration
#[derive(Debug, Clone, Copy)]
pub struct LifecycleConfig {
    /// Maximum duration any single lifecycle hook may run
    pub hook_timeout: Duration,
    /// Interval between health probes of `Started` components
    pub health_check_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            hook_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
        }
    }
}

/// Owns every loaded component and drives their state transitions
pub struct LifecycleManager {
    components: DashMap<ComponentId, Arc<Component>>,
    config: LifecycleConfig,
    events: mpsc::Sender<LifecycleEvent>,
}

impl LifecycleManager {
    /// Builds a manager and returns it alongside the receiving end of its event stream
    #[must_use]
    pub fn new(config: LifecycleConfig) -> (Self, mpsc::Receiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::channel(1024);
        (
            Self {
                components: DashMap::new(),
                config,
                events: tx,
            },
            rx,
        )
    }

    /// Registers a freshly discovered component under lifecycle management
    pub fn track(&self, component: Component) -> Arc<Component> {
        let handle = Arc::new(component);
        self.components.insert(handle.manifest.id, Arc::clone(&handle));
        handle
    }

    /// Current state of a tracked component
    #[must_use]
    pub fn state_of(&self, id: ComponentId) -> Option<ComponentState> {
        self.components.get(&id).map(|c| c.state())
    }

    /// Runs `Discovered -> Initializing -> Initialized`, timing out and
    /// moving to `Failed` if the hook does not complete in time.
    #[instrument(skip(self), fields(component_id = %id))]
    pub async fn initialize(&self, id: ComponentId) -> ConduitResult<()> {
        self.run_hook(id, ComponentState::Initializing, ComponentState::Initialized, |c| {
            Box::pin(async move { c.hooks().on_initialize().await })
        })
        .await
    }

    /// Runs `Initialized -> Starting -> Started`; forbidden by the caller
    /// unless every non-optional dependency is already `Started` (enforced
    /// by the orchestrator that sequences calls to this method, using the
    /// `resolver`'s start order).
    #[instrument(skip(self), fields(component_id = %id))]
    pub async fn start(&self, id: ComponentId) -> ConduitResult<()> {
        self.run_hook(id, ComponentState::Starting, ComponentState::Started, |c| {
            Box::pin(async move { c.hooks().on_start().await })
        })
        .await
    }

    /// Runs `Started -> Stopping -> Stopped`
    #[instrument(skip(self), fields(component_id = %id))]
    pub async fn stop(&self, id: ComponentId) -> ConduitResult<()> {
        self.run_hook(id, ComponentState::Stopping, ComponentState::Stopped, |c| {
            Box::pin(async move { c.hooks().on_stop().await })
        })
        .await
    }

    /// Runs `Stopped -> Disposing -> Disposed`
    #[instrument(skip(self), fields(component_id = %id))]
    pub async fn dispose(&self, id: ComponentId) -> ConduitResult<()> {
        self.run_hook(id, ComponentState::Disposing, ComponentState::Disposed, |c| {
            Box::pin(async move { c.hooks().on_dispose().await })
        })
        .await
    }

    async fn run_hook<F>(
        &self,
        id: ComponentId,
        entering: ComponentState,
        success: ComponentState,
        hook: F,
    ) -> ConduitResult<()>
    where
        F: FnOnce(
            Arc<Component>,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ConduitResult<()>> + Send>>,
    {
        let component = self
            .components
            .get(&id)
            .map(|c| Arc::clone(&c))
            .ok_or_else(|| ConduitError::ComponentNotFound(id.to_string()))?;

        if !component.try_transition(entering) {
            return Err(ConduitError::Configuration(format!(
                "component {id} cannot move from {:?} to {entering:?}",
                component.state()
            )));
        }
        let from = entering;

        let outcome = tokio::time::timeout(self.config.hook_timeout, hook(Arc::clone(&component))).await;

        match outcome {
            Ok(Ok(())) => {
                component.try_transition(success);
                let _ = self
                    .events
                    .send(LifecycleEvent::StateChanged {
                        component_id: id,
                        from,
                        to: success,
                    })
                    .await;
                Ok(())
            }
            Ok(Err(err)) => {
                self.fail(id, &component, err.to_string()).await;
                Err(err)
            }
            Err(_elapsed) => {
                let reason = format!("hook exceeded timeout of {:?}", self.config.hook_timeout);
                self.fail(id, &component, reason.clone()).await;
                Err(ConduitError::Timeout(reason))
            }
        }
    }

    async fn fail(&self, id: ComponentId, component: &Component, reason: String) {
        warn!(component_id = %id, %reason, "lifecycle hook failed");
        component.try_transition(ComponentState::Failed);
        let _ = self
            .events
            .send(LifecycleEvent::HookFailed {
                component_id: id,
                reason,
            })
            .await;
    }

    /// Probes every tracked `Started` component's health once
    pub async fn check_all_health(&self) {
        let started: Vec<Arc<Component>> = self
            .components
            .iter()
            .filter(|entry| entry.state() == ComponentState::Started)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for component in started {
            let id = component.manifest.id;
            match tokio::time::timeout(self.config.hook_timeout, component.hooks().perform_health_check())
                .await
            {
                Ok(Ok(result)) => {
                    let _ = self
                        .events
                        .send(LifecycleEvent::HealthChecked {
                            component_id: id,
                            result,
                        })
                        .await;
                }
                Ok(Err(err)) => {
                    warn!(component_id = %id, error = %err, "health check returned an error");
                }
                Err(_) => {
                    warn!(component_id = %id, "health check timed out");
                }
            }
        }
    }

    /// Spawns the periodic health-probe loop; the returned handle aborts the
    /// loop when dropped.
    pub fn spawn_health_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = self.config.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.check_all_health().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::manifest::{ComponentManifest, IsolationLevel, Version};
    use crate::component::state::Lifecycle;
    use async_trait::async_trait;

    fn manifest() -> ComponentManifest {
        ComponentManifest {
            id: ComponentId::generate(),
            name: "demo".into(),
            version: Version::new(1, 0, 0),
            dependencies: vec![],
            exports: vec![],
            imports: vec![],
            tags: vec![],
            description: None,
            author: None,
            min_framework_version: None,
            max_framework_version: None,
            isolation: IsolationLevel::Standard,
        }
    }

    struct Hooks;
    #[async_trait]
    impl Lifecycle for Hooks {}

    struct FailingHooks;
    #[async_trait]
    impl Lifecycle for FailingHooks {
        async fn on_initialize(&self) -> ConduitResult<()> {
            Err(ConduitError::Unknown("boom".into()))
        }
    }

    #[tokio::test]
    async fn initialize_moves_to_initialized_on_success() {
        let (manager, _rx) = LifecycleManager::new(LifecycleConfig::default());
        let manifest = manifest();
        let id = manifest.id;
        manager.track(Component::new(manifest, Arc::new(Hooks)));
        manager.initialize(id).await.unwrap();
        assert_eq!(manager.state_of(id), Some(ComponentState::Initialized));
    }

    #[tokio::test]
    async fn failing_hook_moves_to_failed() {
        let (manager, _rx) = LifecycleManager::new(LifecycleConfig::default());
        let manifest = manifest();
        let id = manifest.id;
        manager.track(Component::new(manifest, Arc::new(FailingHooks)));
        assert!(manager.initialize(id).await.is_err());
        assert_eq!(manager.state_of(id), Some(ComponentState::Failed));
    }
}
