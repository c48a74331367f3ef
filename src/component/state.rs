//! Component state machine
//!
//! Replaces the `AbstractPluggableComponent` deep-inheritance pattern with
//! composition: a `Component` owns a `manifest` and a `ComponentState`; the
//! state machine itself is a standalone object that invokes whichever
//! `Lifecycle` hooks the component implements. No inheritance required.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::component::manifest::ComponentManifest;
use crate::error::ConduitResult;

/// State a `Component` occupies at a point in time
///
/// ```text
/// Discovered → Initializing → Initialized → Starting → Started
///                  │                              │         │
///                  └────► Failed ◄─────────────────┴─────────┘
///                               │
/// Started → Stopping → Stopped → Disposing → Disposed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ComponentState {
    /// Found by a discovery strategy but not yet validated or loaded
    Discovered = 0,
    /// `OnInitialize` is running
    Initializing = 1,
    /// `OnInitialize` completed successfully
    Initialized = 2,
    /// `OnStart` is running
    Starting = 3,
    /// Serving; handlers registered
    Started = 4,
    /// `OnStop` is running
    Stopping = 5,
    /// Stopped; handlers deregistered
    Stopped = 6,
    /// `OnDispose` is running
    Disposing = 7,
    /// Terminal; resources released
    Disposed = 8,
    /// Terminal; a lifecycle hook failed. Reachable from any non-terminal state.
    Failed = 9,
}

impl ComponentState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Discovered,
            1 => Self::Initializing,
            2 => Self::Initialized,
            3 => Self::Starting,
            4 => Self::Started,
            5 => Self::Stopping,
            6 => Self::Stopped,
            7 => Self::Disposing,
            8 => Self::Disposed,
            _ => Self::Failed,
        }
    }

    /// Whether no further transition is legal from this state
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disposed | Self::Failed)
    }

    /// Whether `next` is a legal transition from `self`, per the diagram above
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ComponentState::{
            Disposed, Disposing, Failed, Initialized, Initializing, Started, Starting, Stopped,
            Stopping,
        };
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Self::Discovered, Initializing)
                | (Initializing, Initialized)
                | (Initialized, Starting)
                | (Starting, Started)
                | (Started, Stopping)
                | (Stopping, Stopped)
                | (Stopped, Disposing)
                | (Disposing, Disposed)
        )
    }
}

/// Observed health of a running component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Operating with reduced capability
    Degraded,
    /// Not operating correctly
    Unhealthy,
}

/// Result of `PerformHealthCheck`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Overall status
    pub status: HealthStatus,
    /// Free-form diagnostic data
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl HealthCheckResult {
    /// Shorthand for a healthy result with no diagnostic data
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            data: serde_json::Map::new(),
        }
    }
}

/// Hooks a component implements; the state machine invokes only the ones
/// it needs rather than requiring a base class to be subclassed.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Runs while transitioning `Initializing` → `Initialized`
    async fn on_initialize(&self) -> ConduitResult<()> {
        Ok(())
    }

    /// Runs while transitioning `Starting` → `Started`
    async fn on_start(&self) -> ConduitResult<()> {
        Ok(())
    }

    /// Runs while transitioning `Stopping` → `Stopped`
    async fn on_stop(&self) -> ConduitResult<()> {
        Ok(())
    }

    /// Runs while transitioning `Disposing` → `Disposed`
    async fn on_dispose(&self) -> ConduitResult<()> {
        Ok(())
    }

    /// Polled at the health-check interval once the component is `Started`
    async fn perform_health_check(&self) -> ConduitResult<HealthCheckResult> {
        Ok(HealthCheckResult::healthy())
    }
}

/// A loaded, stateful unit of extensibility
pub struct Component {
    /// Identity and dependency declaration
    pub manifest: ComponentManifest,
    state: AtomicU8,
    hooks: Arc<dyn Lifecycle>,
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("manifest", &self.manifest)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Component {
    /// Wraps a manifest and its lifecycle hooks into a freshly `Discovered` component
    #[must_use]
    pub fn new(manifest: ComponentManifest, hooks: Arc<dyn Lifecycle>) -> Self {
        Self {
            manifest,
            state: AtomicU8::new(ComponentState::Discovered as u8),
            hooks,
        }
    }

    /// Atomic snapshot of the current state, safe to read from any observer
    /// without coordinating with the owning lifecycle loop.
    #[must_use]
    pub fn state(&self) -> ComponentState {
        ComponentState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Lifecycle hooks this component implements
    #[must_use]
    pub fn hooks(&self) -> Arc<dyn Lifecycle> {
        Arc::clone(&self.hooks)
    }

    /// Attempts to move to `next`, returning `false` if the transition is illegal
    pub fn try_transition(&self, next: ComponentState) -> bool {
        let current = self.state();
        if !current.can_transition_to(next) {
            return false;
        }
        self.state
            .compare_exchange(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
