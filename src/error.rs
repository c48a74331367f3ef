//! Error taxonomy shared by every subsystem
//!
//! Conduit classifies failures along two independent axes — a [`Category`]
//! describing *what kind* of thing went wrong, and a [`Severity`] describing
//! *how bad* it is — plus two booleans (`is_transient`, `is_critical`) that
//! the resilience engine branches on directly rather than matching exception
//! hierarchies.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ComponentId, CorrelationId, ErrorId};

/// What kind of thing went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// No more specific category applies
    Unknown,
    /// Input failed validation before any side effect occurred
    Validation,
    /// A network call failed
    Network,
    /// An operation exceeded its deadline
    Timeout,
    /// Authentication, authorization, or cancellation
    Security,
    /// Local I/O (disk, pipe) failed
    Io,
    /// The host process or runtime is in an abnormal state (OOM, stack overflow)
    System,
    /// A domain/business rule rejected the operation
    Business,
    /// Misconfiguration of the bus or a component
    Configuration,
    /// A declared dependency is missing or incompatible
    Dependency,
}

/// How bad a failure is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Informational; no operator action needed
    Low,
    /// Degraded but self-recoverable
    Medium,
    /// Needs attention soon
    High,
    /// Needs attention now; short-circuits resilience policies
    Critical,
}

/// A fully classified failure, independent of any specific exception type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Identity of this classified failure
    pub error_id: ErrorId,
    /// Conversation this failure occurred within, if any
    pub correlation_id: Option<CorrelationId>,
    /// Human-readable description of the underlying cause
    pub message: String,
    /// What kind of failure this is
    pub category: Category,
    /// How bad it is
    pub severity: Severity,
    /// Whether retrying the same operation might succeed
    pub is_transient: bool,
    /// Whether this failure should short-circuit all resilience policies
    pub is_critical: bool,
    /// Component that raised the failure, if known
    pub component: Option<ComponentId>,
    /// Operation name that raised the failure (e.g. `"send_command"`)
    pub operation: Option<String>,
    /// Which retry attempt this occurred on, if inside a retry policy
    pub retry_attempt: Option<u32>,
    /// Free-form classification tags
    pub tags: Vec<String>,
}

impl ErrorContext {
    /// Builds a new `ErrorContext` for a freshly observed `ConduitError`
    #[must_use]
    pub fn classify(error: &ConduitError) -> Self {
        let (category, severity, is_transient, is_critical) = classify_kind(error);
        Self {
            error_id: ErrorId::generate(),
            correlation_id: None,
            message: error.to_string(),
            category,
            severity,
            is_transient,
            is_critical,
            component: None,
            operation: None,
            retry_attempt: None,
            tags: Vec::new(),
        }
    }

    /// Attaches a correlation id, returning `self` for chaining
    #[must_use]
    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Attaches the originating component, returning `self` for chaining
    #[must_use]
    pub fn with_component(mut self, id: ComponentId) -> Self {
        self.component = Some(id);
        self
    }

    /// Attaches the operation name, returning `self` for chaining
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Attaches the retry attempt number, returning `self` for chaining
    #[must_use]
    pub fn with_retry_attempt(mut self, attempt: u32) -> Self {
        self.retry_attempt = Some(attempt);
        self
    }
}

/// Classifies a `ConduitError` into `(category, severity, is_transient, is_critical)`
///
/// Validation and configuration errors are never transient. Timeout, network
/// and I/O errors default to transient. Cancellation is a `Security`-shaped,
/// non-transient pass-through per the propagation policy: it must not be
/// silently retried. System-resource exhaustion is always critical.
fn classify_kind(error: &ConduitError) -> (Category, Severity, bool, bool) {
    match error {
        ConduitError::Validation(_) => (Category::Validation, Severity::Medium, false, false),
        ConduitError::Configuration(_) => {
            (Category::Configuration, Severity::High, false, false)
        }
        ConduitError::Timeout(_) => (Category::Timeout, Severity::Medium, true, false),
        ConduitError::Network(_) => (Category::Network, Severity::Medium, true, false),
        ConduitError::Io(_) => (Category::Io, Severity::Medium, true, false),
        ConduitError::Cancelled => (Category::Security, Severity::Low, false, false),
        ConduitError::ResourceExhausted(_) => (Category::System, Severity::Critical, false, true),
        ConduitError::Dependency(_) => (Category::Dependency, Severity::High, false, false),
        ConduitError::Business(_) => (Category::Business, Severity::Medium, false, false),
        ConduitError::HandlerAlreadyRegistered(_)
        | ConduitError::HandlerNotFound(_)
        | ConduitError::ComponentNotFound(_)
        | ConduitError::CircuitOpen
        | ConduitError::BackpressureRejected
        | ConduitError::NotConnected
        | ConduitError::CycleDetected(_) => (Category::Unknown, Severity::Medium, false, false),
        ConduitError::Unknown(_) => (Category::Unknown, Severity::Low, false, false),
    }
}

/// Top-level error type returned by every bus operation
#[derive(Debug, Clone, Error)]
pub enum ConduitError {
    /// Input failed validation before any side effect occurred
    #[error("validation failed: {0}")]
    Validation(String),

    /// The bus or a component is misconfigured
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation exceeded its deadline
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// A network-backed transport failed
    #[error("network error: {0}")]
    Network(String),

    /// Local I/O failed
    #[error("I/O error: {0}")]
    Io(String),

    /// The caller's context was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// A resource limit (memory, capacity) was exhausted
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A component dependency is missing or incompatible
    #[error("dependency error: {0}")]
    Dependency(String),

    /// A domain/business rule rejected the operation
    #[error("business rule violation: {0}")]
    Business(String),

    /// A handler is already registered for this type tag
    #[error("handler already registered for {0}")]
    HandlerAlreadyRegistered(String),

    /// No handler is registered for this type tag
    #[error("no handler registered for {0}")]
    HandlerNotFound(String),

    /// No component with this id is known to the bus
    #[error("component not found: {0}")]
    ComponentNotFound(String),

    /// The circuit breaker is open and rejected the call without attempting it
    #[error("circuit is open")]
    CircuitOpen,

    /// The flow controller's wait queue is full
    #[error("backpressure: admission rejected")]
    BackpressureRejected,

    /// The transport is not connected
    #[error("transport not connected")]
    NotConnected,

    /// Dependency resolution found a cycle; the path names the involved components
    #[error("dependency cycle detected: {0}")]
    CycleDetected(String),

    /// Catch-all for failures that do not fit another variant
    #[error("{0}")]
    Unknown(String),
}

impl ConduitError {
    /// Convenience for wrapping an arbitrary display-able cause as [`ConduitError::Unknown`]
    pub fn unknown(cause: impl fmt::Display) -> Self {
        Self::Unknown(cause.to_string())
    }
}

/// Result alias used throughout the crate
pub type ConduitResult<T> = Result<T, ConduitError>;
