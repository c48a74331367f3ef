//! Observability facade: structured logging and metrics snapshots
//!
//! Conduit does not ship a logging sink or a metrics exporter — those are
//! external collaborators per the scope note in spec.md §1. What lives here
//! is the thin, crate-internal layer every subsystem reports through:
//! `tracing` spans/events for logs, and plain snapshot structs for metrics
//! that [`crate::bus::ConduitBus::metrics`] aggregates.

pub mod metrics;

pub use metrics::BusMetrics;
