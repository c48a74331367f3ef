//! Bus-wide metrics snapshot
//!
//! Not part of spec.md's module list verbatim; a natural aggregation point
//! this expansion adds so an external metrics exporter has one call to make
//! instead of walking every subsystem individually.

use serde::{Deserialize, Serialize};

use crate::correlator::dlq::DlqStats;
use crate::flow_control::FlowControllerStats;
use crate::registry::dispatcher::DispatchStatistics;
use crate::resilience::health_monitor::HealthSnapshot;

/// Flattened view across every subsystem's own statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMetrics {
    /// Per-message-type dispatch statistics
    pub dispatch: DispatchStatistics,
    /// Flow controller admission statistics
    pub flow_control: FlowControllerStats,
    /// Dead-letter queue statistics
    pub dlq: DlqStats,
    /// Health monitor's most recent computed score
    pub health: HealthSnapshot,
}
