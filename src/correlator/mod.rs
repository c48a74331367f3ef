//! Correlator: request/response matching and the dead-letter queue.

pub mod dlq;
pub mod waiter;

pub use dlq::{DeadLetterEntry, DeadLetterQueue, DlqConfig, DlqEvent, DlqStats};
pub use waiter::Correlator;
