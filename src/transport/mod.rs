//! Transport: bytes-moving abstraction and the in-memory reference binding.

pub mod in_memory;
pub mod message;
pub mod traits;

pub use in_memory::InMemoryTransport;
pub use message::{Destination, TransportMessage};
pub use traits::{
    ConnectionPool, ConnectionPoolStatistics, SubscriptionHandler, Transport, TransportLifecycle,
    TransportStatistics, TransportSubscription,
};
