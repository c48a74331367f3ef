//! # conduit-core
//!
//! Pluggable message-bus runtime: a behavior pipeline, admission control,
//! resilience policies (retry, circuit breaker, fallback, compensation),
//! a dead-letter queue, request/response correlation, a transport
//! abstraction with an in-process reference binding, and component
//! discovery/lifecycle management, all tied together by [`bus::ConduitBus`].
//!
//! ```rust
//! use conduit_core::bus::ConduitBus;
//! use conduit_core::config::ConduitConfig;
//! use conduit_core::ids::TypeTag;
//! use conduit_core::message::{Message, MessageContext};
//! use std::sync::Arc;
//!
//! # async fn run() -> conduit_core::error::ConduitResult<()> {
//! let (bus, _lifecycle_events) = ConduitBus::new(ConduitConfig::development());
//! bus.register_command_handler(
//!     TypeTag::try_new("orders.create")?,
//!     Arc::new(|message: Message, _ctx: MessageContext| async move { Ok(message.payload) }),
//! )?;
//! let response = bus
//!     .send_command(
//!         Message::new(TypeTag::try_new("orders.create")?, b"O-1".to_vec()),
//!         MessageContext::default(),
//!     )
//!     .await?;
//! assert_eq!(response, b"O-1");
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod component;
pub mod config;
pub mod correlator;
pub mod error;
pub mod flow_control;
pub mod ids;
pub mod message;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod time;
pub mod transport;

pub use bus::ConduitBus;
pub use config::ConduitConfig;
pub use error::{ConduitError, ConduitResult};
pub use message::{Message, MessageContext};
