//! Handler traits
//!
//! Commands and queries return a single response payload and are bound
//! exclusively per type tag; events return nothing and fan out to every
//! registered handler.

use async_trait::async_trait;

use crate::error::ConduitResult;
use crate::message::{Message, MessageContext};

/// Handles exactly one command type, producing a response payload
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Executes the command, returning the response payload
    async fn handle(&self, message: Message, context: MessageContext) -> ConduitResult<Vec<u8>>;
}

/// Handles exactly one query type, producing a response payload; expected
/// to be idempotent and free of side effects per the glossary definition.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    /// Executes the query, returning the response payload
    async fn handle(&self, message: Message, context: MessageContext) -> ConduitResult<Vec<u8>>;
}

/// Reacts to an event; zero or more handlers may be bound to one type tag
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Reacts to the event; failure is aggregated by the dispatcher rather
    /// than aborting delivery to other handlers (unless `FailFast` is configured)
    async fn handle(&self, message: Message, context: MessageContext) -> ConduitResult<()>;
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(Message, MessageContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ConduitResult<Vec<u8>>> + Send,
{
    async fn handle(&self, message: Message, context: MessageContext) -> ConduitResult<Vec<u8>> {
        self(message, context).await
    }
}
