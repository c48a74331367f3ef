//! Request/response correlation
//!
//! Maintains a mapping from correlation id to a one-shot waiter. When a
//! transport subscription receives a message whose correlation id
//! matches a pending waiter, the waiter resolves with the response
//! instead of the message proceeding to normal dispatch.

use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::{ConduitError, ConduitResult};
use crate::ids::CorrelationId;
use crate::message::Message;

/// Request/response correlator
pub struct Correlator {
    waiters: DashMap<CorrelationId, oneshot::Sender<Message>>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    /// Builds an empty correlator
    #[must_use]
    pub fn new() -> Self {
        Self {
            waiters: DashMap::new(),
        }
    }

    /// Registers a one-shot wait for `correlation_id`, resolving when a
    /// matching reply arrives via [`Self::try_resolve`] or timing out
    /// after `timeout`
    pub async fn await_response(&self, correlation_id: CorrelationId, timeout: Duration) -> ConduitResult<Message> {
        let (sender, receiver) = oneshot::channel();
        self.waiters.insert(correlation_id, sender);
        let result = tokio::time::timeout(timeout, receiver).await;
        self.waiters.remove(&correlation_id);
        match result {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(ConduitError::Cancelled),
            Err(_) => Err(ConduitError::Timeout(format!(
                "no response for correlation {correlation_id} within {timeout:?}"
            ))),
        }
    }

    /// Called by a transport subscription for every inbound message;
    /// resolves a matching waiter and returns `true`, or returns `false`
    /// (meaning the message should proceed to normal dispatch) if none exists
    #[must_use]
    pub fn try_resolve(&self, message: Message) -> bool {
        let Some(correlation_id) = message.correlation_id else {
            return false;
        };
        if let Some((_, sender)) = self.waiters.remove(&correlation_id) {
            sender.send(message).is_ok()
        } else {
            false
        }
    }

    /// Number of waiters currently pending
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TypeTag;

    #[tokio::test]
    async fn matching_reply_resolves_waiter() {
        let correlator = std::sync::Arc::new(Correlator::new());
        let correlation_id = CorrelationId::generate();
        let correlator_clone = std::sync::Arc::clone(&correlator);
        let awaiting = tokio::spawn(async move {
            correlator_clone
                .await_response(correlation_id, Duration::from_secs(1))
                .await
        });
        tokio::task::yield_now().await;
        let mut reply = Message::new(TypeTag::from_static("test.reply"), vec![42]);
        reply.correlation_id = Some(correlation_id);
        assert!(correlator.try_resolve(reply));
        let resolved = awaiting.await.unwrap().unwrap();
        assert_eq!(resolved.payload, vec![42]);
    }

    #[tokio::test]
    async fn no_matching_waiter_proceeds_to_dispatch() {
        let correlator = Correlator::new();
        let message = Message::new(TypeTag::from_static("test.unrelated"), vec![]);
        assert!(!correlator.try_resolve(message));
    }

    #[tokio::test]
    async fn unmatched_wait_times_out() {
        let correlator = Correlator::new();
        let result = correlator
            .await_response(CorrelationId::generate(), Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(ConduitError::Timeout(_))));
    }
}
