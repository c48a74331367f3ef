//! In-memory reference transport
//!
//! Delivery is synchronous within the process: `send` iterates
//! destination-specific handlers then the global handler set. No
//! persistence; `disconnect_core` drops every handler and subscription.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::ConduitResult;
use crate::ids::SubscriptionId;
use crate::transport::message::{Destination, TransportMessage};
use crate::transport::traits::{
    SubscriptionHandler, Transport, TransportLifecycle, TransportStatistics, TransportSubscription,
};

struct InMemorySubscription {
    id: SubscriptionId,
    source: Destination,
    active: AtomicBool,
    received_count: AtomicU64,
    handler: SubscriptionHandler,
}

#[async_trait]
impl TransportSubscription for InMemorySubscription {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn source(&self) -> &Destination {
        &self.source
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn received_count(&self) -> u64 {
        self.received_count.load(Ordering::Relaxed)
    }

    fn pause(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn resume(&self) {
        self.active.store(true, Ordering::Release);
    }

    async fn unsubscribe(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Delivery is synchronous and in-process; `send` iterates every
/// subscription bound to the message's destination, falling back to the
/// global (source-less) subscriptions if none match.
pub struct InMemoryTransport {
    lifecycle: TransportLifecycle,
    by_destination: DashMap<Destination, Vec<Arc<InMemorySubscription>>>,
    global: DashMap<SubscriptionId, Arc<InMemorySubscription>>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    /// Builds a disconnected in-memory transport
    #[must_use]
    pub fn new() -> Self {
        Self {
            lifecycle: TransportLifecycle::default(),
            by_destination: DashMap::new(),
            global: DashMap::new(),
        }
    }

    /// Connects the transport, matching the shared lifecycle template
    pub async fn connect(&self) -> ConduitResult<()> {
        self.lifecycle.connect(|| async { Ok(()) }).await
    }

    /// Sends through the shared lifecycle template, then delivers in-process
    pub async fn send(&self, message: TransportMessage, destination: Option<Destination>) -> ConduitResult<()> {
        let payload_len = message.payload.len();
        self.lifecycle
            .timed_send(payload_len, || self.deliver(message, destination))
            .await
    }

    async fn deliver(&self, message: TransportMessage, destination: Option<Destination>) -> ConduitResult<()> {
        let mut delivered = false;
        if let Some(destination) = &destination {
            if let Some(subscriptions) = self.by_destination.get(destination) {
                for subscription in subscriptions.iter().filter(|s| s.is_active()) {
                    (subscription.handler)(message.clone())?;
                    subscription.received_count.fetch_add(1, Ordering::Relaxed);
                    delivered = true;
                }
            }
        }
        if !delivered {
            for entry in self.global.iter().filter(|e| e.value().is_active()) {
                let subscription = entry.value();
                (subscription.handler)(message.clone())?;
                subscription.received_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.lifecycle.record_received(message.payload.len());
        Ok(())
    }

    /// Subscribes to `source`, or to every message if `source` is `None`
    pub async fn subscribe(
        &self,
        source: Option<Destination>,
        handler: SubscriptionHandler,
    ) -> ConduitResult<Arc<dyn TransportSubscription>> {
        self.lifecycle.assert_connected()?;
        let id = SubscriptionId::generate();
        let subscription = Arc::new(InMemorySubscription {
            id,
            source: source.clone().unwrap_or_else(|| Destination::parse("*")),
            active: AtomicBool::new(true),
            received_count: AtomicU64::new(0),
            handler,
        });
        match source {
            Some(destination) => {
                self.by_destination
                    .entry(destination)
                    .or_default()
                    .push(Arc::clone(&subscription));
            }
            None => {
                self.global.insert(id, Arc::clone(&subscription));
            }
        }
        Ok(subscription)
    }

    /// Disconnects, dropping every subscription
    pub async fn disconnect(&self) -> ConduitResult<()> {
        self.by_destination.clear();
        self.global.clear();
        self.lifecycle.mark_disconnected();
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect_core(&self) -> ConduitResult<()> {
        Ok(())
    }

    async fn disconnect_core(&self) -> ConduitResult<()> {
        self.by_destination.clear();
        self.global.clear();
        Ok(())
    }

    async fn send_core(&self, message: TransportMessage, destination: Option<Destination>) -> ConduitResult<()> {
        self.deliver(message, destination).await
    }

    async fn subscribe_core(
        &self,
        source: Option<Destination>,
        handler: SubscriptionHandler,
    ) -> ConduitResult<Arc<dyn TransportSubscription>> {
        self.subscribe(source, handler).await
    }

    fn is_connected(&self) -> bool {
        self.lifecycle.is_connected()
    }

    fn statistics(&self) -> TransportStatistics {
        self.lifecycle.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConduitError;
    use std::sync::Mutex;

    #[tokio::test]
    async fn send_before_connect_fails() {
        let transport = InMemoryTransport::new();
        let message = sample_message();
        let err = transport.send(message, None).await.unwrap_err();
        assert!(matches!(err, ConduitError::NotConnected));
    }

    #[tokio::test]
    async fn destination_subscriber_receives_matching_messages() {
        let transport = InMemoryTransport::new();
        transport.connect().await.unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        let destination = Destination::parse("queue://replies");
        transport
            .subscribe(
                Some(destination.clone()),
                Arc::new(move |msg| {
                    received_clone.lock().unwrap().push(msg.message_id);
                    Ok(())
                }),
            )
            .await
            .unwrap();
        let message = sample_message();
        let id = message.message_id;
        transport.send(message, Some(destination)).await.unwrap();
        assert_eq!(*received.lock().unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn statistics_accumulate_monotonically() {
        let transport = InMemoryTransport::new();
        transport.connect().await.unwrap();
        transport.send(sample_message(), None).await.unwrap();
        transport.send(sample_message(), None).await.unwrap();
        let stats = transport.statistics();
        assert_eq!(stats.messages_sent, 2);
    }

    fn sample_message() -> TransportMessage {
        TransportMessage {
            message_id: crate::ids::MessageId::generate(),
            correlation_id: None,
            causation_id: None,
            payload: b"hello".to_vec(),
            content_type: "application/json".into(),
            content_encoding: "identity".into(),
            type_tag: "test.message".into(),
            source: None,
            destination: None,
            reply_to: None,
            timestamp: std::time::SystemTime::now(),
            expires_at: None,
            priority: crate::message::Priority::new(5),
            persistent: false,
            delivery_attempts: 0,
            headers: std::collections::HashMap::new(),
        }
    }
}
