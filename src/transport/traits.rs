//! Transport contract and lifecycle template
//!
//! `Transport` is the object-safe trait every binding (in-memory, and any
//! future broker-backed adapter) implements. `TransportLifecycle` is the
//! shared base every implementation composes with: it owns the
//! `is_connected` flag and the running statistics, calling into the
//! transport-specific `connect_core`/`send_core`/`subscribe_core` hooks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ConduitError, ConduitResult};
use crate::transport::message::{Destination, TransportMessage};

/// A receive binding returned by `Subscribe`
#[async_trait]
pub trait TransportSubscription: Send + Sync {
    /// Identity of this subscription
    fn id(&self) -> crate::ids::SubscriptionId;

    /// Source this subscription receives from
    fn source(&self) -> &Destination;

    /// Whether this subscription is currently delivering messages
    fn is_active(&self) -> bool;

    /// Number of messages delivered to this subscription so far
    fn received_count(&self) -> u64;

    /// Suspends delivery without discarding the binding
    fn pause(&self);

    /// Resumes delivery after a `pause`
    fn resume(&self);

    /// Cancels this subscription; idempotent
    async fn unsubscribe(&self);
}

/// Handler invoked for every message a subscription receives
pub type SubscriptionHandler =
    std::sync::Arc<dyn Fn(TransportMessage) -> ConduitResult<()> + Send + Sync>;

/// Running statistics a transport accumulates over its lifetime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportStatistics {
    /// Total connection attempts
    pub connection_attempts: u64,
    /// Total successful connections
    pub connection_successes: u64,
    /// Total connection failures
    pub connection_failures: u64,
    /// Total messages sent
    pub messages_sent: u64,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total messages received
    pub messages_received: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total send failures
    pub send_failures: u64,
    /// Running mean send latency, in microseconds
    pub average_send_time_micros: f64,
}

/// Bytes-moving contract every transport binding implements
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport-specific connection setup; called under the lifecycle lock
    async fn connect_core(&self) -> ConduitResult<()>;

    /// Transport-specific teardown
    async fn disconnect_core(&self) -> ConduitResult<()>;

    /// Transport-specific send, given an already-validated connected state
    async fn send_core(&self, message: TransportMessage, destination: Option<Destination>) -> ConduitResult<()>;

    /// Transport-specific subscribe
    async fn subscribe_core(
        &self,
        source: Option<Destination>,
        handler: SubscriptionHandler,
    ) -> ConduitResult<std::sync::Arc<dyn TransportSubscription>>;

    /// Whether the transport is currently connected
    fn is_connected(&self) -> bool;

    /// Current running statistics
    fn statistics(&self) -> TransportStatistics;
}

/// Shared lifecycle state every `Transport` implementation embeds: tracks
/// `is_connected` and running statistics so `Connect`/`Send`/`Subscribe`
/// enforce the same connected-state and accounting rules everywhere.
pub struct TransportLifecycle {
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connection_successes: AtomicU64,
    connection_failures: AtomicU64,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_received: AtomicU64,
    send_failures: AtomicU64,
    total_send_micros: AtomicU64,
    send_count_for_average: AtomicU64,
}

impl Default for TransportLifecycle {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connection_successes: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            total_send_micros: AtomicU64::new(0),
            send_count_for_average: AtomicU64::new(0),
        }
    }
}

impl TransportLifecycle {
    /// Runs `connect_core`, updating the connected flag and counters
    pub async fn connect<F, Fut>(&self, connect_core: F) -> ConduitResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ConduitResult<()>>,
    {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
        match connect_core().await {
            Ok(()) => {
                self.connected.store(true, Ordering::Release);
                self.connection_successes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.connection_failures.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Marks the transport disconnected
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Whether the transport is currently connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Asserts the transport is connected, failing with [`ConduitError::NotConnected`]
    pub fn assert_connected(&self) -> ConduitResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ConduitError::NotConnected)
        }
    }

    /// Times `send_core`, updating send counters and the running mean send time
    pub async fn timed_send<F, Fut>(&self, payload_len: usize, send_core: F) -> ConduitResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ConduitResult<()>>,
    {
        self.assert_connected()?;
        let started = Instant::now();
        let result = send_core().await;
        let elapsed = started.elapsed();
        match &result {
            Ok(()) => {
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent.fetch_add(payload_len as u64, Ordering::Relaxed);
                self.record_send_time(elapsed);
            }
            Err(_) => {
                self.send_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    fn record_send_time(&self, elapsed: Duration) {
        let micros = elapsed.as_micros() as u64;
        self.total_send_micros.fetch_add(micros, Ordering::Relaxed);
        self.send_count_for_average.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an inbound delivery for statistics purposes
    pub fn record_received(&self, payload_len: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    /// Snapshot of accumulated statistics
    #[must_use]
    pub fn statistics(&self) -> TransportStatistics {
        let send_count = self.send_count_for_average.load(Ordering::Relaxed);
        let average_send_time_micros = if send_count == 0 {
            0.0
        } else {
            self.total_send_micros.load(Ordering::Relaxed) as f64 / send_count as f64
        };
        TransportStatistics {
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connection_successes: self.connection_successes.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            average_send_time_micros,
        }
    }
}

/// Connection pool contract for transports that multiplex connections per
/// destination; the in-memory reference transport has no pool and does
/// not implement this
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Connection handle type this pool manages
    type Connection: Send + Sync;

    /// Returns an open, healthy connection for `destination`, preferring
    /// an idle one
    async fn get_connection(&self, destination: &Destination) -> ConduitResult<Self::Connection>;

    /// Current pool statistics
    fn statistics(&self) -> ConnectionPoolStatistics;
}

/// Point-in-time connection pool statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionPoolStatistics {
    /// Total connections created over the pool's lifetime
    pub creations: u64,
    /// Total connections destroyed (failed health check or idle timeout)
    pub destructions: u64,
    /// Total `get_connection` requests served
    pub requests: u64,
    /// Total requests served by reusing an idle connection
    pub reuses: u64,
    /// Cumulative time callers spent waiting for a connection, in microseconds
    pub total_wait_micros: u64,
    /// Fraction of pooled connections currently in use, in `[0, 1]`
    pub utilization: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_before_connect_fails_not_connected() {
        let lifecycle = TransportLifecycle::default();
        let result = lifecycle.timed_send(0, || async { Ok(()) }).await;
        assert!(matches!(result, Err(ConduitError::NotConnected)));
    }

    #[tokio::test]
    async fn connect_then_send_updates_statistics() {
        let lifecycle = TransportLifecycle::default();
        lifecycle.connect(|| async { Ok(()) }).await.unwrap();
        lifecycle.timed_send(10, || async { Ok(()) }).await.unwrap();
        let stats = lifecycle.statistics();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.bytes_sent, 10);
    }

    #[tokio::test]
    async fn failed_connect_increments_failure_counter() {
        let lifecycle = TransportLifecycle::default();
        let result = lifecycle
            .connect(|| async { Err(ConduitError::Network("refused".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(lifecycle.statistics().connection_failures, 1);
        assert!(!lifecycle.is_connected());
    }
}
