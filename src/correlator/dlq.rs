//! Dead-letter queue
//!
//! Bounded `entryId -> DeadLetterEntry` map with oldest-first eviction
//! once `max_capacity` is exceeded, event hooks for every mutation, and
//! `reprocess` for re-injecting a quarantined message back into the
//! dispatcher.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Category, ConduitError, ConduitResult, ErrorContext};
use crate::ids::{CorrelationId, DeadLetterEntryId};
use crate::message::Message;
use crate::time::SharedClock;

/// A quarantined message plus the failure that landed it here
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Identity of this entry, distinct from the wrapped message's id
    pub id: DeadLetterEntryId,
    /// The message that failed terminally
    pub message: Message,
    /// Description of the exception/error that caused quarantine
    pub exception: String,
    /// Classification of the error that caused quarantine, for `GetByErrorType`
    pub error_category: Category,
    /// When this entry was enqueued
    pub enqueued_at: SystemTime,
    /// Conversation the message belonged to, if any
    pub correlation_id: Option<CorrelationId>,
    /// The message's type tag, duplicated here for filtering without deserializing payloads
    pub message_type: String,
}

/// Event fired on every DLQ mutation
#[derive(Debug, Clone)]
pub enum DlqEvent {
    /// A message was added to the queue
    MessageAdded(DeadLetterEntryId),
    /// `reprocess` succeeded and the message left the queue
    MessageReprocessed(DeadLetterEntryId),
    /// An entry was evicted, either by capacity pressure or retention sweep
    MessageExpired(DeadLetterEntryId),
}

/// Point-in-time DLQ statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DlqStats {
    /// Number of entries currently queued
    pub count: usize,
    /// Total `add` calls over the queue's lifetime, including evicted ones
    pub total_enqueued: u64,
    /// Total entries evicted for capacity pressure
    pub total_evicted: u64,
    /// Total entries evicted for retention expiry
    pub total_expired: u64,
    /// Total entries successfully reprocessed
    pub total_reprocessed: u64,
}

/// DLQ configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DlqConfig {
    /// Maximum number of entries retained; beyond this, oldest-first eviction applies
    pub max_capacity: usize,
    /// Entries older than this are evicted by the sweeper
    pub retention_period: Duration,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            retention_period: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

type DlqCallback = Arc<dyn Fn(DlqEvent) + Send + Sync>;

/// Bounded, thread-safe dead-letter queue
pub struct DeadLetterQueue {
    config: DlqConfig,
    clock: SharedClock,
    entries: DashMap<DeadLetterEntryId, DeadLetterEntry>,
    order: std::sync::Mutex<VecDeque<DeadLetterEntryId>>,
    listeners: std::sync::RwLock<Vec<DlqCallback>>,
    total_enqueued: AtomicU64,
    total_evicted: AtomicU64,
    total_expired: AtomicU64,
    total_reprocessed: AtomicU64,
}

impl DeadLetterQueue {
    /// Builds an empty DLQ
    #[must_use]
    pub fn new(config: DlqConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            entries: DashMap::new(),
            order: std::sync::Mutex::new(VecDeque::new()),
            listeners: std::sync::RwLock::new(Vec::new()),
            total_enqueued: AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
            total_expired: AtomicU64::new(0),
            total_reprocessed: AtomicU64::new(0),
        }
    }

    /// Registers a listener invoked for every [`DlqEvent`]
    pub fn on_event(&self, callback: DlqCallback) {
        self.listeners.write().unwrap().push(callback);
    }

    fn notify(&self, event: DlqEvent) {
        for listener in self.listeners.read().unwrap().iter() {
            listener(event.clone());
        }
    }

    /// Quarantines `message`, evicting the oldest entry if this push
    /// exceeds `max_capacity`
    pub fn add(&self, message: Message, error: &ConduitError) -> DeadLetterEntryId {
        let id = DeadLetterEntryId::generate();
        let entry = DeadLetterEntry {
            id,
            correlation_id: message.correlation_id,
            message_type: message.type_tag.to_string(),
            message,
            exception: error.to_string(),
            error_category: ErrorContext::classify(error).category,
            enqueued_at: self.clock.now(),
        };
        self.entries.insert(id, entry);
        let evicted = {
            let mut order = self.order.lock().unwrap();
            order.push_back(id);
            if order.len() > self.config.max_capacity {
                order.pop_front()
            } else {
                None
            }
        };
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify(DlqEvent::MessageAdded(id));
        if let Some(evicted_id) = evicted {
            self.entries.remove(&evicted_id);
            self.total_evicted.fetch_add(1, Ordering::Relaxed);
            self.notify(DlqEvent::MessageExpired(evicted_id));
        }
        id
    }

    /// Re-injects the entry's message via `redeliver`; on success removes
    /// the entry and emits `MessageReprocessed`, on failure re-annotates
    /// the existing entry with the new exception
    pub async fn reprocess<F, Fut>(&self, id: DeadLetterEntryId, redeliver: F) -> ConduitResult<()>
    where
        F: FnOnce(Message) -> Fut,
        Fut: std::future::Future<Output = ConduitResult<()>>,
    {
        let Some(entry) = self.entries.get(&id).map(|e| e.value().clone()) else {
            return Err(crate::error::ConduitError::unknown(format!(
                "no dead-letter entry with id {id}"
            )));
        };
        match redeliver(entry.message.clone()).await {
            Ok(()) => {
                self.entries.remove(&id);
                self.order.lock().unwrap().retain(|queued| *queued != id);
                self.total_reprocessed.fetch_add(1, Ordering::Relaxed);
                self.notify(DlqEvent::MessageReprocessed(id));
                Ok(())
            }
            Err(err) => {
                if let Some(mut existing) = self.entries.get_mut(&id) {
                    existing.exception = err.to_string();
                }
                Err(err)
            }
        }
    }

    /// Evicts entries whose `enqueued_at` has aged past `retention_period`
    pub fn sweep(&self) {
        let now = self.clock.now();
        let expired: Vec<DeadLetterEntryId> = self
            .entries
            .iter()
            .filter(|entry| {
                now.duration_since(entry.value().enqueued_at).unwrap_or_default()
                    >= self.config.retention_period
            })
            .map(|entry| *entry.key())
            .collect();
        for id in expired {
            self.entries.remove(&id);
            self.order.lock().unwrap().retain(|queued| *queued != id);
            self.total_expired.fetch_add(1, Ordering::Relaxed);
            self.notify(DlqEvent::MessageExpired(id));
        }
    }

    /// Looks up a single entry by id
    #[must_use]
    pub fn get(&self, id: DeadLetterEntryId) -> Option<DeadLetterEntry> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    /// Every entry currently queued, in no particular order
    #[must_use]
    pub fn get_all(&self) -> Vec<DeadLetterEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// Every entry belonging to `correlation_id`
    #[must_use]
    pub fn get_by_correlation_id(&self, correlation_id: CorrelationId) -> Vec<DeadLetterEntry> {
        self.entries
            .iter()
            .filter(|e| e.value().correlation_id == Some(correlation_id))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Every entry whose message carries `message_type`
    #[must_use]
    pub fn get_by_message_type(&self, message_type: &str) -> Vec<DeadLetterEntry> {
        self.entries
            .iter()
            .filter(|e| e.value().message_type == message_type)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Every entry whose quarantining error was classified as `category`
    #[must_use]
    pub fn get_by_error_type(&self, category: Category) -> Vec<DeadLetterEntry> {
        self.entries
            .iter()
            .filter(|e| e.value().error_category == category)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Snapshots the full `{entryId -> DeadLetterEntry}` mapping for an
    /// external collaborator to persist; preserves the enqueue timestamp
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeadLetterEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// Restores entries from a prior [`snapshot`](Self::snapshot), replacing
    /// the current contents
    pub fn restore(&self, entries: Vec<DeadLetterEntry>) {
        self.entries.clear();
        let mut order = self.order.lock().unwrap();
        order.clear();
        for entry in entries {
            order.push_back(entry.id);
            self.entries.insert(entry.id, entry);
        }
    }

    /// Current DLQ statistics
    #[must_use]
    pub fn stats(&self) -> DlqStats {
        DlqStats {
            count: self.entries.len(),
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
            total_expired: self.total_expired.load(Ordering::Relaxed),
            total_reprocessed: self.total_reprocessed.load(Ordering::Relaxed),
        }
    }
}
