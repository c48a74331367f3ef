//! Flow controller: admission control for the dispatcher
//!
//! Bounds the number of in-flight messages, throttles admission through a
//! token-bucket rate limiter, and rejects excess waiters once the queue
//! grows past `max_queue_size` rather than letting it grow unbounded.
//!
//! **Priority fairness** (spec Open Question, decided in `SPEC_FULL.md`
//! §4): admission favors higher priorities, but a priority class cannot
//! starve lower ones indefinitely. Each class tracks how many permits it
//! has been granted in a row; once a class reaches `fairness_bound`
//! consecutive grants, the next grant is forced to the highest-priority
//! *other* class with an outstanding waiter, then the counter resets.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

use crate::error::{ConduitError, ConduitResult};
use crate::message::Priority;

/// Configuration knobs recognized by the flow controller (spec §6)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlowControllerConfig {
    /// Maximum number of messages admitted concurrently
    pub max_concurrent_messages: usize,
    /// Token-bucket refill rate, in permits per second
    pub rate_limit_per_second: u32,
    /// Maximum number of callers allowed to wait for a permit at once
    pub max_queue_size: usize,
    /// Consecutive grants a priority class may receive before a lower class is promoted
    pub fairness_bound: u32,
}

impl Default for FlowControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_messages: num_cpus::get() * 4,
            rate_limit_per_second: 1_000,
            max_queue_size: 10_000,
            fairness_bound: 8,
        }
    }
}

/// A granted admission; dropping it releases the concurrency slot
#[derive(Debug)]
pub struct Permit<'a> {
    _semaphore: SemaphorePermit<'a>,
    in_flight: &'a AtomicU64,
}

/// Point-in-time admission statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowControllerStats {
    /// Number of callers currently waiting for a permit
    pub queue_depth: usize,
    /// Number of permits currently outstanding
    pub in_flight: usize,
    /// Number of admission attempts rejected by backpressure
    pub rejected_count: u64,
    /// `false` when `queue_depth` exceeds 90% of `max_queue_size`
    pub is_healthy: bool,
}

struct PriorityFairness {
    consecutive_grants: BTreeMap<u8, u32>,
    last_granted_priority: Option<u8>,
}

impl PriorityFairness {
    fn new() -> Self {
        Self {
            consecutive_grants: BTreeMap::new(),
            last_granted_priority: None,
        }
    }

    /// Chooses which waiting priority to admit next out of `waiting`
    /// (non-empty), honoring the fairness bound.
    fn choose(&mut self, waiting: &BTreeMap<u8, usize>, fairness_bound: u32) -> u8 {
        let highest = *waiting.keys().next_back().expect("waiting is non-empty");
        let Some(last) = self.last_granted_priority else {
            return highest;
        };
        let streak = self.consecutive_grants.get(&last).copied().unwrap_or(0);
        if last == highest || streak < fairness_bound {
            return highest;
        }
        // Promote the next-highest class that still has a waiter.
        waiting
            .keys()
            .rev()
            .find(|&&p| p != highest)
            .copied()
            .unwrap_or(highest)
    }

    fn record_grant(&mut self, priority: u8) {
        if self.last_granted_priority == Some(priority) {
            *self.consecutive_grants.entry(priority).or_insert(0) += 1;
        } else {
            self.consecutive_grants.insert(priority, 1);
        }
        self.last_granted_priority = Some(priority);
    }
}

/// Gates admission to the dispatcher
pub struct FlowController {
    config: FlowControllerConfig,
    semaphore: Semaphore,
    rate_limiter: Mutex<TokenBucket>,
    waiting: Mutex<BTreeMap<u8, usize>>,
    fairness: Mutex<PriorityFairness>,
    in_flight: AtomicU64,
    rejected: AtomicU64,
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_second: f64,
    last_refill: std::time::Instant,
}

impl TokenBucket {
    fn new(rate_per_second: u32) -> Self {
        Self {
            tokens: f64::from(rate_per_second),
            capacity: f64::from(rate_per_second).max(1.0),
            refill_per_second: f64::from(rate_per_second),
            last_refill: std::time::Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = std::time::Instant::now();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl FlowController {
    /// Builds a flow controller from its configuration
    #[must_use]
    pub fn new(config: FlowControllerConfig) -> Self {
        Self {
            semaphore: Semaphore::new(config.max_concurrent_messages),
            rate_limiter: Mutex::new(TokenBucket::new(config.rate_limit_per_second)),
            waiting: Mutex::new(BTreeMap::new()),
            fairness: Mutex::new(PriorityFairness::new()),
            in_flight: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            config,
        }
    }

    /// Attempts to acquire an admission permit for a message at `priority`
    ///
    /// Fails immediately with `BackpressureRejected` if the wait queue is
    /// already at `max_queue_size`; otherwise waits for both a concurrency
    /// slot and a rate-limiter token, honoring priority fairness.
    pub async fn acquire_permit(&self, priority: Priority) -> ConduitResult<Permit<'_>> {
        {
            let mut waiting = self.waiting.lock().await;
            let total_waiting: usize = waiting.values().sum();
            if total_waiting >= self.config.max_queue_size {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(ConduitError::BackpressureRejected);
            }
            *waiting.entry(priority.value()).or_insert(0) += 1;
        }

        let result = self.wait_for_admission(priority).await;

        {
            let mut waiting = self.waiting.lock().await;
            if let Some(count) = waiting.get_mut(&priority.value()) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    waiting.remove(&priority.value());
                }
            }
        }

        result
    }

    async fn wait_for_admission(&self, priority: Priority) -> ConduitResult<Permit<'_>> {
        loop {
            {
                let waiting = self.waiting.lock().await;
                let mut fairness = self.fairness.lock().await;
                let chosen = fairness.choose(&waiting, self.config.fairness_bound);
                if chosen != priority.value() {
                    drop(waiting);
                    drop(fairness);
                    tokio::task::yield_now().await;
                    continue;
                }
            }

            loop {
                let mut bucket = self.rate_limiter.lock().await;
                if bucket.try_take() {
                    break;
                }
                drop(bucket);
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }

            let semaphore_permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|_| ConduitError::Cancelled)?;

            self.fairness.lock().await.record_grant(priority.value());
            self.in_flight.fetch_add(1, Ordering::Relaxed);
            return Ok(Permit {
                _semaphore: semaphore_permit,
                in_flight: &self.in_flight,
            });
        }
    }

    /// Point-in-time admission statistics
    pub async fn stats(&self) -> FlowControllerStats {
        let waiting = self.waiting.lock().await;
        let queue_depth: usize = waiting.values().sum();
        let is_healthy = (queue_depth as f64) <= 0.9 * (self.config.max_queue_size as f64);
        FlowControllerStats {
            queue_depth,
            in_flight: self.in_flight.load(Ordering::Relaxed) as usize,
            rejected_count: self.rejected.load(Ordering::Relaxed),
            is_healthy,
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn admits_up_to_concurrency_limit() {
        let controller = FlowController::new(FlowControllerConfig {
            max_concurrent_messages: 1,
            rate_limit_per_second: 1_000,
            max_queue_size: 10,
            fairness_bound: 4,
        });
        let _permit = controller.acquire_permit(Priority::new(5)).await.unwrap();
        let stats = controller.stats().await;
        assert_eq!(stats.in_flight, 1);
    }

    #[tokio::test]
    async fn backpressure_rejects_past_queue_size() {
        let controller = Arc::new(FlowController::new(FlowControllerConfig {
            max_concurrent_messages: 1,
            rate_limit_per_second: 1_000,
            max_queue_size: 0,
            fairness_bound: 4,
        }));
        let err = controller.acquire_permit(Priority::new(5)).await.unwrap_err();
        assert!(matches!(err, ConduitError::BackpressureRejected));
    }
}
