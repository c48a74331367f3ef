//! `Message` and `MessageContext` — the unit of work flowing through the bus
//!
//! A [`Message`] is the immutable payload a producer hands to the
//! dispatcher. A [`MessageContext`] is the mutable per-delivery envelope the
//! behavior pipeline and resilience policies thread alongside it; the
//! pipeline may attach scratch data to the context but must never mutate the
//! message payload in place.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorContext;
use crate::ids::{CausationId, CorrelationId, MessageId, TypeTag};

/// A header value: any JSON scalar, matching the wire envelope's
/// `mapping<string, scalar>` field layout.
pub type HeaderValue = Value;

/// Unit of work flowing through the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identity of this message; auto-generated at ingress if absent
    pub id: MessageId,
    /// Identifier shared by every message in this logical conversation
    pub correlation_id: Option<CorrelationId>,
    /// Identifier of the message that directly produced this one
    pub causation_id: Option<CausationId>,
    /// Fully-qualified type tag used for routing
    pub type_tag: TypeTag,
    /// Arbitrary string-keyed scalar headers
    pub headers: HashMap<String, HeaderValue>,
    /// Wall-clock instant the message was created
    pub timestamp: SystemTime,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
}

impl Message {
    /// Builds a new message with a freshly generated id and the current
    /// timestamp; `correlation_id` defaults to a new id, matching spec's
    /// invariant that a `correlation_id` is always present at ingress.
    #[must_use]
    pub fn new(type_tag: TypeTag, payload: Vec<u8>) -> Self {
        Self {
            id: MessageId::generate(),
            correlation_id: Some(CorrelationId::generate()),
            causation_id: None,
            type_tag,
            headers: HashMap::new(),
            timestamp: SystemTime::now(),
            payload,
        }
    }

    /// Builds a message that is causally downstream of `parent`, propagating
    /// `parent`'s `correlation_id` unchanged and setting `causation_id` to
    /// name `parent` directly.
    #[must_use]
    pub fn caused_by(parent: &Message, type_tag: TypeTag, payload: Vec<u8>) -> Self {
        Self {
            id: MessageId::generate(),
            correlation_id: parent.correlation_id,
            causation_id: Some(CausationId::new(parent.id.into_inner())),
            type_tag,
            headers: HashMap::new(),
            timestamp: SystemTime::now(),
            payload,
        }
    }

    /// Attaches a header, returning `self` for chaining
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Delivery priority, 0 (lowest) through 10 (highest), matching the wire
/// envelope's `priority: integer 0..10 (default 5)` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(u8);

impl Default for Priority {
    fn default() -> Self {
        Self(5)
    }
}

impl Priority {
    /// Lowest valid priority
    pub const MIN: u8 = 0;
    /// Highest valid priority
    pub const MAX: u8 = 10;

    /// Builds a priority from a raw 0-10 value, clamping out-of-range input
    #[must_use]
    pub fn new(value: u8) -> Self {
        Self(value.min(Self::MAX))
    }

    /// Raw 0-10 value
    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    /// Maps onto the canonical bucketing table a native-priority transport uses:
    /// `{0-1: Lowest, 2-3: VeryLow, 4: Low, 5-6: Normal, 7-8: High, 9: VeryHigh, 10: Highest}`.
    #[must_use]
    pub fn bucket(self) -> PriorityBucket {
        match self.0 {
            0..=1 => PriorityBucket::Lowest,
            2..=3 => PriorityBucket::VeryLow,
            4 => PriorityBucket::Low,
            5..=6 => PriorityBucket::Normal,
            7..=8 => PriorityBucket::High,
            9 => PriorityBucket::VeryHigh,
            _ => PriorityBucket::Highest,
        }
    }
}

/// Native priority bucket a transport with a fixed priority enum maps onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriorityBucket {
    /// Priorities 0-1
    Lowest,
    /// Priorities 2-3
    VeryLow,
    /// Priority 4
    Low,
    /// Priorities 5-6
    Normal,
    /// Priorities 7-8
    High,
    /// Priority 9
    VeryHigh,
    /// Priority 10
    Highest,
}

/// Per-delivery mutable state threaded alongside a [`Message`] through the
/// behavior pipeline and resilience policies
#[derive(Debug, Clone)]
pub struct MessageContext {
    /// Number of retry attempts made for this delivery so far
    pub retry_count: u32,
    /// Number of times this message has been handed to a handler, including
    /// the first attempt; best-effort per spec's redelivery-counter caveat.
    pub delivery_count: u32,
    /// Delivery priority
    pub priority: Priority,
    /// Instant after which this message must not be delivered to a handler
    pub expires_at: Option<SystemTime>,
    /// Instant processing began
    pub processing_start: Option<SystemTime>,
    /// Instant processing ended (success or failure)
    pub processing_end: Option<SystemTime>,
    /// Classified failure from the most recent handling attempt, if any
    pub fault: Option<ErrorContext>,
    /// Whether the message has been acknowledged to its source transport
    pub is_acknowledged: bool,
    /// Scratch space behaviors may attach data to without touching the payload
    pub items: HashMap<String, Value>,
    /// Identifier of the message that caused this delivery, for nested dispatch
    pub parent: Option<MessageId>,
    /// Nesting depth of causally-chained dispatch (0 at ingress)
    pub depth: u32,
}

impl Default for MessageContext {
    fn default() -> Self {
        Self {
            retry_count: 0,
            delivery_count: 0,
            priority: Priority::default(),
            expires_at: None,
            processing_start: None,
            processing_end: None,
            fault: None,
            is_acknowledged: false,
            items: HashMap::new(),
            parent: None,
            depth: 0,
        }
    }
}

impl MessageContext {
    /// Builds a fresh context for an ingress delivery at the given priority
    #[must_use]
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    /// Whether `expires_at` names an instant already in the past relative to `now`
    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    /// Marks processing as started at `now`
    pub fn begin_processing(&mut self, now: SystemTime) {
        self.processing_start = Some(now);
        self.delivery_count += 1;
    }

    /// Marks processing as ended at `now`, recording `fault` when the
    /// attempt failed
    pub fn end_processing(&mut self, now: SystemTime, fault: Option<ErrorContext>) {
        self.processing_end = Some(now);
        self.fault = fault;
    }

    /// Builds a child context for nested dispatch caused by `self`'s message
    #[must_use]
    pub fn child_of(&self, parent: MessageId) -> Self {
        Self {
            priority: self.priority,
            parent: Some(parent),
            depth: self.depth + 1,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag() -> TypeTag {
        TypeTag::try_new("conduit.test.ping").unwrap()
    }

    #[test]
    fn new_message_has_id_and_correlation_id() {
        let msg = Message::new(tag(), vec![1, 2, 3]);
        assert_ne!(msg.id, MessageId::generate());
        assert!(msg.correlation_id.is_some());
    }

    #[test]
    fn caused_by_propagates_correlation_id() {
        let parent = Message::new(tag(), vec![]);
        let child = Message::caused_by(&parent, tag(), vec![]);
        assert_eq!(child.correlation_id, parent.correlation_id);
        assert_eq!(child.causation_id.unwrap().into_inner(), parent.id.into_inner());
    }

    #[test]
    fn priority_clamps_out_of_range() {
        assert_eq!(Priority::new(200).value(), Priority::MAX);
    }

    #[test]
    fn priority_bucket_table_matches_spec() {
        assert_eq!(Priority::new(0).bucket(), PriorityBucket::Lowest);
        assert_eq!(Priority::new(1).bucket(), PriorityBucket::Lowest);
        assert_eq!(Priority::new(2).bucket(), PriorityBucket::VeryLow);
        assert_eq!(Priority::new(4).bucket(), PriorityBucket::Low);
        assert_eq!(Priority::new(5).bucket(), PriorityBucket::Normal);
        assert_eq!(Priority::new(6).bucket(), PriorityBucket::Normal);
        assert_eq!(Priority::new(7).bucket(), PriorityBucket::High);
        assert_eq!(Priority::new(9).bucket(), PriorityBucket::VeryHigh);
        assert_eq!(Priority::new(10).bucket(), PriorityBucket::Highest);
    }

    #[test]
    fn context_expiry() {
        let mut ctx = MessageContext::default();
        let now = SystemTime::now();
        assert!(!ctx.is_expired(now));
        ctx.expires_at = Some(now - std::time::Duration::from_secs(1));
        assert!(ctx.is_expired(now));
    }

    #[test]
    fn child_context_increments_depth() {
        let parent_ctx = MessageContext::default();
        let child = parent_ctx.child_of(MessageId::generate());
        assert_eq!(child.depth, 1);
    }
}
