//! Wire envelope
//!
//! `TransportMessage` is the wire-level counterpart to [`crate::message::Message`]:
//! it adds the fields a transport needs to route and frame bytes
//! (source/destination, content negotiation, expiry, priority) that have
//! no meaning once a message reaches a handler.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::ids::{CausationId, CorrelationId, MessageId};
use crate::message::Priority;

/// Parsed `kind://name` transport destination, defaulting to `queue` when
/// no scheme is present
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    /// Transport-specific routing kind, e.g. `queue`, `topic`
    pub kind: String,
    /// Addressable name within `kind`
    pub name: String,
}

impl Destination {
    /// Default routing kind used when a URI carries no `scheme://`
    pub const DEFAULT_KIND: &'static str = "queue";

    /// Parses a `kind://name` URI, falling back to `queue://<uri>` when no
    /// scheme separator is present
    #[must_use]
    pub fn parse(uri: &str) -> Self {
        match uri.split_once("://") {
            Some((kind, name)) => Self {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            None => Self {
                kind: Self::DEFAULT_KIND.to_string(),
                name: uri.to_string(),
            },
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.kind, self.name)
    }
}

/// The wire-level envelope a transport sends and receives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportMessage {
    /// Identity, shared with the application-level `Message` it wraps
    pub message_id: MessageId,
    /// Conversation this message belongs to
    pub correlation_id: Option<CorrelationId>,
    /// Immediate predecessor message, if any
    pub causation_id: Option<CausationId>,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// MIME-ish content type, e.g. `application/json`
    pub content_type: String,
    /// Content encoding, e.g. `identity`, `gzip`
    pub content_encoding: String,
    /// Application-level type tag
    pub type_tag: String,
    /// Where this message originated, if known
    pub source: Option<Destination>,
    /// Where this message is addressed, if any
    pub destination: Option<Destination>,
    /// Destination a response should be sent to, if this is a request
    pub reply_to: Option<Destination>,
    /// Wall-clock time this envelope was created
    pub timestamp: SystemTime,
    /// Wall-clock time after which this envelope must not be delivered
    pub expires_at: Option<SystemTime>,
    /// 0-10 priority scale, see [`Priority`]
    pub priority: Priority,
    /// Whether the transport should persist this message across restarts
    pub persistent: bool,
    /// Number of delivery attempts made so far
    pub delivery_attempts: u32,
    /// String-keyed headers carried alongside the payload
    pub headers: std::collections::HashMap<String, String>,
}

impl TransportMessage {
    /// Whether `now` is past this envelope's `expires_at`, if any is set
    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_parses_scheme_and_name() {
        let destination = Destination::parse("queue://replies");
        assert_eq!(destination.kind, "queue");
        assert_eq!(destination.name, "replies");
    }

    #[test]
    fn destination_without_scheme_defaults_to_queue() {
        let destination = Destination::parse("replies");
        assert_eq!(destination.kind, "queue");
        assert_eq!(destination.name, "replies");
    }

    #[test]
    fn expired_message_is_detected() {
        let now = SystemTime::now();
        let message = TransportMessage {
            message_id: MessageId::generate(),
            correlation_id: None,
            causation_id: None,
            payload: Vec::new(),
            content_type: "application/json".into(),
            content_encoding: "identity".into(),
            type_tag: "test.message".into(),
            source: None,
            destination: None,
            reply_to: None,
            timestamp: now,
            expires_at: Some(now - std::time::Duration::from_secs(1)),
            priority: Priority::new(5),
            persistent: false,
            delivery_attempts: 0,
            headers: std::collections::HashMap::new(),
        };
        assert!(message.is_expired(now));
    }
}
