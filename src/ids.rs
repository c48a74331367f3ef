//! Strongly-typed identifiers shared across the bus
//!
//! Every identifier that flows through Conduit is a `nutype` newtype over a
//! UUID or a validated primitive rather than a bare `String`/`u64`, so that a
//! `ComponentId` can never be passed where a `MessageId` is expected.

use nutype::nutype;
use uuid::Uuid;

/// Unique identifier for a [`crate::message::Message`]
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a new random message id
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Identifier shared by all messages in one logical conversation
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into
))]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a new random correlation id
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Identifier of the message that directly caused this one
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into
))]
pub struct CausationId(Uuid);

impl CausationId {
    /// Generates a new random causation id
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Identifier of a loaded [`crate::component::Component`]
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into
))]
pub struct ComponentId(Uuid);

impl ComponentId {
    /// Generates a new random component id
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// Deterministic id derived from a manifest's declared name, so that
    /// re-discovering the same component across a restart yields the same id.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self::new(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }
}

/// Identifier of a [`crate::correlator::dlq::DeadLetterEntry`]
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into
))]
pub struct DeadLetterEntryId(Uuid);

impl DeadLetterEntryId {
    /// Generates a new random dead-letter entry id
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Identifier of a classified failure fed to the `ErrorAggregator`
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into
))]
pub struct ErrorId(Uuid);

impl ErrorId {
    /// Generates a new random error id
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Identifier of an active [`crate::transport::traits::TransportSubscription`]
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into
))]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Generates a new random subscription id
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Fully-qualified message type tag used for routing and registration
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 512),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct TypeTag(String);

impl TypeTag {
    /// Builds a type tag from any displayable value, for call sites that
    /// derive the tag from a Rust type name via `std::any::type_name`.
    #[must_use]
    pub fn from_static(name: &'static str) -> Self {
        Self::try_new(name).expect("static type names are always valid type tags")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(MessageId::generate(), MessageId::generate());
    }

    #[test]
    fn component_id_from_name_is_deterministic() {
        assert_eq!(
            ComponentId::from_name("conduit.retry"),
            ComponentId::from_name("conduit.retry")
        );
        assert_ne!(
            ComponentId::from_name("conduit.retry"),
            ComponentId::from_name("conduit.fallback")
        );
    }

    #[test]
    fn type_tag_rejects_empty() {
        assert!(TypeTag::try_new(String::new()).is_err());
    }
}
