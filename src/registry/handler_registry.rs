//! Thread-safe handler registry
//!
//! Command and query bindings are exclusive per type tag; event bindings
//! form a set. Mutation is thread-safe and every mutation is immediately
//! visible to concurrent readers — `dashmap`'s sharded locking gives
//! lock-free snapshot reads without a dedicated mutation lock, matching the
//! teacher's `agent_registry.rs` O(1) capability-indexed lookup pattern.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{ConduitError, ConduitResult};
use crate::ids::TypeTag;
use crate::registry::traits::{CommandHandler, EventHandler, QueryHandler};

/// Owns every handler binding for the bus
#[derive(Default)]
pub struct HandlerRegistry {
    commands: DashMap<TypeTag, Arc<dyn CommandHandler>>,
    queries: DashMap<TypeTag, Arc<dyn QueryHandler>>,
    events: DashMap<TypeTag, Vec<Arc<dyn EventHandler>>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("commands", &self.commands.len())
            .field("queries", &self.queries.len())
            .field("events", &self.events.len())
            .finish()
    }
}

impl HandlerRegistry {
    /// Builds an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `type_tag`; fails if a command handler is already bound
    pub fn register_command_handler(
        &self,
        type_tag: TypeTag,
        handler: Arc<dyn CommandHandler>,
    ) -> ConduitResult<()> {
        match self.commands.entry(type_tag.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(
                ConduitError::HandlerAlreadyRegistered(type_tag.to_string()),
            ),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    /// Binds `handler` to `type_tag`; fails if a query handler is already bound
    pub fn register_query_handler(
        &self,
        type_tag: TypeTag,
        handler: Arc<dyn QueryHandler>,
    ) -> ConduitResult<()> {
        match self.queries.entry(type_tag.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(
                ConduitError::HandlerAlreadyRegistered(type_tag.to_string()),
            ),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    /// Appends `handler` to the event handler set for `type_tag`
    pub fn register_event_handler(&self, type_tag: TypeTag, handler: Arc<dyn EventHandler>) {
        self.events.entry(type_tag).or_default().push(handler);
    }

    /// Removes the command handler for `type_tag`, returning whether one was present
    pub fn unregister_command_handler(&self, type_tag: &TypeTag) -> bool {
        self.commands.remove(type_tag).is_some()
    }

    /// Removes the query handler for `type_tag`, returning whether one was present
    pub fn unregister_query_handler(&self, type_tag: &TypeTag) -> bool {
        self.queries.remove(type_tag).is_some()
    }

    /// Removes every event handler bound at `type_tag`, returning whether any were present
    pub fn unregister_event_handlers(&self, type_tag: &TypeTag) -> bool {
        self.events.remove(type_tag).is_some()
    }

    /// Looks up the command handler bound to `type_tag`, if any
    #[must_use]
    pub fn get_command_handler(&self, type_tag: &TypeTag) -> Option<Arc<dyn CommandHandler>> {
        self.commands.get(type_tag).map(|entry| Arc::clone(entry.value()))
    }

    /// Looks up the query handler bound to `type_tag`, if any
    #[must_use]
    pub fn get_query_handler(&self, type_tag: &TypeTag) -> Option<Arc<dyn QueryHandler>> {
        self.queries.get(type_tag).map(|entry| Arc::clone(entry.value()))
    }

    /// Looks up every event handler bound to `type_tag`
    #[must_use]
    pub fn get_event_handlers(&self, type_tag: &TypeTag) -> Vec<Arc<dyn EventHandler>> {
        self.events
            .get(type_tag)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Drops every registration
    pub fn clear(&self) {
        self.commands.clear();
        self.queries.clear();
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, MessageContext};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl CommandHandler for Noop {
        async fn handle(&self, _message: Message, _context: MessageContext) -> ConduitResult<Vec<u8>> {
            Ok(vec![])
        }
    }

    #[async_trait]
    impl EventHandler for Noop {
        async fn handle(&self, _message: Message, _context: MessageContext) -> ConduitResult<()> {
            Ok(())
        }
    }

    fn tag(name: &str) -> TypeTag {
        TypeTag::try_new(name).unwrap()
    }

    #[test]
    fn second_command_registration_fails() {
        let registry = HandlerRegistry::new();
        let tag = tag("conduit.test.order-create");
        registry
            .register_command_handler(tag.clone(), Arc::new(Noop))
            .unwrap();
        let err = registry
            .register_command_handler(tag.clone(), Arc::new(Noop))
            .unwrap_err();
        assert!(matches!(err, ConduitError::HandlerAlreadyRegistered(_)));
        assert!(registry.get_command_handler(&tag).is_some());
    }

    #[test]
    fn event_handlers_accumulate() {
        let registry = HandlerRegistry::new();
        let tag = tag("conduit.test.order-created");
        registry.register_event_handler(tag.clone(), Arc::new(Noop));
        registry.register_event_handler(tag.clone(), Arc::new(Noop));
        assert_eq!(registry.get_event_handlers(&tag).len(), 2);
    }

    #[test]
    fn clear_drops_everything() {
        let registry = HandlerRegistry::new();
        let tag = tag("conduit.test.order-create");
        registry
            .register_command_handler(tag.clone(), Arc::new(Noop))
            .unwrap();
        registry.clear();
        assert!(registry.get_command_handler(&tag).is_none());
    }
}
