//! End-to-end resilience scenarios: retry exhaustion landing a command in
//! the dead-letter queue, and a dead-lettered message recovering once the
//! handler that originally failed it starts succeeding.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::config::ConduitConfig;
use conduit_core::error::{ConduitError, ConduitResult};
use conduit_core::ids::TypeTag;
use conduit_core::message::{Message, MessageContext};
use conduit_core::registry::CommandHandler;
use conduit_core::ConduitBus;
use test_log::test;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct FlakyHandler {
    calls: AtomicU32,
    succeed_after: u32,
}

#[async_trait]
impl CommandHandler for FlakyHandler {
    async fn handle(&self, message: Message, _context: MessageContext) -> ConduitResult<Vec<u8>> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.succeed_after {
            Err(ConduitError::Network("downstream unreachable".into()))
        } else {
            Ok(message.payload)
        }
    }
}

fn command_tag() -> TypeTag {
    TypeTag::try_new("conduit.test.flaky-command").unwrap()
}

#[test(tokio::test)]
async fn exhausted_retries_dead_letter_the_command() {
    init_tracing();
    let (bus, _events) = ConduitBus::new(ConduitConfig::testing());
    let handler = Arc::new(FlakyHandler {
        calls: AtomicU32::new(0),
        succeed_after: u32::MAX,
    });
    bus.register_command_handler(command_tag(), handler.clone()).unwrap();

    let message = Message::new(command_tag(), b"order-42".to_vec());
    let err = bus
        .send_command(message, MessageContext::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ConduitError::Network(_)));
    assert!(handler.calls.load(Ordering::SeqCst) >= 4, "expected initial attempt plus retries");

    let metrics = bus.metrics().await;
    assert_eq!(metrics.dlq.count, 1);
    assert_eq!(metrics.dlq.total_enqueued, 1);
}

#[test(tokio::test)]
async fn dead_lettered_command_recovers_on_reprocess() {
    let (bus, _events) = ConduitBus::new(ConduitConfig::testing());
    let handler = Arc::new(FlakyHandler {
        calls: AtomicU32::new(0),
        succeed_after: u32::MAX,
    });
    bus.register_command_handler(command_tag(), handler.clone()).unwrap();

    let message = Message::new(command_tag(), b"order-43".to_vec());
    bus.send_command(message, MessageContext::default())
        .await
        .expect_err("handler never succeeds yet");

    let entries = bus.dead_letters();
    assert_eq!(entries.len(), 1);

    // `reprocess_dead_letter` republishes through the dispatcher's event
    // path, so recovery is modeled with an event handler bound to the same
    // type tag rather than the original command handler.
    struct RecoveredEventHandler(Arc<AtomicU32>);
    #[async_trait]
    impl conduit_core::registry::EventHandler for RecoveredEventHandler {
        async fn handle(&self, _message: Message, _context: MessageContext) -> ConduitResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
    let recovered = Arc::new(AtomicU32::new(0));
    bus.register_event_handler(command_tag(), Arc::new(RecoveredEventHandler(recovered.clone())));

    bus.reprocess_dead_letter(entries[0].id).await.unwrap();
    assert_eq!(recovered.load(Ordering::SeqCst), 1);
    assert_eq!(bus.dead_letters().len(), 0);
}
