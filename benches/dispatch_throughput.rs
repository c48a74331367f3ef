//! Dispatcher hot-path benchmarks: command dispatch latency under an
//! always-succeeding handler, at increasing concurrency.

use async_trait::async_trait;
use conduit_core::config::ConduitConfig;
use conduit_core::error::ConduitResult;
use conduit_core::ids::TypeTag;
use conduit_core::message::{Message, MessageContext};
use conduit_core::registry::CommandHandler;
use conduit_core::ConduitBus;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

struct Echo;

#[async_trait]
impl CommandHandler for Echo {
    async fn handle(&self, message: Message, _context: MessageContext) -> ConduitResult<Vec<u8>> {
        Ok(message.payload)
    }
}

fn bench_send_command(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let tag = TypeTag::try_new("bench.echo").unwrap();

    let mut group = c.benchmark_group("send_command");
    for concurrency in [1, 8, 64].iter() {
        group.bench_with_input(
            BenchmarkId::new("concurrent_dispatch", concurrency),
            concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| async {
                    let (bus, _events) = ConduitBus::new(ConduitConfig::production());
                    bus.register_command_handler(tag.clone(), Arc::new(Echo)).unwrap();
                    let bus = Arc::clone(&bus);

                    let mut handles = Vec::with_capacity(concurrency);
                    for i in 0..concurrency {
                        let bus = Arc::clone(&bus);
                        let tag = tag.clone();
                        handles.push(tokio::spawn(async move {
                            let message = Message::new(tag, i.to_le_bytes().to_vec());
                            bus.send_command(message, MessageContext::default()).await
                        }));
                    }
                    for handle in handles {
                        black_box(handle.await.unwrap().unwrap());
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_send_command);
criterion_main!(benches);
