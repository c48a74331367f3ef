//! Micro-benchmark for the pure retry delay computation, across strategies.

use conduit_core::resilience::{RetryConfig, Strategy};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

fn config(strategy: Strategy) -> RetryConfig {
    RetryConfig {
        strategy,
        max_retries: 8,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(30),
        backoff_multiplier: 2.0,
        jitter_factor: 0.0,
        retryable_predicate: None,
    }
}

fn bench_base_delay(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_base_delay");
    for strategy in [
        Strategy::FixedDelay,
        Strategy::LinearBackoff,
        Strategy::ExponentialBackoff,
        Strategy::Fibonacci,
    ] {
        let cfg = config(strategy);
        group.bench_function(format!("{strategy:?}"), |b| {
            b.iter(|| {
                for attempt in 1..=8 {
                    black_box(cfg.base_delay(attempt));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_base_delay);
criterion_main!(benches);
