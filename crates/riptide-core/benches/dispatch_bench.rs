//! Dispatcher benchmarks
//!
//! Measures the cost of handing tasks to each dispatcher kind.
//!
//! Performance targets:
//! - Ring buffer dispatch round trip (submit, run, observe): < 1μs
//! - Synchronous dispatch: < 30ns
//! - Ring buffer dispatch (per task, batch of 10k): < 150ns
//! - Worker pool dispatch (per task, batch of 10k): < 500ns
//!
//! Run with: cargo bench --bench dispatch_bench

use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use riptide_core::dispatch::{
    self, DispatcherConfig, DispatcherKind, SynchronousDispatcher, WaitStrategy,
};
use riptide_core::Dispatcher;

fn wait_for(counter: &AtomicU64, target: u64) {
    while counter.load(Ordering::Acquire) < target {
        std::hint::spin_loop();
    }
}

fn bench_ring_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_round_trip");

    for strategy in [WaitStrategy::Spin, WaitStrategy::SpinYield] {
        let config = DispatcherConfig::builder()
            .name(format!("ring-{strategy:?}").to_lowercase())
            .kind(DispatcherKind::RingBuffer)
            .capacity(1024)
            .wait_strategy(strategy)
            .build();
        let dispatcher = dispatch::from_config(&config).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        group.bench_function(BenchmarkId::from_parameter(&config.name), |b| {
            b.iter(|| {
                let target = counter.load(Ordering::Acquire) + 1;
                let c = Arc::clone(&counter);
                dispatcher
                    .dispatch(Box::new(move || {
                        c.fetch_add(black_box(1), Ordering::Release);
                    }))
                    .unwrap();
                wait_for(&counter, target);
            });
        });
        dispatcher.shutdown();
    }

    group.finish();
}

fn bench_synchronous(c: &mut Criterion) {
    let dispatcher = SynchronousDispatcher::new("bench");
    let counter = Arc::new(AtomicU64::new(0));

    c.bench_function("dispatch/sync", |b| {
        b.iter(|| {
            let counter = Arc::clone(&counter);
            dispatcher
                .dispatch(Box::new(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                }))
                .unwrap();
        });
    });
}

fn bench_async_dispatchers(c: &mut Criterion) {
    const TASKS: u64 = 10_000;
    let mut group = c.benchmark_group("dispatch_batch");
    group.throughput(Throughput::Elements(TASKS));

    let configs = [
        DispatcherConfig::builder()
            .name("ring-spin")
            .kind(DispatcherKind::RingBuffer)
            .capacity(4096)
            .wait_strategy(WaitStrategy::SpinYield)
            .build(),
        DispatcherConfig::builder()
            .name("ring-park")
            .kind(DispatcherKind::RingBuffer)
            .capacity(4096)
            .wait_strategy(WaitStrategy::Park)
            .build(),
        DispatcherConfig::builder()
            .name("pool")
            .kind(DispatcherKind::WorkerPool)
            .capacity(4096)
            .workers(4)
            .build(),
    ];

    for config in &configs {
        let dispatcher = dispatch::from_config(config).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        group.bench_function(BenchmarkId::from_parameter(&config.name), |b| {
            b.iter(|| {
                let start = counter.load(Ordering::Acquire);
                for _ in 0..TASKS {
                    let counter = Arc::clone(&counter);
                    dispatcher
                        .dispatch(Box::new(move || {
                            counter.fetch_add(1, Ordering::Release);
                        }))
                        .unwrap();
                }
                wait_for(&counter, start + TASKS);
            });
        });
        dispatcher.shutdown();
    }

    group.finish();
}

criterion_group!(ring_benches, bench_ring_round_trip);
criterion_group!(dispatcher_benches, bench_synchronous, bench_async_dispatchers);
criterion_main!(ring_benches, dispatcher_benches);
