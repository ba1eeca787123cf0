//! Pipeline benchmarks
//!
//! Measures end-to-end element throughput through operator chains, with and
//! without a dispatcher boundary, and broadcaster fan-out.
//!
//! Performance targets:
//! - Synchronous map/filter chain: < 100ns per element
//! - Chain across a ring buffer dispatcher: < 300ns per element
//! - Broadcaster publish to 4 subscribers: < 400ns per element
//!
//! Run with: cargo bench --bench pipeline_bench

use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use riptide_core::{Broadcaster, Environment, EnvironmentConfig, Stream, Streams};

fn run_to_completion<T: Send + 'static>(stream: &Stream<T>) -> u64 {
    let (tx, rx) = mpsc::channel();
    let seen = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&seen);
    let failed = tx.clone();
    let _control = stream.consume_with(
        move |v| {
            black_box(v);
            counter.fetch_add(1, Ordering::Relaxed);
        },
        move |_| {
            let _ = failed.send(());
        },
        move || {
            let _ = tx.send(());
        },
    );
    let _ = rx.recv();
    seen.load(Ordering::Relaxed)
}

fn bench_sync_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_chain");

    for size in [1_000_i64, 100_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("map_filter", size), &size, |b, &size| {
            let pipeline = Streams::range(0, size)
                .map(|v| Ok(v * 3))
                .filter(|v| Ok(v % 2 == 0));
            b.iter(|| run_to_completion(&pipeline));
        });
        group.bench_with_input(BenchmarkId::new("buffer_64", size), &size, |b, &size| {
            let pipeline = Streams::range(0, size).buffer(64);
            b.iter(|| run_to_completion(&pipeline));
        });
    }

    group.finish();
}

fn bench_dispatched_chain(c: &mut Criterion) {
    let env = Environment::new(EnvironmentConfig::builder().cached_pool_size(2).build()).unwrap();
    let mut group = c.benchmark_group("dispatched_chain");
    let size = 100_000_i64;
    group.throughput(Throughput::Elements(size as u64));

    let shared = env.shared_dispatcher().unwrap();
    group.bench_function("shared", |b| {
        let pipeline = Streams::range(0, size)
            .map(|v| Ok(v + 1))
            .dispatch_on(Arc::clone(&shared));
        b.iter(|| run_to_completion(&pipeline));
    });

    let work_queue = env
        .get_dispatcher(riptide_core::environment::WORK_QUEUE_DISPATCHER)
        .unwrap();
    group.bench_function("work_queue", |b| {
        let pipeline = Streams::range(0, size)
            .map(|v| Ok(v + 1))
            .dispatch_on(Arc::clone(&work_queue));
        b.iter(|| run_to_completion(&pipeline));
    });

    group.finish();
    env.shutdown();
}

fn bench_broadcaster(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcaster");

    for subscribers in [1_usize, 4] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("publish", subscribers),
            &subscribers,
            |b, &subscribers| {
                let broadcaster = Broadcaster::<u64>::new();
                let received = Arc::new(AtomicU64::new(0));
                let controls: Vec<_> = (0..subscribers)
                    .map(|_| {
                        let received = Arc::clone(&received);
                        broadcaster.stream().consume(move |v| {
                            received.fetch_add(black_box(v), Ordering::Relaxed);
                        })
                    })
                    .collect();
                b.iter(|| broadcaster.on_next(black_box(1)));
                for control in controls {
                    control.cancel();
                }
            },
        );
    }

    group.finish();
}

criterion_group!(chain_benches, bench_sync_chain, bench_dispatched_chain);
criterion_group!(fan_out_benches, bench_broadcaster);
criterion_main!(chain_benches, fan_out_benches);
