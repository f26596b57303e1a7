//! Hot path benchmarks for profiling-driven optimization.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! These benchmarks measure the paths every datagram and every flush
//! goes through: sanitize + decode, store apply, reduce, and Graphite
//! formatting.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use statsd_rs::backends::graphite::NamePrefixes;
use statsd_rs::backends::GraphiteSink;
use statsd_rs::metrics::{decode, AggregateStore, FlushReducer, MetricSample, PercentileMode};

fn datagram(samples: usize) -> String {
    (0..samples)
        .map(|i| match i % 3 {
            0 => format!("app.requests.{}:1|c|@0.5\n", i),
            1 => format!("app.latency.{}:{}|ms\n", i, i * 7),
            _ => format!("app.queue.{}:+{}|g\n", i, i),
        })
        .collect()
}

/// Benchmark decode of one datagram with various sample counts
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for samples in [1, 8, 32] {
        let payload = datagram(samples);
        group.throughput(Throughput::Elements(samples as u64));
        group.bench_function(format!("samples_{}", samples), |b| {
            b.iter(|| decode(black_box(payload.as_bytes())).count())
        });
    }

    group.bench_function("garbage", |b| {
        let payload = vec![b'#'; 512];
        b.iter(|| decode(black_box(&payload)).count())
    });

    group.finish();
}

/// Benchmark AggregateStore::apply per kind
fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");
    group.throughput(Throughput::Elements(1));

    let mut store = AggregateStore::new();
    group.bench_function("counter", |b| {
        b.iter(|| store.apply(black_box(MetricSample::counter("hits", "1", 0.1))))
    });

    let mut store = AggregateStore::new();
    group.bench_function("gauge_delta", |b| {
        b.iter(|| store.apply(black_box(MetricSample::gauge("temp", "+1"))))
    });

    group.finish();
}

/// Benchmark a full flush over a populated store
fn bench_reduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce");

    for buckets in [10, 1000] {
        let mut populated = AggregateStore::new();
        for i in 0..buckets {
            populated.apply(MetricSample::counter(format!("c.{}", i), "3", 1.0));
            populated.apply(MetricSample::gauge(format!("g.{}", i), "42"));
            for v in 0..50 {
                populated.apply(MetricSample::timer(format!("t.{}", i), v.to_string()));
            }
        }
        let reducer = FlushReducer::new(Duration::from_secs(10), 90, PercentileMode::Trimmed);

        group.throughput(Throughput::Elements(buckets as u64 * 3));
        group.bench_function(format!("buckets_{}", buckets), |b| {
            b.iter_batched(
                || populated.clone(),
                |mut store| reducer.reduce(&mut store, 1_700_000_000),
                BatchSize::SmallInput,
            )
        });

        let sink = GraphiteSink::new("localhost:2003", NamePrefixes::default());
        let snapshot = reducer.reduce(&mut populated.clone(), 1_700_000_000);
        group.bench_function(format!("graphite_format_{}", buckets), |b| {
            b.iter(|| sink.format_snapshot(black_box(&snapshot)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode, bench_apply, bench_reduce);
criterion_main!(benches);
