//! Relation loading benchmarks.
//!
//! Compares one joined statement (`select_related`) with one statement per
//! level (`prefetch_related`) at different fan-outs, in process and with a
//! simulated round-trip latency.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use joinery_bench::fixtures::Scale;
use joinery_bench::harness::TestContext;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn bench_to_one(c: &mut Criterion) {
    let mut group = c.benchmark_group("loading/to_one");
    let rt = runtime();
    let ctx = TestContext::with_scale(Scale::Small);
    let loader = ctx.loader();

    group.bench_function("select_related", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                loader
                    .query("Post")
                    .select_related("author__team")
                    .all()
                    .await
                    .unwrap(),
            )
        });
    });
    group.bench_function("prefetch_related", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                loader
                    .query("Post")
                    .prefetch_related("author__team")
                    .all()
                    .await
                    .unwrap(),
            )
        });
    });

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("loading/fan_out");
    let rt = runtime();

    for scale in [Scale::Tiny, Scale::Small, Scale::Medium] {
        let ctx = TestContext::with_scale(scale);
        let loader = ctx.loader();
        let users = scale.users();

        group.bench_with_input(BenchmarkId::new("select_related", users), &users, |b, _| {
            b.to_async(&rt).iter(|| async {
                black_box(
                    loader
                        .query("User")
                        .select_related("posts__comments")
                        .all()
                        .await
                        .unwrap(),
                )
            });
        });
        group.bench_with_input(BenchmarkId::new("prefetch_related", users), &users, |b, _| {
            b.to_async(&rt).iter(|| async {
                black_box(
                    loader
                        .query("User")
                        .prefetch_related("posts__comments")
                        .all()
                        .await
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

fn bench_paginated(c: &mut Criterion) {
    let mut group = c.benchmark_group("loading/paginated");
    let rt = runtime();
    let ctx = TestContext::with_scale(Scale::Medium);
    let loader = ctx.loader();

    for limit in [10u32, 100] {
        group.bench_with_input(BenchmarkId::new("roots", limit), &limit, |b, &limit| {
            b.to_async(&rt).iter(|| async {
                black_box(
                    loader
                        .query("User")
                        .select_related("posts")
                        .limit(limit)
                        .all()
                        .await
                        .unwrap(),
                )
            });
        });
        group.bench_with_input(BenchmarkId::new("raw_rows", limit), &limit, |b, &limit| {
            b.to_async(&rt).iter(|| async {
                black_box(
                    loader
                        .query("User")
                        .select_related("posts")
                        .limit(limit)
                        .limit_raw_sql(true)
                        .all()
                        .await
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

fn bench_with_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("loading/latency_1ms");
    group.sample_size(20);
    let rt = runtime();
    let ctx = TestContext::with_latency(Scale::Tiny, Duration::from_millis(1));
    let loader = ctx.loader();

    group.bench_function("select_related", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                loader
                    .query("User")
                    .select_related("posts__comments")
                    .all()
                    .await
                    .unwrap(),
            )
        });
    });
    group.bench_function("prefetch_related", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                loader
                    .query("User")
                    .prefetch_related("posts__comments")
                    .all()
                    .await
                    .unwrap(),
            )
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_to_one,
    bench_fan_out,
    bench_paginated,
    bench_with_latency
);
criterion_main!(benches);
