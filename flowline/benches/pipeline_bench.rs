//! Benchmarks for pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flowline::prelude::*;

fn transform_chain(c: &mut Criterion) {
    let input: Vec<u64> = (0..10_000).collect();
    c.bench_function("filter_transform_10k", |b| {
        let mut pipeline = Pipeline::setup(|p| {
            p.filter(|n: &u64| n % 2 == 0).transform(|n| Ok(n + 1))
        })
        .unwrap();
        b.iter(|| {
            let mut delivered = 0u64;
            pipeline
                .run(input.clone(), |item| delivered += item.len() as u64)
                .unwrap();
            black_box(delivered)
        });
    });
}

fn gather_scatter_round_trip(c: &mut Criterion) {
    let input: Vec<u64> = (0..10_000).collect();
    c.bench_function("gather_scatter_10k", |b| {
        let mut pipeline =
            Pipeline::setup(|p| p.gather(100).scatter()).unwrap();
        b.iter(|| {
            let mut delivered = 0u64;
            pipeline
                .run(input.clone(), |item| delivered += item.len() as u64)
                .unwrap();
            black_box(delivered)
        });
    });
}

criterion_group!(benches, transform_chain, gather_scatter_round_trip);
criterion_main!(benches);
