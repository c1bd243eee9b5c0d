//! # Block Sync Benchmarks
//!
//! Entry point for `cargo bench -p qc-tests`; the benchmark bodies live in
//! `qc_tests::benchmarks`.

use criterion::{criterion_group, criterion_main, Criterion};

fn bench_block_sync(c: &mut Criterion) {
    qc_tests::benchmarks::qc_05_block_sync::register_benchmarks(c);
}

criterion_group!(benches, bench_block_sync);

criterion_main!(benches);
