//! # Block Sync Benchmarks

pub mod qc_05_block_sync;
