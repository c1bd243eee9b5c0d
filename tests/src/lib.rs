//! # Block Sync Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── benchmarks/       # Criterion benchmarks, registered from benches/
//! │   └── qc_05_block_sync.rs
//! │
//! └── integration/      # Multi-node flows over the mock ports
//!     └── flows.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p qc-tests integration::
//!
//! # Benchmarks
//! cargo bench -p qc-tests
//! ```

#![allow(dead_code)]

pub mod benchmarks;
pub mod integration;
