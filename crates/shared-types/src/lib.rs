//! # Shared Types Crate
//!
//! Chain primitives shared between the sync engine and the collaborators it
//! talks to (chain connector, trie store, transport).
//!
//! ## Design Principles
//!
//! - **Content addressing**: block, header and transaction hashes are the
//!   Keccak-256 of their canonical RLP encoding.
//! - **Read-only sharing**: blocks are built once and passed around behind
//!   `Arc`; the cached block hash can never drift from its contents.

pub mod encoding;
pub mod entities;

pub use encoding::keccak256;
pub use entities::*;
