//! # Snapshot (State Sync)
//!
//! Chunked transfer of a remote state trie at a fixed block height.
//!
//! - `codec`: chunk payload encoding with optional per-entry LZ4
//! - `trie`: sync encoding of trie nodes and in-order recovery
//! - `state`: requester-side progress
//! - `processor`: request serving and the multi-peer requester

mod codec;
mod processor;
mod state;
mod trie;

pub use codec::{decode_chunk, encode_chunk, UNCOMPRESSED};
pub use processor::SnapshotProcessor;
pub use state::{SnapshotPhase, SnapshotSyncState, SnapshotTarget};
#[cfg(any(test, feature = "test-utils"))]
pub use trie::balanced_trie;
pub use trie::{recover_trie, SyncTrieNode};

/// Bytes per KiB of chunk size.
pub const CHUNK_ITEM_SIZE: u64 = 1024;

/// Largest chunk, in KiB, a peer may ask us to serve.
pub const MAX_CHUNK_SIZE_KIB: u64 = 1024;
