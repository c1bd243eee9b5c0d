//! Events and error types for the Block Sync subsystem.

use std::time::Duration;

use shared_types::Hash;
use thiserror::Error;

pub mod p2p;

pub use p2p::*;

/// Block sync errors.
///
/// Admission rejections are not errors; they live in
/// [`AdmissionRejection`](crate::domain::AdmissionRejection).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Malformed chunk payload: {0}")]
    MalformedChunk(#[from] rlp::DecoderError),

    #[error("Chunk entry decompression failed: {0}")]
    Decompression(#[from] lz4_flex::block::DecompressError),

    #[error("Decompressed entry size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Unknown block number: {0}")]
    UnknownBlock(u64),

    #[error("Trie root not found: {0:?}")]
    MissingTrieRoot(Hash),

    #[error("Trie recovery failed: {0}")]
    TrieRecovery(String),

    #[error("Recovered root {actual:?} does not match expected {expected:?}")]
    RootMismatch { expected: Hash, actual: Hash },

    #[error("Unsolicited state chunk at offset {0}")]
    UnexpectedStateChunk(u64),

    #[error("State chunk at offset {from} ends at {actual}, requested up to {expected}")]
    ChunkRangeMismatch { from: u64, expected: u64, actual: u64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Snapshot sync is not running")]
    SnapshotNotRunning,

    #[error("No peers available for snapshot sync")]
    NoSnapshotPeers,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Async block worker did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Async block worker is stopped")]
    WorkerStopped,
}
