//! # Block Sync Configuration
//!
//! Tunables for admission, orphan resolution, peer-knowledge tracking and
//! snapshot sync. Loaded by the embedding node; every field has a default.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shared_types::Address;

use crate::events::SyncError;
use crate::snapshot::{CHUNK_ITEM_SIZE, MAX_CHUNK_SIZE_KIB};

/// How the admission pipeline orders queued tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingMode {
    /// One queue ordered by admission score.
    ByScore,
    /// Priority lane, rate-limited announcement lane, then score-ordered rest.
    ByPriorityClass,
}

/// Block sync configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Blocks per skeleton step.
    pub chunk_size: u64,
    /// Skeleton chunks requested at most; bounds how far ahead blocks are buffered.
    pub max_skeleton_chunks: u64,

    /// Maximum in-flight queued messages per peer.
    pub message_queue_max_size: usize,
    /// Content-hash dedup cache bound (cleared wholesale when full).
    pub max_messages_cached: usize,
    /// Dedup cache clear period in seconds.
    pub received_messages_cache_secs: u64,
    /// Consumer pop timeout in milliseconds.
    pub queue_poll_timeout_ms: u64,
    /// Status broadcast period in seconds.
    pub status_interval_secs: u64,
    /// Queued time above which a task is reported late.
    pub queued_time_warn_secs: u64,
    /// Minimum seconds between two late-task warnings.
    pub queued_time_warn_period_secs: u64,
    /// Processing time above which a task is reported slow.
    pub processing_time_warn_secs: u64,
    /// Queue discipline used by the admission pipeline.
    pub scheduling: SchedulingMode,
    /// Per-peer capacity of the announcement lane.
    pub peer_queue_capacity: usize,
    /// Coinbase addresses whose blocks are never admitted.
    pub banned_miners: HashSet<Address>,

    /// Processed blocks between two staging store release checks.
    pub processed_blocks_to_check_store: u64,
    /// Height span released from the staging store at once.
    pub released_range: u64,
    /// Block processing time above which a warning is logged.
    pub slow_block_threshold_ms: u64,
    /// Suppressed re-requests of an unknown hash before asking again.
    pub max_unknown_hash_retries: u32,
    /// Canonical blocks pushed to a peer whose status is behind ours.
    pub blocks_for_peers: u64,
    /// Distance to the best known peer height that counts as "behind".
    pub better_block_margin: u64,

    /// Peers tracked by the block knowledge tracker.
    pub max_tracked_nodes: usize,
    /// Blocks tracked (globally and per peer).
    pub max_tracked_blocks: usize,
    /// Transactions tracked by the transaction knowledge tracker.
    pub max_tracked_transactions: usize,
    /// Recently served/connected blocks kept in memory.
    pub block_cache_size: usize,

    /// Bounded wait when joining the async block worker.
    pub async_join_timeout_ms: u64,

    pub snapshot: SnapshotConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: 192,
            max_skeleton_chunks: 20,
            message_queue_max_size: 100,
            max_messages_cached: 5000,
            received_messages_cache_secs: 120,
            queue_poll_timeout_ms: 1000,
            status_interval_secs: 10,
            queued_time_warn_secs: 2,
            queued_time_warn_period_secs: 10,
            processing_time_warn_secs: 2,
            scheduling: SchedulingMode::ByScore,
            peer_queue_capacity: 10,
            banned_miners: HashSet::new(),
            processed_blocks_to_check_store: 200,
            released_range: 1000,
            slow_block_threshold_ms: 1000,
            max_unknown_hash_retries: 20,
            blocks_for_peers: 100,
            better_block_margin: 30,
            max_tracked_nodes: 100,
            max_tracked_blocks: 1000,
            max_tracked_transactions: 1000,
            block_cache_size: 200,
            async_join_timeout_ms: 5000,
            snapshot: SnapshotConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Create a config for testing (smaller values).
    pub fn for_testing() -> Self {
        Self {
            chunk_size: 10,
            max_skeleton_chunks: 5,
            message_queue_max_size: 5,
            max_messages_cached: 100,
            queue_poll_timeout_ms: 50,
            processed_blocks_to_check_store: 20,
            released_range: 10,
            blocks_for_peers: 5,
            better_block_margin: 5,
            max_tracked_nodes: 10,
            max_tracked_blocks: 20,
            max_tracked_transactions: 20,
            block_cache_size: 10,
            async_join_timeout_ms: 500,
            snapshot: SnapshotConfig::for_testing(),
            ..Default::default()
        }
    }

    /// Blocks further than this above our best are not buffered.
    pub fn max_block_distance(&self) -> u64 {
        self.chunk_size.saturating_mul(self.max_skeleton_chunks)
    }

    /// `number` lies beyond the buffering distance above `best`.
    pub fn is_beyond_block_distance(&self, number: u64, best: u64) -> bool {
        number > best.saturating_add(self.max_block_distance())
    }

    pub fn received_messages_cache_duration(&self) -> Duration {
        Duration::from_secs(self.received_messages_cache_secs)
    }

    pub fn queue_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_poll_timeout_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn slow_block_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_block_threshold_ms)
    }

    pub fn async_join_timeout(&self) -> Duration {
        Duration::from_millis(self.async_join_timeout_ms)
    }
}

/// Snapshot (state sync) configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Chunk payload size in KiB of trie data.
    pub chunk_size: u64,
    /// LZ4-compress entries when it shrinks them.
    pub compression_enabled: bool,
    /// Peers asked for chunks concurrently when a round starts.
    pub parallel_requests: usize,
    /// Start a new round from offset 0 once a round completes.
    pub resync_on_completion: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            compression_enabled: true,
            parallel_requests: 1,
            resync_on_completion: false,
        }
    }
}

impl SnapshotConfig {
    pub fn for_testing() -> Self {
        Self {
            chunk_size: 1,
            ..Default::default()
        }
    }

    /// Bytes of trie payload covered by one chunk.
    pub fn chunk_bytes(&self) -> u64 {
        self.chunk_size.saturating_mul(CHUNK_ITEM_SIZE)
    }

    /// The chunk size must lie in the range servers honour unclamped.
    pub fn validate(&self) -> Result<(), SyncError> {
        if !(1..=MAX_CHUNK_SIZE_KIB).contains(&self.chunk_size) {
            return Err(SyncError::InvalidConfig(format!(
                "snapshot chunk_size {} outside 1..={}",
                self.chunk_size, MAX_CHUNK_SIZE_KIB
            )));
        }
        if self.parallel_requests == 0 {
            return Err(SyncError::InvalidConfig(
                "snapshot parallel_requests cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}
