//! Requester-side snapshot sync state.

use std::collections::{BTreeMap, HashSet};

use shared_types::{Hash, PeerId};

use crate::events::StateChunkResponse;

/// Lifecycle of a snapshot sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotPhase {
    Idle,
    Running,
    /// Recovered and verified root.
    Completed(Hash),
    /// Every candidate peer failed.
    Failed,
}

/// Block whose state is transferred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotTarget {
    pub block_number: u64,
    /// Root the recovered trie must match, when known up front.
    pub state_root: Option<Hash>,
}

/// Progress of the current sync round plus the peers it may use.
#[derive(Debug)]
pub struct SnapshotSyncState {
    pub(crate) phase: SnapshotPhase,
    pub(crate) target: Option<SnapshotTarget>,
    /// Peers offered by the caller, in preference order.
    pub(crate) candidates: Vec<PeerId>,
    pub(crate) failed_peers: HashSet<PeerId>,
    /// Peers serving the current round.
    pub(crate) round_peers: Vec<PeerId>,
    pub(crate) round: u64,
    /// Trie nodes accumulated this round.
    pub(crate) state_size: u64,
    /// Chunk bytes received this round.
    pub(crate) chunk_bytes: u64,
    pub(crate) entries: Vec<Vec<u8>>,
    pub(crate) next_expected_from: u64,
    pub(crate) next_request_from: u64,
    /// Out-of-order responses keyed by `from`.
    pub(crate) pending: BTreeMap<u64, StateChunkResponse>,
    /// Requests in flight keyed by `from`: the asked peer and request id.
    pub(crate) outstanding: BTreeMap<u64, (PeerId, u64)>,
    pub(crate) next_request_id: u64,
    /// Ids at or below this were issued in an earlier round.
    pub(crate) round_start_id: u64,
    pub(crate) last_recovered_root: Option<Hash>,
}

impl Default for SnapshotSyncState {
    fn default() -> Self {
        Self {
            phase: SnapshotPhase::Idle,
            target: None,
            candidates: Vec::new(),
            failed_peers: HashSet::new(),
            round_peers: Vec::new(),
            round: 0,
            state_size: 0,
            chunk_bytes: 0,
            entries: Vec::new(),
            next_expected_from: 0,
            next_request_from: 0,
            pending: BTreeMap::new(),
            outstanding: BTreeMap::new(),
            next_request_id: 0,
            round_start_id: 0,
            last_recovered_root: None,
        }
    }
}

impl SnapshotSyncState {
    pub fn new(candidates: Vec<PeerId>, target: SnapshotTarget) -> Self {
        Self {
            candidates,
            target: Some(target),
            ..Default::default()
        }
    }

    pub fn phase(&self) -> SnapshotPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == SnapshotPhase::Running
    }

    pub fn target(&self) -> Option<SnapshotTarget> {
        self.target
    }

    /// Primary peer of the current round.
    pub fn peer(&self) -> Option<PeerId> {
        self.round_peers.first().copied()
    }

    pub fn state_size(&self) -> u64 {
        self.state_size
    }

    pub fn chunk_bytes(&self) -> u64 {
        self.chunk_bytes
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn failed_peers(&self) -> &HashSet<PeerId> {
        &self.failed_peers
    }

    pub fn last_recovered_root(&self) -> Option<Hash> {
        self.last_recovered_root
    }

    /// Candidates that have not failed yet.
    pub(crate) fn available_peers(&self, limit: usize) -> Vec<PeerId> {
        self.candidates
            .iter()
            .filter(|peer| !self.failed_peers.contains(peer))
            .take(limit.max(1))
            .copied()
            .collect()
    }

    /// Clear per-round progress, keeping candidates and failures.
    pub(crate) fn reset_round(&mut self) {
        self.round += 1;
        self.round_peers.clear();
        self.state_size = 0;
        self.chunk_bytes = 0;
        self.entries.clear();
        self.next_expected_from = 0;
        self.next_request_from = 0;
        self.pending.clear();
        self.outstanding.clear();
        self.round_start_id = self.next_request_id;
    }

    /// Response to a request issued before the current round started.
    pub(crate) fn is_from_earlier_round(&self, request_id: u64) -> bool {
        request_id <= self.round_start_id
    }

    /// A buffered response already carries the end of the trie.
    pub(crate) fn end_received(&self) -> bool {
        self.pending.values().any(|response| response.complete)
    }

    pub(crate) fn next_id(&mut self) -> u64 {
        self.next_request_id += 1;
        self.next_request_id
    }
}
