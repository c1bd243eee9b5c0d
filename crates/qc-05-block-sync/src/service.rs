//! # Block Sync Service
//!
//! Orphan resolution: stages blocks whose ancestry is incomplete, requests
//! the missing ancestors and connects staged descendants once their parent
//! lands in the chain.
//!
//! ## Processing a block
//!
//! 1. Periodically release the low end of the staging store
//! 2. Drop any staged header and unknown-hash record for the block
//! 3. Ignore blocks too far above our best
//! 4. Record that the sender knows the block
//! 5. Ignore blocks already in some chain
//! 6. Stage the block
//! 7. If a parent or uncle is unknown, request it and stop
//! 8. Connect the staged ancestry, then staged descendants level by level
//!
//! Steps run under one lock; at most one cascade is in flight.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;
use parking_lot::Mutex;
use shared_types::{short_hex, Block, Hash, PeerId};
use tracing::{debug, info, trace};

use crate::config::SyncConfig;
use crate::domain::{
    lru_capacity, sort_blocks_by_number, BlockNodeInformation, ImportResult, ProcessResult,
    StagingStore,
};
use crate::events::Message;
use crate::ports::outbound::{Blockchain, PeerNetwork};

struct CascadeState {
    processed_blocks: u64,
    /// Suppressed re-requests per unknown hash.
    unknown_hashes: LruCache<Hash, u32>,
}

/// Block Sync Service.
///
/// ## Thread Safety
///
/// Shared across the consumer loop and the async worker via `Arc`.
pub struct BlockSyncService<B: Blockchain> {
    config: SyncConfig,
    blockchain: Arc<B>,
    store: Arc<StagingStore>,
    node_information: Arc<BlockNodeInformation>,
    network: Arc<dyn PeerNetwork>,
    state: Mutex<CascadeState>,
}

impl<B: Blockchain> BlockSyncService<B> {
    pub fn new(
        config: SyncConfig,
        blockchain: Arc<B>,
        store: Arc<StagingStore>,
        node_information: Arc<BlockNodeInformation>,
        network: Arc<dyn PeerNetwork>,
    ) -> Self {
        let unknown_hashes = LruCache::new(lru_capacity(config.max_tracked_blocks));
        Self {
            config,
            blockchain,
            store,
            node_information,
            network,
            state: Mutex::new(CascadeState {
                processed_blocks: 0,
                unknown_hashes,
            }),
        }
    }

    /// Run the full pipeline for one block.
    ///
    /// With `ignore_missing_hashes`, unknown ancestors are not requested.
    pub fn process_block(
        &self,
        sender: Option<&PeerId>,
        block: &Arc<Block>,
        ignore_missing_hashes: bool,
    ) -> ProcessResult {
        let start = Instant::now();
        let mut state = self.state.lock();

        let result = match self.prepare(&mut state, sender, block, ignore_missing_hashes) {
            Some(ancestry) => {
                let connect_result =
                    self.connect_cascade(&mut state, sender, ancestry, ignore_missing_hashes);
                ProcessResult::connected(block.hash(), connect_result, start.elapsed())
            }
            None => ProcessResult::not_scheduled(block.hash(), start.elapsed()),
        };
        result.log_if_slow(self.config.slow_block_threshold());
        result
    }

    /// Steps 1-7. Returns the staged ancestry to connect (ascending, ending
    /// with `block`) or `None` when the block is not scheduled.
    pub fn preprocess_block(
        &self,
        sender: Option<&PeerId>,
        block: &Arc<Block>,
        ignore_missing_hashes: bool,
    ) -> Option<Vec<Arc<Block>>> {
        let mut state = self.state.lock();
        self.prepare(&mut state, sender, block, ignore_missing_hashes)
    }

    /// Step 8 for blocks whose parents are known.
    pub fn connect_blocks_and_descendants(
        &self,
        sender: Option<&PeerId>,
        blocks: Vec<Arc<Block>>,
        ignore_missing_hashes: bool,
    ) -> HashMap<Hash, ImportResult> {
        let mut state = self.state.lock();
        self.connect_cascade(&mut state, sender, blocks, ignore_missing_hashes)
    }

    pub fn store(&self) -> &Arc<StagingStore> {
        &self.store
    }

    fn prepare(
        &self,
        state: &mut CascadeState,
        sender: Option<&PeerId>,
        block: &Arc<Block>,
        ignore_missing_hashes: bool,
    ) -> Option<Vec<Arc<Block>>> {
        let hash = block.hash();
        let best_number = self.blockchain.best_block().number();

        self.try_release_store(state, best_number);
        self.store.remove_header(&hash);
        state.unknown_hashes.pop(&hash);

        if self.config.is_beyond_block_distance(block.number(), best_number) {
            trace!(
                "[qc-05] Block {} #{} too far above best #{}",
                short_hex(&hash),
                block.number(),
                best_number
            );
            return None;
        }

        if let Some(peer) = sender {
            self.node_information.add_block_to_node(hash, *peer);
        }

        if self.blockchain.has_block_in_some_blockchain(&hash) {
            trace!("[qc-05] Block {} already in chain", short_hex(&hash));
            return None;
        }

        self.store.save_block(Arc::clone(block));

        let missing = self.unknown_direct_ancestors(block);
        if !missing.is_empty() {
            debug!(
                "[qc-05] Block {} #{} staged, {} ancestor(s) unknown",
                short_hex(&hash),
                block.number(),
                missing.len()
            );
            if !ignore_missing_hashes {
                self.request_missing_hashes(state, sender, &missing);
            }
            return None;
        }

        Some(sort_blocks_by_number(self.parents_not_in_blockchain(block)))
    }

    fn connect_cascade(
        &self,
        state: &mut CascadeState,
        sender: Option<&PeerId>,
        blocks: Vec<Arc<Block>>,
        ignore_missing_hashes: bool,
    ) -> HashMap<Hash, ImportResult> {
        let mut results = HashMap::new();
        let mut level = blocks;

        while !level.is_empty() {
            let mut connected = Vec::new();

            for block in &level {
                let missing = self.unknown_direct_ancestors(block);
                if !missing.is_empty() {
                    if !ignore_missing_hashes {
                        self.request_missing_hashes(state, sender, &missing);
                    }
                    continue;
                }

                let hash = block.hash();
                let outcome = self.blockchain.try_to_connect(block);
                trace!(
                    "[qc-05] Connect {} #{}: {:?}",
                    short_hex(&hash),
                    block.number(),
                    outcome
                );
                results.insert(hash, outcome);

                if self.blockchain.has_block_in_some_blockchain(&hash) {
                    self.store.remove_block(&hash);
                    connected.push(Arc::clone(block));
                }
            }

            level = sort_blocks_by_number(self.store.get_children_of(&connected));
        }

        results
    }

    fn try_release_store(&self, state: &mut CascadeState, best_number: u64) {
        state.processed_blocks += 1;
        let check_every = self.config.processed_blocks_to_check_store.max(1);
        if state.processed_blocks % check_every != 0 {
            return;
        }

        let range = self.config.released_range;
        let minimal = self.store.minimal_height();
        if self.store.size() > 0 && minimal < best_number.saturating_sub(range) {
            let released = self
                .store
                .release_range(minimal, minimal.saturating_add(range));
            info!(
                "[qc-05] Released {} staged block(s) from #{} (best #{})",
                released, minimal, best_number
            );
        }
    }

    /// Parent and uncle hashes known neither to the chain nor the store.
    fn unknown_direct_ancestors(&self, block: &Block) -> HashSet<Hash> {
        std::iter::once(block.parent_hash())
            .chain(block.uncle_hashes())
            .filter(|hash| {
                !self.blockchain.has_block_in_some_blockchain(hash) && !self.store.has_block(hash)
            })
            .collect()
    }

    /// `block` and its staged ancestors, up to the first one in the chain.
    fn parents_not_in_blockchain(&self, block: &Arc<Block>) -> Vec<Arc<Block>> {
        let mut blocks = Vec::new();
        let mut current = Some(Arc::clone(block));

        while let Some(block) = current {
            if self.blockchain.has_block_in_some_blockchain(&block.hash()) {
                break;
            }
            let parent_hash = block.parent_hash();
            blocks.push(block);
            current = self
                .store
                .get_block_by_hash(&parent_hash)
                .or_else(|| self.blockchain.block_by_hash(&parent_hash));
        }

        blocks
    }

    fn request_missing_hashes(
        &self,
        state: &mut CascadeState,
        sender: Option<&PeerId>,
        hashes: &HashSet<Hash>,
    ) {
        let Some(peer) = sender else {
            return;
        };
        for hash in hashes {
            self.request_missing_hash(state, peer, *hash);
        }
    }

    fn request_missing_hash(&self, state: &mut CascadeState, peer: &PeerId, hash: Hash) {
        if let Some(attempts) = state.unknown_hashes.get_mut(&hash) {
            *attempts += 1;
            if *attempts <= self.config.max_unknown_hash_retries {
                return;
            }
        }
        state.unknown_hashes.put(hash, 1);

        trace!("[qc-05] Requesting unknown block {} from {}", short_hex(&hash), peer);
        if let Err(e) = self.network.send_message(peer, Message::GetBlock { hash }) {
            debug!("[qc-05] Failed to request block from {}: {}", peer, e);
        }
    }
}
