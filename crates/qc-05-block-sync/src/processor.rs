//! # Node Block Processor
//!
//! Peer-facing block logic: processing inbound blocks through the
//! [`BlockSyncService`], serving blocks, headers, bodies and skeletons, and
//! reacting to status messages and block announcements.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use shared_types::{short_hex, Block, BlockHeader, BlockIdentifier, Hash, PeerId};
use tracing::{debug, trace, warn};

use crate::config::SyncConfig;
use crate::domain::{skeleton_heights, BlockCache, BlockNodeInformation, ProcessResult, StagingStore};
use crate::events::{Message, Status};
use crate::ports::inbound::BlockProcessor;
use crate::ports::outbound::{BlockHeaderValidator, Blockchain, PeerNetwork};
use crate::service::BlockSyncService;

/// Synchronous block processor.
pub struct NodeBlockProcessor<B: Blockchain> {
    config: SyncConfig,
    blockchain: Arc<B>,
    store: Arc<StagingStore>,
    node_information: Arc<BlockNodeInformation>,
    sync_service: Arc<BlockSyncService<B>>,
    network: Arc<dyn PeerNetwork>,
    header_validator: Option<Arc<dyn BlockHeaderValidator>>,
    block_cache: BlockCache,
    last_known_block_number: AtomicU64,
}

impl<B: Blockchain> NodeBlockProcessor<B> {
    pub fn new(
        config: SyncConfig,
        blockchain: Arc<B>,
        sync_service: Arc<BlockSyncService<B>>,
        node_information: Arc<BlockNodeInformation>,
        network: Arc<dyn PeerNetwork>,
    ) -> Self {
        let store = Arc::clone(sync_service.store());
        let block_cache = BlockCache::new(config.block_cache_size);
        Self {
            config,
            blockchain,
            store,
            node_information,
            sync_service,
            network,
            header_validator: None,
            block_cache,
            last_known_block_number: AtomicU64::new(0),
        }
    }

    /// Reject blocks whose header fails `validator` before connecting them.
    pub fn with_header_validator(mut self, validator: Arc<dyn BlockHeaderValidator>) -> Self {
        self.header_validator = Some(validator);
        self
    }

    pub fn sync_service(&self) -> &Arc<BlockSyncService<B>> {
        &self.sync_service
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// `true` if the header passes the configured validator (or none is set).
    pub fn is_header_valid(&self, header: &BlockHeader) -> bool {
        self.header_validator
            .as_ref()
            .map_or(true, |validator| validator.is_valid(header))
    }

    /// Cache the block if it was imported.
    pub fn remember_connected(&self, block: &Arc<Block>, result: &ProcessResult) {
        if result.was_block_added(&block.hash()) {
            self.block_cache.add_block(Arc::clone(block));
        }
    }

    /// Cache, then chain, then staging store.
    pub fn get_block(&self, hash: &Hash) -> Option<Arc<Block>> {
        self.block_cache
            .get_block_by_hash(hash)
            .or_else(|| self.blockchain.block_by_hash(hash))
            .or_else(|| self.store.get_block_by_hash(hash))
    }

    /// Too far above our best for the sync service to stage.
    pub fn is_advanced_block(&self, number: u64) -> bool {
        self.config
            .is_beyond_block_distance(number, self.best_number())
    }

    fn best_number(&self) -> u64 {
        self.blockchain.best_block().number()
    }

    pub(crate) fn raise_last_known(&self, number: u64) {
        self.last_known_block_number
            .fetch_max(number, Ordering::Relaxed);
    }

    fn send(&self, peer: &PeerId, message: Message) {
        let message_type = message.message_type();
        if let Err(e) = self.network.send_message(peer, message) {
            debug!("[qc-05] Failed to send {:?} to {}: {}", message_type, peer, e);
        }
    }
}

impl<B: Blockchain> BlockProcessor for NodeBlockProcessor<B> {
    fn process_block(&self, sender: Option<&PeerId>, block: Arc<Block>) -> ProcessResult {
        let start = Instant::now();
        if !self.is_header_valid(block.header()) {
            warn!(
                "[qc-05] Invalid header for block {} #{}",
                block.short_hash(),
                block.number()
            );
            return ProcessResult::invalid(block.hash(), start.elapsed());
        }

        self.raise_last_known(block.number());
        let result = self.sync_service.process_block(sender, &block, false);
        self.remember_connected(&block, &result);
        result
    }

    fn process_status(&self, sender: &PeerId, status: &Status) {
        let head = status.best_block_hash;
        self.node_information.add_block_to_node(head, *sender);

        if !self.has_block(&head) {
            self.send(sender, Message::GetBlock { hash: head });
        }

        self.raise_last_known(status.best_block_number);

        // Push canonical blocks to a peer that is behind
        let best = self.best_number();
        let peer_best = status.best_block_number;
        let limit = peer_best.saturating_add(self.config.blocks_for_peers);
        let mut number = peer_best;
        while number <= best && number < limit {
            if let Some(block) = self.blockchain.block_by_number(number) {
                self.node_information.add_block_to_node(block.hash(), *sender);
                self.send(sender, Message::Block(block));
            }
            number += 1;
        }
    }

    fn process_new_block_hashes(&self, sender: &PeerId, identifiers: &[BlockIdentifier]) {
        let mut seen = HashSet::new();
        for identifier in identifiers {
            if !seen.insert(identifier.hash) || self.has_block(&identifier.hash) {
                continue;
            }
            if self.is_advanced_block(identifier.number) {
                trace!(
                    "[qc-05] Skipping advanced announcement #{} from {}",
                    identifier.number,
                    sender
                );
                continue;
            }
            trace!(
                "[qc-05] Announced block {} #{} from {}",
                short_hex(&identifier.hash),
                identifier.number,
                sender
            );
            self.send(
                sender,
                Message::GetBlock {
                    hash: identifier.hash,
                },
            );
            self.node_information.add_block_to_node(identifier.hash, *sender);
        }
    }

    fn process_block_headers(&self, sender: &PeerId, mut headers: Vec<BlockHeader>) {
        headers.sort_by_key(|header| header.number);
        for header in headers {
            let hash = header.hash();
            if self.has_block(&hash)
                || self.store.has_header(&hash)
                || self.is_advanced_block(header.number)
            {
                continue;
            }
            self.send(sender, Message::GetBlock { hash });
            self.store.save_header(header);
        }
    }

    fn process_get_block(&self, sender: &PeerId, hash: &Hash) {
        let Some(block) = self.get_block(hash) else {
            trace!("[qc-05] Requested block {} unknown", short_hex(hash));
            return;
        };
        self.node_information.add_block_to_node(*hash, *sender);
        self.send(sender, Message::Block(block));
    }

    fn process_block_request(&self, sender: &PeerId, id: u64, hash: &Hash) {
        let Some(block) = self.get_block(hash) else {
            return;
        };
        self.node_information.add_block_to_node(*hash, *sender);
        self.send(sender, Message::BlockResponse { id, block });
    }

    fn process_block_headers_request(&self, sender: &PeerId, id: u64, hash: &Hash, count: u32) {
        let count = (count as u64).min(self.config.chunk_size) as usize;
        let mut headers = Vec::with_capacity(count);
        let mut current = self.get_block(hash);

        while let Some(block) = current {
            if headers.len() >= count {
                break;
            }
            headers.push(block.header().clone());
            current = self.get_block(&block.parent_hash());
        }

        if headers.is_empty() {
            return;
        }
        self.send(sender, Message::BlockHeadersResponse { id, headers });
    }

    fn process_body_request(&self, sender: &PeerId, id: u64, hash: &Hash) {
        let Some(block) = self.get_block(hash) else {
            return;
        };
        self.send(
            sender,
            Message::BodyResponse {
                id,
                transactions: block.transactions().to_vec(),
                uncles: block.uncles().to_vec(),
            },
        );
    }

    fn process_block_hash_request(&self, sender: &PeerId, id: u64, height: u64) {
        let Some(block) = self.blockchain.block_by_number(height) else {
            return;
        };
        self.send(
            sender,
            Message::BlockHashResponse {
                id,
                hash: block.hash(),
            },
        );
    }

    fn process_skeleton_request(&self, sender: &PeerId, id: u64, start_number: u64) {
        let best = self.best_number();
        if start_number > best {
            return;
        }
        let identifiers: Vec<BlockIdentifier> = skeleton_heights(
            start_number,
            best,
            self.config.chunk_size,
            self.config.max_skeleton_chunks,
        )
        .into_iter()
        .filter_map(|number| self.blockchain.block_by_number(number))
        .map(|block| block.identifier())
        .collect();

        self.send(sender, Message::SkeletonResponse { id, identifiers });
    }

    fn has_block(&self, hash: &Hash) -> bool {
        self.blockchain.has_block_in_some_blockchain(hash) || self.store.has_block(hash)
    }

    fn has_better_block_to_sync(&self) -> bool {
        self.last_known_block_number() >= self.best_number().saturating_add(self.config.better_block_margin)
    }

    fn last_known_block_number(&self) -> u64 {
        self.last_known_block_number.load(Ordering::Relaxed)
    }

    fn node_information(&self) -> Arc<BlockNodeInformation> {
        Arc::clone(&self.node_information)
    }
}
