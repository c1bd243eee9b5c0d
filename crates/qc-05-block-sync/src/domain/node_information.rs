//! Bounded peer-knowledge trackers and the recent block cache.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use shared_types::{Block, Hash, PeerId};

pub(crate) fn lru_capacity(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

struct BlockKnowledge {
    blocks_by_node: LruCache<PeerId, LruCache<Hash, ()>>,
    nodes_by_block: LruCache<Hash, HashSet<PeerId>>,
    max_blocks: usize,
}

/// Which peers know which blocks.
///
/// Both directions are LRU-bounded and evict independently, so the two
/// views may briefly disagree. Readers treat them as hints.
pub struct BlockNodeInformation {
    inner: Mutex<BlockKnowledge>,
}

impl BlockNodeInformation {
    pub fn new(max_nodes: usize, max_blocks: usize) -> Self {
        Self {
            inner: Mutex::new(BlockKnowledge {
                blocks_by_node: LruCache::new(lru_capacity(max_nodes)),
                nodes_by_block: LruCache::new(lru_capacity(max_blocks)),
                max_blocks,
            }),
        }
    }

    pub fn add_block_to_node(&self, hash: Hash, peer: PeerId) {
        let mut guard = self.inner.lock();
        let knowledge = &mut *guard;

        if let Some(blocks) = knowledge.blocks_by_node.get_mut(&peer) {
            blocks.put(hash, ());
        } else {
            let mut blocks = LruCache::new(lru_capacity(knowledge.max_blocks));
            blocks.put(hash, ());
            knowledge.blocks_by_node.put(peer, blocks);
        }

        if let Some(peers) = knowledge.nodes_by_block.get_mut(&hash) {
            peers.insert(peer);
        } else {
            knowledge.nodes_by_block.put(hash, HashSet::from([peer]));
        }
    }

    pub fn get_blocks_by_node(&self, peer: &PeerId) -> HashSet<Hash> {
        self.inner
            .lock()
            .blocks_by_node
            .get(peer)
            .map(|blocks| blocks.iter().map(|(hash, _)| *hash).collect())
            .unwrap_or_default()
    }

    pub fn get_nodes_by_block(&self, hash: &Hash) -> HashSet<PeerId> {
        self.inner
            .lock()
            .nodes_by_block
            .get(hash)
            .cloned()
            .unwrap_or_default()
    }
}

/// Which peers know which transactions.
pub struct TransactionNodeInformation {
    nodes_by_transaction: Mutex<LruCache<Hash, HashSet<PeerId>>>,
}

impl TransactionNodeInformation {
    pub fn new(max_transactions: usize) -> Self {
        Self {
            nodes_by_transaction: Mutex::new(LruCache::new(lru_capacity(max_transactions))),
        }
    }

    pub fn add_transaction_to_node(&self, hash: Hash, peer: PeerId) {
        let mut cache = self.nodes_by_transaction.lock();
        if let Some(peers) = cache.get_mut(&hash) {
            peers.insert(peer);
        } else {
            cache.put(hash, HashSet::from([peer]));
        }
    }

    pub fn get_nodes_by_transaction(&self, hash: &Hash) -> HashSet<PeerId> {
        self.nodes_by_transaction
            .lock()
            .get(hash)
            .cloned()
            .unwrap_or_default()
    }
}

/// Recently connected or served blocks.
pub struct BlockCache {
    blocks: Mutex<LruCache<Hash, Arc<Block>>>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: Mutex::new(LruCache::new(lru_capacity(capacity))),
        }
    }

    pub fn add_block(&self, block: Arc<Block>) {
        self.blocks.lock().put(block.hash(), block);
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Option<Arc<Block>> {
        self.blocks.lock().get(hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }
}
