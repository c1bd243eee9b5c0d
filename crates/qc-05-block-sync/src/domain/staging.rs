//! Staging store for blocks and headers not yet connected to the chain.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use shared_types::{Block, BlockHeader, Hash};

#[derive(Default)]
struct StoreIndices {
    blocks: HashMap<Hash, Arc<Block>>,
    blocks_by_number: BTreeMap<u64, Vec<Arc<Block>>>,
    blocks_by_parent: HashMap<Hash, Vec<Arc<Block>>>,
    headers: HashMap<Hash, BlockHeader>,
}

/// Orphan blocks indexed by hash, height and parent, plus headers
/// announced ahead of their bodies.
///
/// All indices are updated under one lock and always agree.
#[derive(Default)]
pub struct StagingStore {
    indices: RwLock<StoreIndices>,
}

impl StagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saving an already staged block is a no-op.
    pub fn save_block(&self, block: Arc<Block>) {
        let mut indices = self.indices.write();
        let hash = block.hash();
        if indices.blocks.contains_key(&hash) {
            return;
        }
        indices
            .blocks_by_number
            .entry(block.number())
            .or_default()
            .push(Arc::clone(&block));
        indices
            .blocks_by_parent
            .entry(block.parent_hash())
            .or_default()
            .push(Arc::clone(&block));
        indices.blocks.insert(hash, block);
    }

    pub fn remove_block(&self, hash: &Hash) -> Option<Arc<Block>> {
        let mut indices = self.indices.write();
        let block = indices.blocks.remove(hash)?;

        if let Some(siblings) = indices.blocks_by_number.get_mut(&block.number()) {
            siblings.retain(|b| b.hash() != *hash);
            if siblings.is_empty() {
                indices.blocks_by_number.remove(&block.number());
            }
        }
        if let Some(children) = indices.blocks_by_parent.get_mut(&block.parent_hash()) {
            children.retain(|b| b.hash() != *hash);
            if children.is_empty() {
                indices.blocks_by_parent.remove(&block.parent_hash());
            }
        }
        Some(block)
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Option<Arc<Block>> {
        self.indices.read().blocks.get(hash).cloned()
    }

    pub fn get_blocks_by_number(&self, number: u64) -> Vec<Arc<Block>> {
        self.indices
            .read()
            .blocks_by_number
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_blocks_by_parent_hash(&self, parent_hash: &Hash) -> Vec<Arc<Block>> {
        self.indices
            .read()
            .blocks_by_parent
            .get(parent_hash)
            .cloned()
            .unwrap_or_default()
    }

    /// Staged children of any of `parents`, without duplicates.
    pub fn get_children_of(&self, parents: &[Arc<Block>]) -> Vec<Arc<Block>> {
        let indices = self.indices.read();
        let mut seen = HashSet::new();
        parents
            .iter()
            .filter_map(|parent| indices.blocks_by_parent.get(&parent.hash()))
            .flatten()
            .filter(|child| seen.insert(child.hash()))
            .cloned()
            .collect()
    }

    pub fn has_block(&self, hash: &Hash) -> bool {
        self.indices.read().blocks.contains_key(hash)
    }

    pub fn size(&self) -> usize {
        self.indices.read().blocks.len()
    }

    /// Lowest staged height, 0 when empty.
    pub fn minimal_height(&self) -> u64 {
        self.indices
            .read()
            .blocks_by_number
            .keys()
            .next()
            .copied()
            .unwrap_or(0)
    }

    /// Highest staged height, 0 when empty.
    pub fn maximum_height(&self) -> u64 {
        self.indices
            .read()
            .blocks_by_number
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0)
    }

    /// Drops every staged block with height in `from..=to`.
    pub fn release_range(&self, from: u64, to: u64) -> usize {
        let hashes: Vec<Hash> = {
            let indices = self.indices.read();
            indices
                .blocks_by_number
                .range(from..=to)
                .flat_map(|(_, blocks)| blocks.iter().map(|b| b.hash()))
                .collect()
        };
        hashes
            .iter()
            .filter(|hash| self.remove_block(hash).is_some())
            .count()
    }

    pub fn save_header(&self, header: BlockHeader) {
        self.indices.write().headers.insert(header.hash(), header);
    }

    pub fn remove_header(&self, hash: &Hash) -> Option<BlockHeader> {
        self.indices.write().headers.remove(hash)
    }

    pub fn has_header(&self, hash: &Hash) -> bool {
        self.indices.read().headers.contains_key(hash)
    }

    pub fn header_count(&self) -> usize {
        self.indices.read().headers.len()
    }
}
