//! Sync encoding of state trie nodes and trie recovery from an in-order walk.
//!
//! A node travels as RLP `[path, value, has_long_value, embeddable,
//! left_count, right_count]`, where the counts are the sizes of the left and
//! right subtrees. In an in-order list the subtree root of any range is the
//! node whose `left_count + right_count + 1` equals the range length, which
//! is enough to rebuild the tree bottom-up.

use rlp::{Rlp, RlpStream};
use shared_types::{keccak256, Hash};

use crate::events::SyncError;

/// Deeper trees are rejected rather than recursed into.
const MAX_RECOVERY_DEPTH: usize = 1024;

/// A trie node as carried in a state chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncTrieNode {
    pub path: Vec<u8>,
    pub value: Vec<u8>,
    /// The value is stored out of line and hashed into the node.
    pub has_long_value: bool,
    pub embeddable: bool,
    pub left_count: u64,
    pub right_count: u64,
}

impl SyncTrieNode {
    pub fn encode(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(6);
        stream.append(&self.path);
        stream.append(&self.value);
        stream.append(&self.has_long_value);
        stream.append(&self.embeddable);
        stream.append(&self.left_count);
        stream.append(&self.right_count);
        stream.out().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        let rlp = Rlp::new(bytes);
        if rlp.item_count()? != 6 {
            return Err(rlp::DecoderError::RlpIncorrectListLen.into());
        }
        Ok(Self {
            path: rlp.val_at(0)?,
            value: rlp.val_at(1)?,
            has_long_value: rlp.val_at(2)?,
            embeddable: rlp.val_at(3)?,
            left_count: rlp.val_at(4)?,
            right_count: rlp.val_at(5)?,
        })
    }

    /// Nodes in the subtree rooted here, `None` on overflow.
    pub fn subtree_size(&self) -> Option<u64> {
        self.left_count
            .checked_add(self.right_count)?
            .checked_add(1)
    }

    /// Hash of the node given its children's hashes.
    pub fn hash_with_children(&self, left: Option<Hash>, right: Option<Hash>) -> Hash {
        let mut stream = RlpStream::new_list(4);
        stream.append(&self.path);
        if self.has_long_value {
            stream.append(&keccak256(&self.value).as_slice());
        } else {
            stream.append(&self.value);
        }
        for child in [left, right] {
            match child {
                Some(hash) => stream.append(&hash.as_slice()),
                None => stream.append_empty_data(),
            };
        }
        keccak256(&stream.out())
    }
}

/// Rebuild the trie from its in-order node list.
///
/// `on_node` is called for every node, children before parents, with the
/// node's hash. Returns the root hash.
pub fn recover_trie<F>(nodes: &[SyncTrieNode], mut on_node: F) -> Result<Hash, SyncError>
where
    F: FnMut(Hash, &SyncTrieNode),
{
    if nodes.is_empty() {
        return Err(SyncError::TrieRecovery("no nodes received".to_string()));
    }
    recover_range(nodes, 0, &mut on_node)?
        .ok_or_else(|| SyncError::TrieRecovery("no root recovered".to_string()))
}

fn recover_range<F>(
    nodes: &[SyncTrieNode],
    depth: usize,
    on_node: &mut F,
) -> Result<Option<Hash>, SyncError>
where
    F: FnMut(Hash, &SyncTrieNode),
{
    if nodes.is_empty() {
        return Ok(None);
    }
    if depth > MAX_RECOVERY_DEPTH {
        return Err(SyncError::TrieRecovery(format!(
            "trie deeper than {MAX_RECOVERY_DEPTH}"
        )));
    }

    let length = nodes.len() as u64;
    let root_index = nodes
        .iter()
        .position(|node| node.subtree_size() == Some(length))
        .ok_or_else(|| {
            SyncError::TrieRecovery(format!("no subtree root for a range of {length} nodes"))
        })?;

    let root = &nodes[root_index];
    if root.left_count != root_index as u64 {
        return Err(SyncError::TrieRecovery(format!(
            "root at index {root_index} claims {} left nodes",
            root.left_count
        )));
    }

    let left = recover_range(&nodes[..root_index], depth + 1, on_node)?;
    let right = recover_range(&nodes[root_index + 1..], depth + 1, on_node)?;
    let hash = root.hash_with_children(left, right);
    on_node(hash, root);
    Ok(Some(hash))
}

/// In-order node list of a balanced tree built over `values`.
#[cfg(any(test, feature = "test-utils"))]
pub fn balanced_trie(values: &[Vec<u8>]) -> Vec<SyncTrieNode> {
    fn build(values: &[Vec<u8>], out: &mut Vec<SyncTrieNode>) {
        if values.is_empty() {
            return;
        }
        let mid = values.len() / 2;
        build(&values[..mid], out);
        out.push(SyncTrieNode {
            path: vec![mid as u8],
            value: values[mid].clone(),
            has_long_value: values[mid].len() > 32,
            embeddable: values[mid].len() <= 32,
            left_count: mid as u64,
            right_count: (values.len() - mid - 1) as u64,
        });
        build(&values[mid + 1..], out);
    }

    let mut nodes = Vec::with_capacity(values.len());
    build(values, &mut nodes);
    nodes
}
