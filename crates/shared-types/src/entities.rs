//! # Core Domain Entities
//!
//! Defines the chain entities moved around by the sync engine.
//!
//! ## Clusters
//!
//! - **Chain**: `Block`, `BlockHeader`, `Transaction`, `BlockIdentifier`
//! - **Networking**: `NodeId` / `PeerId`

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::encoding::keccak256;

// Re-export U256 from primitive-types for use across all subsystems
pub use primitive_types::U256;

// =============================================================================
// CLUSTER A: THE CHAIN
// =============================================================================

/// A 32-byte Keccak-256 hash.
pub type Hash = [u8; 32];

/// A 20-byte account address.
pub type Address = [u8; 20];

/// The header of a block. Its hash identifies the block everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    /// Block height in the chain.
    pub number: u64,
    /// Hash of the parent block.
    pub parent_hash: Hash,
    /// Root hash of the state trie after applying this block.
    pub state_root: Hash,
    /// Root of the transactions included in the block.
    pub transactions_root: Hash,
    /// Address credited with the block reward.
    pub coinbase: Address,
    /// Mining difficulty of this block.
    pub difficulty: U256,
    /// Unix timestamp when the block was mined.
    pub timestamp: u64,
    /// Free-form extra data.
    pub extra_data: Vec<u8>,
}

impl BlockHeader {
    /// Keccak-256 of the canonical RLP encoding.
    pub fn hash(&self) -> Hash {
        keccak256(&rlp::encode(self))
    }
}

/// A transaction as relayed between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender's nonce.
    pub nonce: u64,
    /// Recipient (none for contract creation).
    pub to: Option<Address>,
    /// Transferred value.
    pub value: U256,
    /// Call data.
    pub data: Vec<u8>,
    /// Raw signature bytes.
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Keccak-256 of the canonical RLP encoding.
    pub fn hash(&self) -> Hash {
        keccak256(&rlp::encode(self))
    }
}

/// A full block: header, transactions and uncle headers.
///
/// The hash is computed once at construction.
#[derive(Debug, Clone)]
pub struct Block {
    header: BlockHeader,
    transactions: Vec<Transaction>,
    uncles: Vec<BlockHeader>,
    hash: Hash,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>, uncles: Vec<BlockHeader>) -> Self {
        let hash = header.hash();
        Self {
            header,
            transactions,
            uncles,
            hash,
        }
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> Hash {
        self.header.parent_hash
    }

    pub fn coinbase(&self) -> Address {
        self.header.coinbase
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn uncles(&self) -> &[BlockHeader] {
        &self.uncles
    }

    /// Hashes of the uncle headers, in block order.
    pub fn uncle_hashes(&self) -> Vec<Hash> {
        self.uncles.iter().map(BlockHeader::hash).collect()
    }

    /// Identifier used in announcements and skeletons.
    pub fn identifier(&self) -> BlockIdentifier {
        BlockIdentifier {
            hash: self.hash,
            number: self.header.number,
        }
    }

    /// Short hex prefix of the hash for log lines.
    pub fn short_hash(&self) -> String {
        short_hex(&self.hash)
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Block {}

/// A `(hash, number)` pair naming a block without carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockIdentifier {
    pub hash: Hash,
    pub number: u64,
}

// =============================================================================
// CLUSTER B: NETWORKING
// =============================================================================

/// Unique identifier for a node in the network.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct NodeId(pub [u8; 32]);

/// A peer identifier (alias for `NodeId` in peer contexts).
pub type PeerId = NodeId;

impl NodeId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&short_hex(&self.0))
    }
}

/// First eight hex characters of a byte string.
pub fn short_hex(bytes: &[u8]) -> String {
    bytes.iter().take(4).map(|b| format!("{b:02x}")).collect()
}
