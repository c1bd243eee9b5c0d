//! P2P message types for the Block Sync subsystem.
//!
//! Messages arrive already decoded from the transport; this module only
//! models their identity ([`MessageType`]) and the payload each handler needs.

use std::sync::Arc;

use shared_types::{Block, BlockHeader, BlockIdentifier, Hash, Transaction, U256};

/// Wire discriminant of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageType {
    Status = 1,
    Block = 2,
    GetBlock = 3,
    BlockHeaders = 4,
    NewBlockHashes = 6,
    Transactions = 7,
    BlockHashRequest = 8,
    BlockHeadersRequest = 9,
    BlockHeadersResponse = 10,
    BlockRequest = 11,
    BlockResponse = 12,
    SkeletonResponse = 13,
    BodyRequest = 14,
    BodyResponse = 15,
    SkeletonRequest = 16,
    BlockHashResponse = 18,
    StateChunkRequest = 22,
    StateChunkResponse = 23,
}

impl MessageType {
    pub const ALL: [MessageType; 18] = [
        MessageType::Status,
        MessageType::Block,
        MessageType::GetBlock,
        MessageType::BlockHeaders,
        MessageType::NewBlockHashes,
        MessageType::Transactions,
        MessageType::BlockHashRequest,
        MessageType::BlockHeadersRequest,
        MessageType::BlockHeadersResponse,
        MessageType::BlockRequest,
        MessageType::BlockResponse,
        MessageType::SkeletonResponse,
        MessageType::BodyRequest,
        MessageType::BodyResponse,
        MessageType::SkeletonRequest,
        MessageType::BlockHashResponse,
        MessageType::StateChunkRequest,
        MessageType::StateChunkResponse,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.id() == id)
    }

    /// Scheduling class of this message type. Fixed for the process lifetime.
    pub fn priority_class(self) -> PriorityClass {
        match self {
            MessageType::Status
            | MessageType::BlockHeadersResponse
            | MessageType::BlockResponse
            | MessageType::BodyResponse
            | MessageType::SkeletonResponse
            | MessageType::BlockHashResponse
            | MessageType::StateChunkResponse => PriorityClass::Priority,
            MessageType::NewBlockHashes => PriorityClass::RateLimited,
            _ => PriorityClass::BestEffort,
        }
    }
}

/// Scheduling class derived from [`MessageType`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PriorityClass {
    /// Sync responses and status; drained first.
    Priority,
    /// Lossy per-peer window (block hash announcements).
    RateLimited,
    BestEffort,
}

/// Immutable snapshot of a chain head.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub best_block_number: u64,
    pub best_block_hash: Hash,
    pub parent_hash: Option<Hash>,
    pub total_difficulty: Option<U256>,
}

impl Status {
    pub fn new(best_block_number: u64, best_block_hash: Hash) -> Self {
        Self {
            best_block_number,
            best_block_hash,
            parent_hash: None,
            total_difficulty: None,
        }
    }
}

/// Request for one chunk of a remote state trie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateChunkRequest {
    pub id: u64,
    /// Block whose state root is transferred.
    pub block_number: u64,
    /// Byte offset in the in-order trie walk.
    pub from: u64,
    /// Chunk size in KiB.
    pub chunk_size: u64,
}

/// One chunk of a state trie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateChunkResponse {
    pub id: u64,
    /// RLP list of `[payload, original_size]` entries.
    pub chunk: Vec<u8>,
    pub block_number: u64,
    pub from: u64,
    pub to: u64,
    /// The trie walk was exhausted by this chunk.
    pub complete: bool,
}

/// A decoded peer message.
#[derive(Clone, Debug)]
pub enum Message {
    Status(Status),
    Block(Arc<Block>),
    GetBlock { hash: Hash },
    BlockHeaders(Vec<BlockHeader>),
    NewBlockHashes(Vec<BlockIdentifier>),
    Transactions(Vec<Transaction>),
    BlockHashRequest { id: u64, height: u64 },
    BlockHashResponse { id: u64, hash: Hash },
    BlockHeadersRequest { id: u64, hash: Hash, count: u32 },
    BlockHeadersResponse { id: u64, headers: Vec<BlockHeader> },
    BlockRequest { id: u64, hash: Hash },
    BlockResponse { id: u64, block: Arc<Block> },
    BodyRequest { id: u64, hash: Hash },
    BodyResponse {
        id: u64,
        transactions: Vec<Transaction>,
        uncles: Vec<BlockHeader>,
    },
    SkeletonRequest { id: u64, start_number: u64 },
    SkeletonResponse {
        id: u64,
        identifiers: Vec<BlockIdentifier>,
    },
    StateChunkRequest(StateChunkRequest),
    StateChunkResponse(StateChunkResponse),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Status(_) => MessageType::Status,
            Message::Block(_) => MessageType::Block,
            Message::GetBlock { .. } => MessageType::GetBlock,
            Message::BlockHeaders(_) => MessageType::BlockHeaders,
            Message::NewBlockHashes(_) => MessageType::NewBlockHashes,
            Message::Transactions(_) => MessageType::Transactions,
            Message::BlockHashRequest { .. } => MessageType::BlockHashRequest,
            Message::BlockHashResponse { .. } => MessageType::BlockHashResponse,
            Message::BlockHeadersRequest { .. } => MessageType::BlockHeadersRequest,
            Message::BlockHeadersResponse { .. } => MessageType::BlockHeadersResponse,
            Message::BlockRequest { .. } => MessageType::BlockRequest,
            Message::BlockResponse { .. } => MessageType::BlockResponse,
            Message::BodyRequest { .. } => MessageType::BodyRequest,
            Message::BodyResponse { .. } => MessageType::BodyResponse,
            Message::SkeletonRequest { .. } => MessageType::SkeletonRequest,
            Message::SkeletonResponse { .. } => MessageType::SkeletonResponse,
            Message::StateChunkRequest(_) => MessageType::StateChunkRequest,
            Message::StateChunkResponse(_) => MessageType::StateChunkResponse,
        }
    }

    /// Canonical encoding used for content hashing.
    ///
    /// Only full blocks and transaction batches are hashed; other message
    /// types return `None`.
    pub fn encoded(&self) -> Option<Vec<u8>> {
        let payload = match self {
            Message::Block(block) => rlp::encode(block.as_ref()),
            Message::Transactions(txs) => rlp::encode_list::<Transaction, Transaction>(txs),
            _ => return None,
        };
        let mut encoded = Vec::with_capacity(payload.len() + 1);
        encoded.push(self.message_type().id());
        encoded.extend_from_slice(&payload);
        Some(encoded)
    }
}
