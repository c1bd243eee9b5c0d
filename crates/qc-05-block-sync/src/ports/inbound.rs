//! Inbound ports (API) for the Block Sync subsystem.

use std::sync::Arc;

use shared_types::{Block, BlockHeader, BlockIdentifier, Hash, PeerId};

use crate::domain::{AdmissionRejection, BlockNodeInformation, ProcessResult};
use crate::events::{Message, StateChunkRequest, StateChunkResponse, Status, SyncError};

/// Entry point for inbound peer messages.
pub trait MessageHandlerApi: Send + Sync {
    /// Admit a message for asynchronous processing.
    ///
    /// Rejections are silent towards the peer; the reason is returned to
    /// the caller only.
    fn post_message(&self, sender: PeerId, message: Message) -> Result<(), AdmissionRejection>;
}

/// Block processing and block serving.
pub trait BlockProcessor: Send + Sync {
    /// Process a block received from `sender` (or produced locally).
    fn process_block(&self, sender: Option<&PeerId>, block: Arc<Block>) -> ProcessResult;

    fn process_status(&self, sender: &PeerId, status: &Status);

    fn process_new_block_hashes(&self, sender: &PeerId, identifiers: &[BlockIdentifier]);

    fn process_block_headers(&self, sender: &PeerId, headers: Vec<BlockHeader>);

    fn process_get_block(&self, sender: &PeerId, hash: &Hash);

    fn process_block_request(&self, sender: &PeerId, id: u64, hash: &Hash);

    fn process_block_headers_request(&self, sender: &PeerId, id: u64, hash: &Hash, count: u32);

    fn process_body_request(&self, sender: &PeerId, id: u64, hash: &Hash);

    fn process_block_hash_request(&self, sender: &PeerId, id: u64, height: u64);

    fn process_skeleton_request(&self, sender: &PeerId, id: u64, start_number: u64);

    /// Known to the chain or staged.
    fn has_block(&self, hash: &Hash) -> bool;

    /// A peer reported a head far enough ahead to warrant long-range sync.
    fn has_better_block_to_sync(&self) -> bool;

    fn last_known_block_number(&self) -> u64;

    fn node_information(&self) -> Arc<BlockNodeInformation>;
}

/// State snapshot serving and consumption.
pub trait SnapshotApi: Send + Sync {
    fn process_state_chunk_request(
        &self,
        sender: &PeerId,
        request: StateChunkRequest,
    ) -> Result<(), SyncError>;

    fn process_state_chunk_response(
        &self,
        sender: &PeerId,
        response: StateChunkResponse,
    ) -> Result<(), SyncError>;
}
