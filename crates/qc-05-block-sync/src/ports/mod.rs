//! Ports Layer
//!
//! - Driving ports (inbound): message admission, block processing, snapshot serving
//! - Driven ports (outbound): chain, peer network, scoring, sync engine, trie store

pub mod inbound;
pub mod outbound;

pub use inbound::{BlockProcessor, MessageHandlerApi, SnapshotApi};
pub use outbound::{
    BlockHeaderValidator, Blockchain, PeerNetwork, PeerScoring, StatusResolver, SyncEngine,
    TransactionGateway, TrieNode, TrieNodeCursor, TrieStore,
};

#[cfg(any(test, feature = "test-utils"))]
pub use outbound::mocks;
