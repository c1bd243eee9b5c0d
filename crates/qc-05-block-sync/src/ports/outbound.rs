//! Outbound ports (SPI) for the Block Sync subsystem.
//!
//! Collaborators owned by the embedding node: the chain, the peer
//! transport, scoring, the sync driver and the state trie store.

use std::sync::Arc;
use std::time::Duration;

use shared_types::{Block, BlockHeader, Hash, PeerId, Transaction};

use crate::domain::{ImportResult, ScoringEvent};
use crate::events::{Message, MessageType, Status, SyncError};

/// The canonical chain and its side branches.
pub trait Blockchain: Send + Sync {
    fn has_block_in_some_blockchain(&self, hash: &Hash) -> bool;

    /// Connect a block whose parent is known.
    fn try_to_connect(&self, block: &Arc<Block>) -> ImportResult;

    fn best_block(&self) -> Arc<Block>;

    fn block_by_hash(&self, hash: &Hash) -> Option<Arc<Block>>;

    /// Canonical block at `number`.
    fn block_by_number(&self, number: u64) -> Option<Arc<Block>>;
}

/// Peer network interface for P2P communication.
pub trait PeerNetwork: Send + Sync {
    /// Send message to a specific peer.
    fn send_message(&self, peer: &PeerId, message: Message) -> Result<(), SyncError>;

    /// Get list of connected peers.
    fn active_peers(&self) -> Vec<PeerId>;

    /// Broadcast message to multiple peers.
    fn broadcast(&self, peers: &[PeerId], message: Message) -> Vec<Result<(), SyncError>> {
        peers
            .iter()
            .map(|peer| self.send_message(peer, message.clone()))
            .collect()
    }
}

/// Per-peer reputation.
pub trait PeerScoring: Send + Sync {
    /// Admission score of a message; negative means reject.
    fn score(&self, peer: &PeerId, now_ms: u64, message_type: MessageType) -> f64;

    fn record_event(&self, peer: &PeerId, event: ScoringEvent);
}

/// Source of our own chain head status.
pub trait StatusResolver: Send + Sync {
    fn current_status(&self) -> Status;
}

/// Drives long-range sync from peer statuses and request/response traffic.
pub trait SyncEngine: Send + Sync {
    /// Idle time elapsed since the previous tick.
    fn on_time_passed(&self, elapsed: Duration);

    fn process_status(&self, sender: &PeerId, status: &Status);

    /// Responses to requests issued by the sync engine.
    fn process_response(&self, sender: &PeerId, message: Message);
}

/// Transaction pool entry point.
pub trait TransactionGateway: Send + Sync {
    fn receive_transactions(&self, sender: &PeerId, transactions: Vec<Transaction>);
}

/// Consensus header validation applied before connecting a block.
pub trait BlockHeaderValidator: Send + Sync {
    fn is_valid(&self, header: &BlockHeader) -> bool;
}

/// One node of an in-order trie walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrieNode {
    /// Sync encoding of the node.
    pub encoded: Vec<u8>,
    pub has_long_value: bool,
    pub embeddable: bool,
}

/// In-order walk over a trie restricted to a byte range.
pub trait TrieNodeCursor: Iterator<Item = TrieNode> {
    /// No nodes remain beyond the requested range.
    fn is_exhausted(&self) -> bool;
}

/// Persistent state trie storage.
pub trait TrieStore: Send + Sync {
    /// In-order walk of the trie rooted at `root`, over nodes whose byte
    /// offset lies in `from..to`. `None` if the root is unknown.
    fn in_order_nodes<'a>(
        &'a self,
        root: &Hash,
        from: u64,
        to: u64,
    ) -> Option<Box<dyn TrieNodeCursor + 'a>>;

    /// Persist a recovered node under its hash.
    fn save_node(&self, hash: Hash, encoded: &[u8]);
}

/// In-memory port implementations for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashMap, HashSet};

    /// Block `parent.number + 1` on top of `parent`; `salt` separates siblings.
    pub fn make_child(parent: &Block, salt: u8) -> Arc<Block> {
        Arc::new(Block::new(
            BlockHeader {
                number: parent.number() + 1,
                parent_hash: parent.hash(),
                extra_data: vec![salt],
                ..Default::default()
            },
            vec![],
            vec![],
        ))
    }

    /// Linear chain of `count` blocks on top of `parent`.
    pub fn make_chain(parent: &Block, count: usize, salt: u8) -> Vec<Arc<Block>> {
        let mut blocks: Vec<Arc<Block>> = Vec::with_capacity(count);
        for _ in 0..count {
            let next = match blocks.last() {
                Some(last) => make_child(last, salt),
                None => make_child(parent, salt),
            };
            blocks.push(next);
        }
        blocks
    }

    struct ChainState {
        blocks: HashMap<Hash, Arc<Block>>,
        canonical: BTreeMap<u64, Hash>,
        best: Arc<Block>,
        invalid: HashSet<Hash>,
        connect_attempts: Vec<Hash>,
    }

    /// Chain that accepts any block whose parent it knows.
    pub struct MockBlockchain {
        state: Mutex<ChainState>,
    }

    impl MockBlockchain {
        pub fn with_genesis() -> Self {
            let genesis = Arc::new(Block::new(BlockHeader::default(), vec![], vec![]));
            Self {
                state: Mutex::new(ChainState {
                    blocks: HashMap::from([(genesis.hash(), Arc::clone(&genesis))]),
                    canonical: BTreeMap::from([(0, genesis.hash())]),
                    best: genesis,
                    invalid: HashSet::new(),
                    connect_attempts: Vec::new(),
                }),
            }
        }

        /// Genesis plus `length` canonical blocks.
        pub fn with_canonical_chain(length: usize) -> Self {
            let chain = Self::with_genesis();
            let genesis = chain.best_block();
            for block in make_chain(&genesis, length, 0) {
                chain.try_to_connect(&block);
            }
            chain
        }

        pub fn genesis(&self) -> Arc<Block> {
            let state = self.state.lock();
            let hash = state.canonical.get(&0).copied().unwrap_or_default();
            Arc::clone(&state.blocks[&hash])
        }

        pub fn mark_invalid(&self, hash: Hash) {
            self.state.lock().invalid.insert(hash);
        }

        /// Drop `number` from the canonical index, as if it were pruned.
        pub fn forget_canonical(&self, number: u64) {
            self.state.lock().canonical.remove(&number);
        }

        /// Hashes passed to `try_to_connect`, in call order.
        pub fn connect_attempts(&self) -> Vec<Hash> {
            self.state.lock().connect_attempts.clone()
        }
    }

    impl Blockchain for MockBlockchain {
        fn has_block_in_some_blockchain(&self, hash: &Hash) -> bool {
            self.state.lock().blocks.contains_key(hash)
        }

        fn try_to_connect(&self, block: &Arc<Block>) -> ImportResult {
            let mut state = self.state.lock();
            let hash = block.hash();
            state.connect_attempts.push(hash);

            if state.invalid.contains(&hash) {
                return ImportResult::Invalid;
            }
            if state.blocks.contains_key(&hash) {
                return ImportResult::Exist;
            }
            if !state.blocks.contains_key(&block.parent_hash()) {
                return ImportResult::NoParent;
            }

            state.blocks.insert(hash, Arc::clone(block));
            if block.number() > state.best.number() {
                state.best = Arc::clone(block);
                state.canonical.insert(block.number(), hash);
                ImportResult::ImportedBest
            } else {
                ImportResult::ImportedNotBest
            }
        }

        fn best_block(&self) -> Arc<Block> {
            Arc::clone(&self.state.lock().best)
        }

        fn block_by_hash(&self, hash: &Hash) -> Option<Arc<Block>> {
            self.state.lock().blocks.get(hash).cloned()
        }

        fn block_by_number(&self, number: u64) -> Option<Arc<Block>> {
            let state = self.state.lock();
            let hash = state.canonical.get(&number)?;
            state.blocks.get(hash).cloned()
        }
    }

    /// Records every message sent.
    #[derive(Default)]
    pub struct MockNetwork {
        peers: Mutex<Vec<PeerId>>,
        sent: Mutex<Vec<(PeerId, Message)>>,
    }

    impl MockNetwork {
        pub fn with_peers(peers: Vec<PeerId>) -> Self {
            Self {
                peers: Mutex::new(peers),
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn sent(&self) -> Vec<(PeerId, Message)> {
            self.sent.lock().clone()
        }

        pub fn take_sent(&self) -> Vec<(PeerId, Message)> {
            std::mem::take(&mut *self.sent.lock())
        }

        pub fn sent_to(&self, peer: &PeerId) -> Vec<Message> {
            self.sent
                .lock()
                .iter()
                .filter(|(to, _)| to == peer)
                .map(|(_, message)| message.clone())
                .collect()
        }
    }

    impl PeerNetwork for MockNetwork {
        fn send_message(&self, peer: &PeerId, message: Message) -> Result<(), SyncError> {
            self.sent.lock().push((*peer, message));
            Ok(())
        }

        fn active_peers(&self) -> Vec<PeerId> {
            self.peers.lock().clone()
        }
    }

    /// Scores every peer 1.0 unless overridden.
    #[derive(Default)]
    pub struct MockScoring {
        scores: Mutex<HashMap<PeerId, f64>>,
        events: Mutex<Vec<(PeerId, ScoringEvent)>>,
    }

    impl MockScoring {
        pub fn set_score(&self, peer: PeerId, score: f64) {
            self.scores.lock().insert(peer, score);
        }

        pub fn events(&self) -> Vec<(PeerId, ScoringEvent)> {
            self.events.lock().clone()
        }
    }

    impl PeerScoring for MockScoring {
        fn score(&self, peer: &PeerId, _now_ms: u64, _message_type: MessageType) -> f64 {
            self.scores.lock().get(peer).copied().unwrap_or(1.0)
        }

        fn record_event(&self, peer: &PeerId, event: ScoringEvent) {
            self.events.lock().push((*peer, event));
        }
    }

    pub struct MockStatusResolver {
        pub status: Status,
    }

    impl StatusResolver for MockStatusResolver {
        fn current_status(&self) -> Status {
            self.status.clone()
        }
    }

    #[derive(Default)]
    pub struct MockSyncEngine {
        ticks: Mutex<Vec<Duration>>,
        statuses: Mutex<Vec<(PeerId, Status)>>,
        responses: Mutex<Vec<(PeerId, Message)>>,
    }

    impl MockSyncEngine {
        pub fn ticks(&self) -> Vec<Duration> {
            self.ticks.lock().clone()
        }

        pub fn statuses(&self) -> Vec<(PeerId, Status)> {
            self.statuses.lock().clone()
        }

        pub fn responses(&self) -> Vec<(PeerId, Message)> {
            self.responses.lock().clone()
        }
    }

    impl SyncEngine for MockSyncEngine {
        fn on_time_passed(&self, elapsed: Duration) {
            self.ticks.lock().push(elapsed);
        }

        fn process_status(&self, sender: &PeerId, status: &Status) {
            self.statuses.lock().push((*sender, status.clone()));
        }

        fn process_response(&self, sender: &PeerId, message: Message) {
            self.responses.lock().push((*sender, message));
        }
    }

    #[derive(Default)]
    pub struct MockTransactionGateway {
        received: Mutex<Vec<(PeerId, Vec<Transaction>)>>,
    }

    impl MockTransactionGateway {
        pub fn received(&self) -> Vec<(PeerId, Vec<Transaction>)> {
            self.received.lock().clone()
        }
    }

    impl TransactionGateway for MockTransactionGateway {
        fn receive_transactions(&self, sender: &PeerId, transactions: Vec<Transaction>) {
            self.received.lock().push((*sender, transactions));
        }
    }

    /// Rejects headers whose hash was marked invalid.
    #[derive(Default)]
    pub struct MockHeaderValidator {
        invalid: Mutex<HashSet<Hash>>,
    }

    impl MockHeaderValidator {
        pub fn reject(&self, hash: Hash) {
            self.invalid.lock().insert(hash);
        }
    }

    impl BlockHeaderValidator for MockHeaderValidator {
        fn is_valid(&self, header: &BlockHeader) -> bool {
            !self.invalid.lock().contains(&header.hash())
        }
    }

    struct MockTrieCursor {
        nodes: std::vec::IntoIter<TrieNode>,
        exhausted: bool,
    }

    impl Iterator for MockTrieCursor {
        type Item = TrieNode;

        fn next(&mut self) -> Option<TrieNode> {
            self.nodes.next()
        }
    }

    impl TrieNodeCursor for MockTrieCursor {
        fn is_exhausted(&self) -> bool {
            self.exhausted
        }
    }

    /// Tries kept as in-order node lists; a node's offset is the summed
    /// encoded length of the nodes before it.
    #[derive(Default)]
    pub struct MockTrieStore {
        tries: Mutex<HashMap<Hash, Vec<TrieNode>>>,
        saved: Mutex<HashMap<Hash, Vec<u8>>>,
    }

    impl MockTrieStore {
        pub fn insert_trie(&self, root: Hash, in_order: Vec<TrieNode>) {
            self.tries.lock().insert(root, in_order);
        }

        pub fn saved_nodes(&self) -> HashMap<Hash, Vec<u8>> {
            self.saved.lock().clone()
        }
    }

    impl TrieStore for MockTrieStore {
        fn in_order_nodes<'a>(
            &'a self,
            root: &Hash,
            from: u64,
            to: u64,
        ) -> Option<Box<dyn TrieNodeCursor + 'a>> {
            let tries = self.tries.lock();
            let nodes = tries.get(root)?;

            let mut offset = 0u64;
            let mut selected = Vec::new();
            let mut exhausted = true;
            for node in nodes {
                if offset >= to {
                    exhausted = false;
                    break;
                }
                if offset >= from {
                    selected.push(node.clone());
                }
                offset += node.encoded.len() as u64;
            }

            Some(Box::new(MockTrieCursor {
                nodes: selected.into_iter(),
                exhausted,
            }))
        }

        fn save_node(&self, hash: Hash, encoded: &[u8]) {
            self.saved.lock().insert(hash, encoded.to_vec());
        }
    }
}
