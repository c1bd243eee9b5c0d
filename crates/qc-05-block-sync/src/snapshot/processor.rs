//! Snapshot processor: serves state chunks and drives a terminating,
//! multi-peer state sync on the requesting side.

use std::sync::Arc;

use parking_lot::Mutex;
use shared_types::{Hash, PeerId};
use tracing::{debug, info, warn};

use crate::config::SnapshotConfig;
use crate::domain::ScoringEvent;
use crate::events::{Message, StateChunkRequest, StateChunkResponse, SyncError};
use crate::ports::{Blockchain, PeerNetwork, PeerScoring, SnapshotApi, TrieStore};

use super::codec::{decode_chunk, encode_chunk};
use super::state::{SnapshotPhase, SnapshotSyncState, SnapshotTarget};
use super::trie::{recover_trie, SyncTrieNode};
use super::{CHUNK_ITEM_SIZE, MAX_CHUNK_SIZE_KIB};

type OutgoingRequests = Vec<(PeerId, StateChunkRequest)>;

pub struct SnapshotProcessor<B: Blockchain, T: TrieStore> {
    config: SnapshotConfig,
    blockchain: Arc<B>,
    trie_store: Arc<T>,
    network: Arc<dyn PeerNetwork>,
    scoring: Arc<dyn PeerScoring>,
    state: Mutex<SnapshotSyncState>,
}

impl<B: Blockchain, T: TrieStore> SnapshotProcessor<B, T> {
    pub fn new(
        config: SnapshotConfig,
        blockchain: Arc<B>,
        trie_store: Arc<T>,
        network: Arc<dyn PeerNetwork>,
        scoring: Arc<dyn PeerScoring>,
    ) -> Self {
        Self {
            config,
            blockchain,
            trie_store,
            network,
            scoring,
            state: Mutex::new(SnapshotSyncState::default()),
        }
    }

    /// Start (or restart) a sync of `target` against `peers`, tried in order.
    pub fn start_syncing(&self, peers: &[PeerId], target: SnapshotTarget) -> Result<(), SyncError> {
        self.config.validate()?;
        let requests = {
            let mut state = self.state.lock();
            *state = SnapshotSyncState::new(peers.to_vec(), target);
            info!(
                "[qc-05] Starting snapshot sync of block {} with {} candidate peers",
                target.block_number,
                peers.len()
            );
            self.start_round(&mut state)?
        };
        self.send_requests(requests);
        Ok(())
    }

    pub fn phase(&self) -> SnapshotPhase {
        self.state.lock().phase()
    }

    pub fn state_size(&self) -> u64 {
        self.state.lock().state_size()
    }

    pub fn chunk_bytes(&self) -> u64 {
        self.state.lock().chunk_bytes()
    }

    pub fn round(&self) -> u64 {
        self.state.lock().round()
    }

    pub fn failed_peers(&self) -> Vec<PeerId> {
        self.state.lock().failed_peers().iter().copied().collect()
    }

    /// Peer serving the current round.
    pub fn current_peer(&self) -> Option<PeerId> {
        self.state.lock().peer()
    }

    pub fn last_recovered_root(&self) -> Option<Hash> {
        self.state.lock().last_recovered_root()
    }

    fn start_round(&self, state: &mut SnapshotSyncState) -> Result<OutgoingRequests, SyncError> {
        state.reset_round();
        let peers = state.available_peers(self.config.parallel_requests);
        if peers.is_empty() {
            state.phase = SnapshotPhase::Failed;
            warn!("[qc-05] Snapshot sync failed: no candidate peers left");
            return Err(SyncError::NoSnapshotPeers);
        }

        state.phase = SnapshotPhase::Running;
        state.round_peers = peers.clone();
        Ok(peers
            .into_iter()
            .filter_map(|peer| self.next_request(state, peer))
            .collect())
    }

    fn next_request(
        &self,
        state: &mut SnapshotSyncState,
        peer: PeerId,
    ) -> Option<(PeerId, StateChunkRequest)> {
        let target = state.target()?;
        let from = state.next_request_from;
        state.next_request_from = from.saturating_add(self.config.chunk_bytes());
        let id = state.next_id();
        state.outstanding.insert(from, (peer, id));
        let request = StateChunkRequest {
            id,
            block_number: target.block_number,
            from,
            chunk_size: self.config.chunk_size,
        };
        Some((peer, request))
    }

    fn send_requests(&self, requests: OutgoingRequests) {
        for (peer, request) in requests {
            debug!(
                "[qc-05] Requesting state chunk from {} at offset {}",
                peer, request.from
            );
            if let Err(e) = self
                .network
                .send_message(&peer, Message::StateChunkRequest(request))
            {
                debug!("[qc-05] Failed to send state chunk request to {}: {}", peer, e);
            }
        }
    }

    /// Fail the round because of `peer` and move on to the next candidate.
    fn fail_round(
        &self,
        state: &mut SnapshotSyncState,
        peer: &PeerId,
        error: &SyncError,
    ) -> OutgoingRequests {
        warn!(
            "[qc-05] Snapshot round {} failed on peer {}: {}",
            state.round(),
            peer,
            error
        );
        self.scoring.record_event(peer, ScoringEvent::InvalidStateChunk);
        state.failed_peers.insert(*peer);
        self.start_round(state).unwrap_or_default()
    }

    /// Apply buffered chunks in offset order. Returns whether the final chunk
    /// was applied.
    fn apply_ready_chunks(state: &mut SnapshotSyncState) -> Result<bool, SyncError> {
        while let Some(response) = state.pending.remove(&state.next_expected_from) {
            let entries = decode_chunk(&response.chunk)?;
            state.state_size += entries.len() as u64;
            state.chunk_bytes += response.chunk.len() as u64;
            state.entries.extend(entries);
            state.next_expected_from = response.to;
            debug!(
                "[qc-05] Applied state chunk {}..{} ({} nodes so far)",
                response.from, response.to, state.state_size
            );
            if response.complete {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Rebuild the trie from the accumulated entries and verify its root.
    fn recover(&self, state: &SnapshotSyncState) -> Result<Hash, SyncError> {
        let nodes = state
            .entries
            .iter()
            .map(|entry| SyncTrieNode::decode(entry))
            .collect::<Result<Vec<_>, _>>()?;

        let root = recover_trie(&nodes, |hash, node| {
            self.trie_store.save_node(hash, &node.encode());
        })?;

        match state.target().and_then(|target| target.state_root) {
            Some(expected) if expected != root => Err(SyncError::RootMismatch {
                expected,
                actual: root,
            }),
            _ => Ok(root),
        }
    }

    fn consume_response(
        &self,
        state: &mut SnapshotSyncState,
        sender: &PeerId,
        response: StateChunkResponse,
    ) -> Result<OutgoingRequests, SyncError> {
        let from = response.from;
        if state.outstanding.get(&from) != Some(&(*sender, response.id)) {
            return Err(SyncError::UnexpectedStateChunk(from));
        }
        let expected = from.saturating_add(self.config.chunk_bytes());
        if response.to != expected {
            return Err(SyncError::ChunkRangeMismatch {
                from,
                expected,
                actual: response.to,
            });
        }
        state.outstanding.remove(&from);
        state.pending.insert(from, response);

        if !Self::apply_ready_chunks(state)? {
            // Answered ranges tile the trie, so the issued frontier is the
            // next uncovered offset.
            if state.end_received() {
                return Ok(Vec::new());
            }
            return Ok(self.next_request(state, *sender).into_iter().collect());
        }

        let root = self.recover(state)?;
        info!(
            "[qc-05] Recovered state trie root {} ({} nodes, {} chunk bytes)",
            shared_types::short_hex(&root),
            state.state_size,
            state.chunk_bytes
        );
        state.phase = SnapshotPhase::Completed(root);
        state.last_recovered_root = Some(root);

        if self.config.resync_on_completion {
            return self.start_round(state);
        }
        Ok(Vec::new())
    }
}

impl<B: Blockchain, T: TrieStore> SnapshotApi for SnapshotProcessor<B, T> {
    fn process_state_chunk_request(
        &self,
        sender: &PeerId,
        request: StateChunkRequest,
    ) -> Result<(), SyncError> {
        let block = self
            .blockchain
            .block_by_number(request.block_number)
            .ok_or(SyncError::UnknownBlock(request.block_number))?;
        let root = block.header().state_root;

        let chunk_kib = request.chunk_size.clamp(1, MAX_CHUNK_SIZE_KIB);
        let to = request
            .from
            .saturating_add(chunk_kib.saturating_mul(CHUNK_ITEM_SIZE));

        let (entries, complete) = {
            let mut cursor = self
                .trie_store
                .in_order_nodes(&root, request.from, to)
                .ok_or(SyncError::MissingTrieRoot(root))?;
            let entries: Vec<Vec<u8>> = cursor.by_ref().map(|node| node.encoded).collect();
            (entries, cursor.is_exhausted())
        };

        debug!(
            "[qc-05] Serving state chunk {}..{} of block {} to {} ({} nodes, complete: {})",
            request.from,
            to,
            request.block_number,
            sender,
            entries.len(),
            complete
        );

        let response = StateChunkResponse {
            id: request.id,
            chunk: encode_chunk(entries, self.config.compression_enabled),
            block_number: request.block_number,
            from: request.from,
            to,
            complete,
        };
        self.network
            .send_message(sender, Message::StateChunkResponse(response))
    }

    fn process_state_chunk_response(
        &self,
        sender: &PeerId,
        response: StateChunkResponse,
    ) -> Result<(), SyncError> {
        let requests = {
            let mut state = self.state.lock();
            if !state.is_running() {
                debug!("[qc-05] Ignoring state chunk from {}: sync not running", sender);
                return Ok(());
            }
            if !state.round_peers.contains(sender) {
                debug!("[qc-05] Ignoring state chunk from unexpected peer {}", sender);
                return Ok(());
            }
            let expected_block = state.target().map(|target| target.block_number);
            if expected_block != Some(response.block_number) {
                debug!(
                    "[qc-05] Ignoring state chunk for block {} from {}",
                    response.block_number, sender
                );
                return Ok(());
            }
            if state.is_from_earlier_round(response.id) {
                debug!(
                    "[qc-05] Ignoring state chunk {} from {} of an earlier round",
                    response.id, sender
                );
                return Ok(());
            }

            match self.consume_response(&mut state, sender, response) {
                Ok(requests) => requests,
                Err(error) => {
                    let requests = self.fail_round(&mut state, sender, &error);
                    drop(state);
                    self.send_requests(requests);
                    return Err(error);
                }
            }
        };
        self.send_requests(requests);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mocks::{MockBlockchain, MockNetwork, MockScoring, MockTrieStore};
    use crate::ports::TrieNode;
    use crate::snapshot::trie::balanced_trie;

    type Processor = SnapshotProcessor<MockBlockchain, MockTrieStore>;

    fn peer(n: u8) -> PeerId {
        PeerId::new([n; 32])
    }

    fn values(count: usize) -> Vec<Vec<u8>> {
        (0..count).map(|i| vec![i as u8; 100]).collect()
    }

    struct Node {
        processor: Processor,
        network: Arc<MockNetwork>,
        scoring: Arc<MockScoring>,
        trie_store: Arc<MockTrieStore>,
    }

    fn node(config: SnapshotConfig) -> Node {
        let network = Arc::new(MockNetwork::default());
        let scoring = Arc::new(MockScoring::default());
        let trie_store = Arc::new(MockTrieStore::default());
        let processor = SnapshotProcessor::new(
            config,
            Arc::new(MockBlockchain::with_genesis()),
            Arc::clone(&trie_store),
            network.clone(),
            scoring.clone(),
        );
        Node {
            processor,
            network,
            scoring,
            trie_store,
        }
    }

    /// A server holding a trie over `count` values under genesis's state
    /// root. Returns the expected recovered root.
    fn serving_node(count: usize, config: SnapshotConfig) -> (Node, Hash) {
        let server = node(config);
        let nodes = balanced_trie(&values(count));
        let root = recover_trie(&nodes, |_, _| {}).unwrap();
        let in_order = nodes
            .iter()
            .map(|node| TrieNode {
                encoded: node.encode(),
                has_long_value: node.has_long_value,
                embeddable: node.embeddable,
            })
            .collect();
        server.trie_store.insert_trie([0u8; 32], in_order);
        (server, root)
    }

    fn target(state_root: Option<Hash>) -> SnapshotTarget {
        SnapshotTarget {
            block_number: 0,
            state_root,
        }
    }

    /// Shuttle messages between client and servers until nothing is in flight.
    fn pump(client: &Node, servers: &[(PeerId, &Node)], client_id: PeerId) {
        loop {
            let mut progressed = false;
            for (to, message) in client.network.take_sent() {
                if let Message::StateChunkRequest(request) = message {
                    if let Some((_, server)) = servers.iter().find(|(id, _)| *id == to) {
                        let _ = server.processor.process_state_chunk_request(&client_id, request);
                        progressed = true;
                    }
                }
            }
            for (server_id, server) in servers {
                for (_, message) in server.network.take_sent() {
                    if let Message::StateChunkResponse(response) = message {
                        let _ = client
                            .processor
                            .process_state_chunk_response(server_id, response);
                        progressed = true;
                    }
                }
            }
            if !progressed {
                break;
            }
        }
    }

    #[test]
    fn test_full_sync_recovers_root() {
        let (server, root) = serving_node(40, SnapshotConfig::for_testing());
        let client = node(SnapshotConfig::for_testing());

        client
            .processor
            .start_syncing(&[peer(1)], target(Some(root)))
            .unwrap();
        pump(&client, &[(peer(1), &server)], peer(9));

        assert_eq!(client.processor.phase(), SnapshotPhase::Completed(root));
        assert_eq!(client.processor.state_size(), 40);
        assert_eq!(client.trie_store.saved_nodes().len(), 40);
        assert!(client.trie_store.saved_nodes().contains_key(&root));
    }

    #[test]
    fn test_sync_without_compression() {
        let config = SnapshotConfig {
            compression_enabled: false,
            ..SnapshotConfig::for_testing()
        };
        let (server, root) = serving_node(25, config.clone());
        let client = node(config);

        client
            .processor
            .start_syncing(&[peer(1)], target(None))
            .unwrap();
        pump(&client, &[(peer(1), &server)], peer(9));

        assert_eq!(client.processor.phase(), SnapshotPhase::Completed(root));
        assert_eq!(client.processor.last_recovered_root(), Some(root));
    }

    #[test]
    fn test_parallel_requests_complete_in_order() {
        let config = SnapshotConfig {
            parallel_requests: 2,
            ..SnapshotConfig::for_testing()
        };
        let (server_a, root) = serving_node(40, config.clone());
        let (server_b, _) = serving_node(40, config.clone());
        let client = node(config);

        client
            .processor
            .start_syncing(&[peer(1), peer(2)], target(Some(root)))
            .unwrap();
        pump(&client, &[(peer(1), &server_a), (peer(2), &server_b)], peer(9));

        assert_eq!(client.processor.phase(), SnapshotPhase::Completed(root));
        assert_eq!(client.processor.state_size(), 40);
    }

    /// Hand each outstanding request to `server` and collect its answers.
    fn answer(client: &Node, server: &Node) -> Vec<(PeerId, StateChunkResponse)> {
        client
            .network
            .take_sent()
            .into_iter()
            .filter_map(|(to, message)| match message {
                Message::StateChunkRequest(request) => {
                    server
                        .processor
                        .process_state_chunk_request(&peer(9), request)
                        .unwrap();
                    match server.network.take_sent().pop() {
                        Some((_, Message::StateChunkResponse(response))) => Some((to, response)),
                        _ => None,
                    }
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_out_of_order_chunks_are_buffered() {
        let config = SnapshotConfig {
            parallel_requests: 3,
            ..SnapshotConfig::for_testing()
        };
        let (server, root) = serving_node(30, config.clone());
        let client = node(config);

        client
            .processor
            .start_syncing(&[peer(1), peer(2), peer(3)], target(Some(root)))
            .unwrap();
        let responses = answer(&client, &server);
        assert_eq!(responses.len(), 3);
        assert!(responses.iter().all(|(_, response)| !response.complete));

        let mut reversed = responses.into_iter().rev();
        for (sender, response) in reversed.by_ref().take(2) {
            client
                .processor
                .process_state_chunk_response(&sender, response)
                .unwrap();
        }
        assert_eq!(client.processor.state_size(), 0);

        // The first range unblocks both buffered ones.
        let (sender, response) = reversed.next().unwrap();
        client
            .processor
            .process_state_chunk_response(&sender, response)
            .unwrap();
        assert!(client.processor.state_size() > 0);
        assert_eq!(client.processor.phase(), SnapshotPhase::Running);

        loop {
            let responses = answer(&client, &server);
            if responses.is_empty() {
                break;
            }
            for (sender, response) in responses {
                client
                    .processor
                    .process_state_chunk_response(&sender, response)
                    .unwrap();
            }
        }
        assert_eq!(client.processor.phase(), SnapshotPhase::Completed(root));
        assert_eq!(client.processor.state_size(), 30);
    }

    #[test]
    fn test_follow_up_request_continues_from_returned_offset() {
        let (server, _) = serving_node(30, SnapshotConfig::for_testing());
        let client = node(SnapshotConfig::for_testing());

        client
            .processor
            .start_syncing(&[peer(1)], target(None))
            .unwrap();
        let (sender, response) = answer(&client, &server).remove(0);
        let returned_to = response.to;
        client
            .processor
            .process_state_chunk_response(&sender, response)
            .unwrap();

        let sent = client.network.sent_to(&peer(1));
        assert!(matches!(
            sent.as_slice(),
            [Message::StateChunkRequest(StateChunkRequest { from, .. })] if *from == returned_to
        ));
    }

    #[test]
    fn test_largest_chunk_size_completes() {
        let config = SnapshotConfig {
            chunk_size: MAX_CHUNK_SIZE_KIB,
            ..SnapshotConfig::for_testing()
        };
        let server = node(config.clone());
        let values: Vec<Vec<u8>> = (0..700u32).map(|i| vec![(i % 251) as u8; 2000]).collect();
        let nodes = balanced_trie(&values);
        let root = recover_trie(&nodes, |_, _| {}).unwrap();
        server.trie_store.insert_trie(
            [0u8; 32],
            nodes
                .iter()
                .map(|node| TrieNode {
                    encoded: node.encode(),
                    has_long_value: node.has_long_value,
                    embeddable: node.embeddable,
                })
                .collect(),
        );
        let client = node(config);

        client
            .processor
            .start_syncing(&[peer(1)], target(Some(root)))
            .unwrap();
        pump(&client, &[(peer(1), &server)], peer(9));

        assert_eq!(client.processor.phase(), SnapshotPhase::Completed(root));
        assert_eq!(client.processor.state_size(), 700);
    }

    #[test]
    fn test_chunk_size_outside_served_range_is_rejected() {
        for chunk_size in [0, MAX_CHUNK_SIZE_KIB + 1] {
            let client = node(SnapshotConfig {
                chunk_size,
                ..SnapshotConfig::for_testing()
            });
            let result = client.processor.start_syncing(&[peer(1)], target(None));
            assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
            assert_eq!(client.processor.phase(), SnapshotPhase::Idle);
            assert!(client.network.sent().is_empty());
        }
    }

    #[test]
    fn test_range_other_than_requested_fails_round() {
        let (server, root) = serving_node(30, SnapshotConfig::for_testing());
        let client = node(SnapshotConfig {
            chunk_size: 4,
            ..SnapshotConfig::for_testing()
        });

        client
            .processor
            .start_syncing(&[peer(1), peer(2)], target(Some(root)))
            .unwrap();
        let Some((_, Message::StateChunkRequest(request))) = client.network.take_sent().pop()
        else {
            panic!("expected a state chunk request");
        };

        // The server answers a smaller range than the one asked for.
        server
            .processor
            .process_state_chunk_request(
                &peer(9),
                StateChunkRequest {
                    chunk_size: 1,
                    ..request
                },
            )
            .unwrap();
        let Some((_, Message::StateChunkResponse(response))) = server.network.take_sent().pop()
        else {
            panic!("expected a state chunk response");
        };
        assert_eq!(response.to, 1024);

        let result = client.processor.process_state_chunk_response(&peer(1), response);
        assert!(matches!(
            result,
            Err(SyncError::ChunkRangeMismatch {
                from: 0,
                expected: 4096,
                actual: 1024
            })
        ));
        assert_eq!(client.processor.failed_peers(), vec![peer(1)]);
        assert_eq!(client.processor.current_peer(), Some(peer(2)));
    }

    #[test]
    fn test_unsolicited_chunk_fails_round_without_buffering() {
        let client = node(SnapshotConfig::for_testing());
        client
            .processor
            .start_syncing(&[peer(1), peer(2)], target(None))
            .unwrap();
        client.network.take_sent();

        let unsolicited = StateChunkResponse {
            id: 1,
            chunk: encode_chunk(vec![vec![1u8; 10]], false),
            block_number: 0,
            from: 50 * 1024,
            to: 51 * 1024,
            complete: false,
        };
        let result = client
            .processor
            .process_state_chunk_response(&peer(1), unsolicited);

        assert!(matches!(result, Err(SyncError::UnexpectedStateChunk(51200))));
        assert!(client
            .scoring
            .events()
            .contains(&(peer(1), ScoringEvent::InvalidStateChunk)));
        assert_eq!(client.processor.state_size(), 0);
        // The only new request goes to the next candidate, from the start.
        assert!(client.network.sent_to(&peer(1)).is_empty());
        assert!(matches!(
            client.network.sent_to(&peer(2)).as_slice(),
            [Message::StateChunkRequest(StateChunkRequest { from: 0, .. })]
        ));
    }

    #[test]
    fn test_malformed_chunk_fails_over_to_next_peer() {
        let (server, root) = serving_node(20, SnapshotConfig::for_testing());
        let client = node(SnapshotConfig::for_testing());

        client
            .processor
            .start_syncing(&[peer(1), peer(2)], target(Some(root)))
            .unwrap();
        client.network.take_sent();

        // Claims an inflated size no LZ4 block of this length can reach.
        let mut stream = rlp::RlpStream::new_list(1);
        stream.begin_list(2);
        stream.append(&vec![1u8, 2, 3]);
        stream.append(&100_000u64);
        let bad = StateChunkResponse {
            id: 1,
            chunk: stream.out().to_vec(),
            block_number: 0,
            from: 0,
            to: 1024,
            complete: false,
        };
        assert!(client
            .processor
            .process_state_chunk_response(&peer(1), bad)
            .is_err());

        assert_eq!(client.processor.current_peer(), Some(peer(2)));
        assert_eq!(client.processor.failed_peers(), vec![peer(1)]);
        assert_eq!(client.processor.state_size(), 0);
        assert!(client
            .scoring
            .events()
            .contains(&(peer(1), ScoringEvent::InvalidStateChunk)));

        let sent = client.network.sent_to(&peer(2));
        assert!(matches!(
            sent.as_slice(),
            [Message::StateChunkRequest(StateChunkRequest { from: 0, .. })]
        ));

        pump(&client, &[(peer(2), &server)], peer(9));
        assert_eq!(client.processor.phase(), SnapshotPhase::Completed(root));
    }

    #[test]
    fn test_root_mismatch_fails_sync() {
        let (server, _) = serving_node(10, SnapshotConfig::for_testing());
        let client = node(SnapshotConfig::for_testing());

        client
            .processor
            .start_syncing(&[peer(1)], target(Some([7u8; 32])))
            .unwrap();
        pump(&client, &[(peer(1), &server)], peer(9));

        assert_eq!(client.processor.phase(), SnapshotPhase::Failed);
        assert!(client.trie_store.saved_nodes().len() >= 10);
    }

    #[test]
    fn test_no_peers_fails_immediately() {
        let client = node(SnapshotConfig::for_testing());
        let result = client.processor.start_syncing(&[], target(None));
        assert!(matches!(result, Err(SyncError::NoSnapshotPeers)));
        assert_eq!(client.processor.phase(), SnapshotPhase::Failed);
    }

    #[test]
    fn test_unexpected_responses_are_ignored() {
        let client = node(SnapshotConfig::for_testing());
        let response = StateChunkResponse {
            id: 1,
            chunk: encode_chunk(Vec::<Vec<u8>>::new(), true),
            block_number: 0,
            from: 0,
            to: 1024,
            complete: true,
        };

        // Not running.
        client
            .processor
            .process_state_chunk_response(&peer(1), response.clone())
            .unwrap();
        assert_eq!(client.processor.phase(), SnapshotPhase::Idle);

        client
            .processor
            .start_syncing(&[peer(1)], target(None))
            .unwrap();

        // Wrong peer.
        client
            .processor
            .process_state_chunk_response(&peer(2), response.clone())
            .unwrap();
        // Wrong block.
        client
            .processor
            .process_state_chunk_response(
                &peer(1),
                StateChunkResponse {
                    block_number: 5,
                    ..response
                },
            )
            .unwrap();

        assert_eq!(client.processor.phase(), SnapshotPhase::Running);
        assert!(client.scoring.events().is_empty());
    }

    #[test]
    fn test_resync_on_completion_starts_next_round() {
        let config = SnapshotConfig {
            resync_on_completion: true,
            ..SnapshotConfig::for_testing()
        };
        let (server, root) = serving_node(5, config.clone());
        let client = node(config);

        client
            .processor
            .start_syncing(&[peer(1)], target(Some(root)))
            .unwrap();
        let (sender, response) = answer(&client, &server).remove(0);
        assert!(response.complete);
        client
            .processor
            .process_state_chunk_response(&sender, response.clone())
            .unwrap();

        assert_eq!(client.processor.last_recovered_root(), Some(root));
        assert_eq!(client.processor.phase(), SnapshotPhase::Running);
        assert_eq!(client.processor.round(), 2);
        assert_eq!(client.network.sent_to(&peer(1)).len(), 1);

        // A late copy of the first round's answer is dropped.
        client
            .processor
            .process_state_chunk_response(&sender, response)
            .unwrap();
        assert_eq!(client.processor.state_size(), 0);
        assert!(client.scoring.events().is_empty());
    }

    #[test]
    fn test_request_for_unknown_block_is_rejected() {
        let (server, _) = serving_node(3, SnapshotConfig::for_testing());
        let request = StateChunkRequest {
            id: 1,
            block_number: 42,
            from: 0,
            chunk_size: 1,
        };
        let result = server.processor.process_state_chunk_request(&peer(9), request);
        assert!(matches!(result, Err(SyncError::UnknownBlock(42))));
        assert!(server.network.sent().is_empty());
    }
}
