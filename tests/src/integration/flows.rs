//! # Block Sync Integration Flows
//!
//! Nodes are assembled from the real handler, processors and snapshot
//! processor over the `test-utils` mock ports. Messages a node sends are
//! collected by its mock network and delivered to the addressed node's
//! admission pipeline by the test.
//!
//! ## Flows Tested:
//!
//! 1. **Orphan resolution**: blocks announced out of order end up connected
//! 2. **Block serving**: a lagging node pulls missing blocks from a peer
//! 3. **Snapshot sync**: a state trie streamed in chunks between two nodes
//! 4. **Async connection**: blocks connected on the background worker

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use qc_05_block_sync::events::{Message, Status};
    use qc_05_block_sync::ports::mocks::{
        make_chain, MockBlockchain, MockNetwork, MockScoring, MockStatusResolver, MockSyncEngine,
        MockTransactionGateway, MockTrieStore,
    };
    use qc_05_block_sync::ports::{Blockchain, TrieNode};
    use qc_05_block_sync::snapshot::{balanced_trie, recover_trie};
    use qc_05_block_sync::{
        AsyncBlockProcessor, BlockNodeInformation, BlockProcessedListener, BlockProcessor,
        BlockSyncService, HandlerPorts, MessageHandler, MessageHandlerApi, NodeBlockProcessor,
        ProcessResult, SnapshotPhase, SnapshotProcessor, SnapshotTarget, StagingStore,
        SyncConfig,
    };
    use shared_types::{Block, Hash, PeerId};
    use tokio::task::JoinHandle;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct TestNode {
        id: PeerId,
        chain: Arc<MockBlockchain>,
        network: Arc<MockNetwork>,
        store: Arc<StagingStore>,
        trie_store: Arc<MockTrieStore>,
        snapshot: Arc<SnapshotProcessor<MockBlockchain, MockTrieStore>>,
        handler: Arc<MessageHandler>,
        runner: JoinHandle<()>,
    }

    fn node_id(n: u8) -> PeerId {
        PeerId::new([n; 32])
    }

    fn test_config() -> SyncConfig {
        SyncConfig {
            message_queue_max_size: 100,
            ..SyncConfig::for_testing()
        }
    }

    /// Build a node over `chain` and start its consumer loop.
    fn spawn_node(id: PeerId, chain: MockBlockchain, peers: Vec<PeerId>) -> TestNode {
        let config = test_config();
        let chain = Arc::new(chain);
        let network = Arc::new(MockNetwork::with_peers(peers));
        let store = Arc::new(StagingStore::new());
        let processor = build_processor(&config, &chain, &store, &network);
        assemble(id, config, chain, network, store, processor)
    }

    fn assemble(
        id: PeerId,
        config: SyncConfig,
        chain: Arc<MockBlockchain>,
        network: Arc<MockNetwork>,
        store: Arc<StagingStore>,
        block_processor: Arc<dyn BlockProcessor>,
    ) -> TestNode {
        let scoring = Arc::new(MockScoring::default());
        let trie_store = Arc::new(MockTrieStore::default());
        let snapshot = Arc::new(SnapshotProcessor::new(
            config.snapshot.clone(),
            Arc::clone(&chain),
            Arc::clone(&trie_store),
            network.clone(),
            scoring.clone(),
        ));
        let status = Status::new(chain.best_block().number(), chain.best_block().hash());

        let ports = HandlerPorts {
            block_processor,
            snapshot: snapshot.clone(),
            sync_engine: Arc::new(MockSyncEngine::default()),
            network: network.clone(),
            scoring,
            status_resolver: Arc::new(MockStatusResolver { status }),
            transaction_gateway: Arc::new(MockTransactionGateway::default()),
        };
        let handler = Arc::new(MessageHandler::new(config, ports));
        let runner = {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.run().await })
        };

        TestNode {
            id,
            chain,
            network,
            store,
            trie_store,
            snapshot,
            handler,
            runner,
        }
    }

    fn build_processor(
        config: &SyncConfig,
        chain: &Arc<MockBlockchain>,
        store: &Arc<StagingStore>,
        network: &Arc<MockNetwork>,
    ) -> Arc<NodeBlockProcessor<MockBlockchain>> {
        let node_information = Arc::new(BlockNodeInformation::new(
            config.max_tracked_nodes,
            config.max_tracked_blocks,
        ));
        let service = Arc::new(BlockSyncService::new(
            config.clone(),
            Arc::clone(chain),
            Arc::clone(store),
            Arc::clone(&node_information),
            network.clone(),
        ));
        Arc::new(NodeBlockProcessor::new(
            config.clone(),
            Arc::clone(chain),
            service,
            node_information,
            network.clone(),
        ))
    }

    /// Deliver everything `from` sent to `to`. Returns the count delivered.
    fn deliver(from: &TestNode, to: &TestNode) -> usize {
        let mut delivered = 0;
        for (target, message) in from.network.take_sent() {
            if target == to.id && to.handler.post_message(from.id, message).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    async fn shutdown(node: TestNode) {
        node.handler.stop();
        let stopped = tokio::time::timeout(Duration::from_secs(2), node.runner).await;
        assert!(stopped.is_ok(), "consumer loop did not stop");
    }

    fn best_hash(node: &TestNode) -> Hash {
        node.chain.best_block().hash()
    }

    // =============================================================================
    // INTEGRATION TESTS: ORPHAN RESOLUTION
    // =============================================================================

    /// Blocks arriving newest-first are staged and connected once the
    /// first missing ancestor shows up.
    #[tokio::test]
    async fn test_out_of_order_blocks_connect_in_one_cascade() {
        let source = MockBlockchain::with_canonical_chain(10);
        let blocks: Vec<Arc<Block>> = (1..=10)
            .filter_map(|n| source.block_by_number(n))
            .collect();

        let node = spawn_node(node_id(2), MockBlockchain::with_genesis(), vec![]);
        for block in blocks.iter().rev() {
            node.handler
                .post_message(node_id(1), Message::Block(Arc::clone(block)))
                .unwrap();
        }

        let tip = blocks[9].hash();
        assert!(wait_until(|| best_hash(&node) == tip && node.store.size() == 0).await);
        assert_eq!(node.chain.best_block().number(), 10);
        shutdown(node).await;
    }

    // =============================================================================
    // INTEGRATION TESTS: BLOCK SERVING
    // =============================================================================

    /// A lagging node announces its status; the ahead node pushes the blocks
    /// it is missing.
    #[tokio::test]
    async fn test_status_exchange_brings_lagging_node_up_to_date() {
        let ahead = spawn_node(
            node_id(1),
            MockBlockchain::with_canonical_chain(4),
            vec![node_id(2)],
        );
        let behind = spawn_node(
            node_id(2),
            MockBlockchain::with_genesis(),
            vec![node_id(1)],
        );

        let status = Status::new(0, best_hash(&behind));
        ahead
            .handler
            .post_message(behind.id, Message::Status(status))
            .unwrap();

        let target = best_hash(&ahead);
        let synced = wait_until(|| {
            deliver(&ahead, &behind);
            deliver(&behind, &ahead);
            best_hash(&behind) == target
        })
        .await;
        assert!(synced);

        shutdown(ahead).await;
        shutdown(behind).await;
    }

    /// A node learning about a block by announcement fetches it with GetBlock.
    #[tokio::test]
    async fn test_announced_block_is_fetched() {
        let ahead = spawn_node(
            node_id(1),
            MockBlockchain::with_canonical_chain(1),
            vec![node_id(2)],
        );
        let behind = spawn_node(
            node_id(2),
            MockBlockchain::with_genesis(),
            vec![node_id(1)],
        );

        let head = ahead.chain.best_block().identifier();
        behind
            .handler
            .post_message(ahead.id, Message::NewBlockHashes(vec![head]))
            .unwrap();

        let fetched = wait_until(|| {
            deliver(&behind, &ahead);
            deliver(&ahead, &behind);
            best_hash(&behind) == head.hash
        })
        .await;
        assert!(fetched);

        shutdown(ahead).await;
        shutdown(behind).await;
    }

    // =============================================================================
    // INTEGRATION TESTS: SNAPSHOT SYNC
    // =============================================================================

    #[tokio::test]
    async fn test_snapshot_sync_between_nodes() {
        let server = spawn_node(
            node_id(1),
            MockBlockchain::with_genesis(),
            vec![node_id(2)],
        );
        let client = spawn_node(
            node_id(2),
            MockBlockchain::with_genesis(),
            vec![node_id(1)],
        );

        let values: Vec<Vec<u8>> = (0..60u8).map(|i| vec![i; 80]).collect();
        let nodes = balanced_trie(&values);
        let root = recover_trie(&nodes, |_, _| {}).unwrap();
        let state_root = server.chain.best_block().header().state_root;
        server.trie_store.insert_trie(
            state_root,
            nodes
                .iter()
                .map(|node| TrieNode {
                    encoded: node.encode(),
                    has_long_value: node.has_long_value,
                    embeddable: node.embeddable,
                })
                .collect(),
        );

        client
            .snapshot
            .start_syncing(
                &[server.id],
                SnapshotTarget {
                    block_number: 0,
                    state_root: Some(root),
                },
            )
            .unwrap();

        let completed = wait_until(|| {
            deliver(&client, &server);
            deliver(&server, &client);
            client.snapshot.phase() == SnapshotPhase::Completed(root)
        })
        .await;
        assert!(completed);
        assert_eq!(client.snapshot.state_size(), 60);
        assert_eq!(client.trie_store.saved_nodes().len(), 60);

        shutdown(server).await;
        shutdown(client).await;
    }

    // =============================================================================
    // INTEGRATION TESTS: ASYNC BLOCK PROCESSING
    // =============================================================================

    #[tokio::test]
    async fn test_async_processor_behind_handler() {
        let config = test_config();
        let chain = Arc::new(MockBlockchain::with_genesis());
        let network = Arc::new(MockNetwork::default());
        let store = Arc::new(StagingStore::new());
        let inner = build_processor(&config, &chain, &store, &network);

        let notified: Arc<Mutex<Vec<Hash>>> = Arc::new(Mutex::new(Vec::new()));
        let listener: BlockProcessedListener = {
            let notified = Arc::clone(&notified);
            Arc::new(
                move |_sender: Option<PeerId>, block: &Arc<Block>, _result: &ProcessResult| {
                    notified.lock().push(block.hash());
                },
            )
        };
        let async_processor = Arc::new(AsyncBlockProcessor::start(inner, Some(listener)));

        let blocks = make_chain(&chain.genesis(), 3, 0);
        let node = assemble(
            node_id(2),
            config,
            Arc::clone(&chain),
            network,
            store,
            async_processor.clone(),
        );
        for block in &blocks {
            node.handler
                .post_message(node_id(1), Message::Block(Arc::clone(block)))
                .unwrap();
        }

        // Later blocks may be connected inline when their parent is still
        // pending on the worker; the first one is always scheduled.
        assert!(wait_until(|| best_hash(&node) == blocks[2].hash()).await);
        assert!(wait_until(|| notified.lock().contains(&blocks[0].hash())).await);

        async_processor.stop_and_wait().await.unwrap();
        shutdown(node).await;
    }
}
