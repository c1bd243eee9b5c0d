//! # QC-05 Block Sync Benchmarks
//!
//! Hot paths under load:
//! - Admission: score, invariants and enqueue per inbound message
//! - Scheduling: score-ordered push/pop
//! - Orphan resolution: one cascade connecting a long staged chain
//! - Snapshot: chunk codec with and without LZ4, trie recovery

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use qc_05_block_sync::domain::{
    AcceptancePolicy, BlockNodeInformation, MessageTask, ScoredQueue, StagingStore, TaskQueue,
};
use qc_05_block_sync::events::Message;
use qc_05_block_sync::ports::mocks::{
    make_chain, MockBlockchain, MockNetwork, MockScoring, MockStatusResolver, MockSyncEngine,
    MockTransactionGateway, MockTrieStore,
};
use qc_05_block_sync::ports::Blockchain;
use qc_05_block_sync::snapshot::{
    balanced_trie, decode_chunk, encode_chunk, recover_trie, SnapshotProcessor,
};
use qc_05_block_sync::{
    BlockSyncService, HandlerPorts, MessageHandler, MessageHandlerApi, NodeBlockProcessor,
    SchedulingMode, SyncConfig,
};
use rand::Rng;
use shared_types::{BlockIdentifier, PeerId};

fn random_peer(rng: &mut impl Rng) -> PeerId {
    let mut id = [0u8; 32];
    rng.fill(&mut id);
    PeerId::new(id)
}

fn handler(config: SyncConfig) -> MessageHandler {
    let chain = Arc::new(MockBlockchain::with_genesis());
    let network = Arc::new(MockNetwork::default());
    let scoring = Arc::new(MockScoring::default());
    let node_information = Arc::new(BlockNodeInformation::new(100, 1000));
    let service = Arc::new(BlockSyncService::new(
        config.clone(),
        Arc::clone(&chain),
        Arc::new(StagingStore::new()),
        Arc::clone(&node_information),
        network.clone(),
    ));
    let processor = Arc::new(NodeBlockProcessor::new(
        config.clone(),
        Arc::clone(&chain),
        service,
        node_information,
        network.clone(),
    ));
    let snapshot = Arc::new(SnapshotProcessor::new(
        config.snapshot.clone(),
        Arc::clone(&chain),
        Arc::new(MockTrieStore::default()),
        network.clone(),
        scoring.clone(),
    ));
    let status = qc_05_block_sync::events::Status::new(0, chain.best_block().hash());

    MessageHandler::new(
        config,
        HandlerPorts {
            block_processor: processor,
            snapshot,
            sync_engine: Arc::new(MockSyncEngine::default()),
            network,
            scoring,
            status_resolver: Arc::new(MockStatusResolver { status }),
            transaction_gateway: Arc::new(MockTransactionGateway::default()),
        },
    )
}

/// Admission of block announcements from a fixed peer set. The per-peer
/// announcement lane keeps the queue bounded by evicting.
pub fn brutal_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-05-admission");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));

    let handler = handler(SyncConfig {
        scheduling: SchedulingMode::ByPriorityClass,
        ..SyncConfig::default()
    });
    let mut rng = rand::thread_rng();
    let peers: Vec<PeerId> = (0..64).map(|_| random_peer(&mut rng)).collect();

    group.bench_function("post_message", |b| {
        b.iter(|| {
            let peer = peers[rng.gen_range(0..peers.len())];
            let message = Message::NewBlockHashes(vec![BlockIdentifier {
                hash: rng.gen(),
                number: rng.gen_range(0..1_000_000),
            }]);
            black_box(handler.post_message(peer, message).is_ok())
        })
    });

    group.finish();
}

pub fn brutal_scored_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-05-scored-queue");
    let mut rng = rand::thread_rng();

    for size in [100usize, 1_000, 10_000] {
        let tasks: Vec<MessageTask> = (0..size)
            .map(|_| {
                MessageTask::new(
                    random_peer(&mut rng),
                    Message::GetBlock { hash: rng.gen() },
                    rng.gen_range(0.0..100.0),
                )
            })
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("push_pop", size), &tasks, |b, tasks| {
            b.iter(|| {
                let mut queue = ScoredQueue::new(AcceptancePolicy::AcceptAll);
                for task in tasks {
                    queue.push(task.clone());
                }
                while let Some(task) = queue.pop() {
                    black_box(task);
                }
            })
        });
    }

    group.finish();
}

/// Staged chain delivered newest-first, connected by the final block.
pub fn brutal_orphan_cascade(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-05-orphan-cascade");
    group.sample_size(20);

    for length in [50usize, 200] {
        let config = SyncConfig {
            chunk_size: 192,
            max_skeleton_chunks: 20,
            ..SyncConfig::for_testing()
        };
        group.throughput(Throughput::Elements(length as u64));
        group.bench_with_input(BenchmarkId::new("reverse_chain", length), &length, |b, &length| {
            b.iter(|| {
                let chain = Arc::new(MockBlockchain::with_genesis());
                let service = BlockSyncService::new(
                    config.clone(),
                    Arc::clone(&chain),
                    Arc::new(StagingStore::new()),
                    Arc::new(BlockNodeInformation::new(10, 1000)),
                    Arc::new(MockNetwork::default()),
                );
                let blocks = make_chain(&chain.genesis(), length, 0);
                for block in blocks.iter().rev() {
                    black_box(service.process_block(None, block, true));
                }
                assert_eq!(chain.best_block().number(), length as u64);
            })
        });
    }

    group.finish();
}

pub fn brutal_chunk_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-05-chunk-codec");
    let mut rng = rand::thread_rng();

    // Repetitive entries compress, random ones do not.
    let repetitive: Vec<Vec<u8>> = (0..500u32).map(|i| vec![(i % 7) as u8; 120]).collect();
    let random: Vec<Vec<u8>> = (0..500)
        .map(|_| (0..120).map(|_| rng.gen()).collect())
        .collect();

    for (name, entries) in [("repetitive", &repetitive), ("random", &random)] {
        for compress in [false, true] {
            let id = format!("{name}/lz4={compress}");
            group.bench_with_input(BenchmarkId::new("encode", &id), entries, |b, entries| {
                b.iter(|| black_box(encode_chunk(entries.iter().cloned(), compress)))
            });

            let encoded = encode_chunk(entries.iter().cloned(), compress);
            group.bench_with_input(BenchmarkId::new("decode", &id), &encoded, |b, encoded| {
                b.iter(|| black_box(decode_chunk(encoded).map(|e| e.len())))
            });
        }
    }

    group.finish();
}

pub fn brutal_trie_recovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-05-trie-recovery");

    for size in [1_000usize, 10_000] {
        let values: Vec<Vec<u8>> = (0..size).map(|i| (i as u64).to_be_bytes().to_vec()).collect();
        let nodes = balanced_trie(&values);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("in_order", size), &nodes, |b, nodes| {
            b.iter(|| black_box(recover_trie(nodes, |_, _| {})))
        });
    }

    group.finish();
}

pub fn register_benchmarks(c: &mut Criterion) {
    brutal_admission(c);
    brutal_scored_queue(c);
    brutal_orphan_cascade(c);
    brutal_chunk_codec(c);
    brutal_trie_recovery(c);
}
