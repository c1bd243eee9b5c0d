//! # Message Handler
//!
//! Admission pipeline and consumer loop for inbound peer messages.
//!
//! Producers call [`MessageHandlerApi::post_message`] from any context; it
//! only scores, checks the admission invariants and enqueues. A single
//! consumer ([`MessageHandler::run`]) pops tasks, dispatches them by message
//! type and performs the periodic tick and status broadcast.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use shared_types::{Block, Hash, PeerId, Transaction};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, trace, warn};

use crate::config::SyncConfig;
use crate::domain::{
    build_task_queue, check_admission, AdmissionRejection, MessageCounter, MessageTask,
    ReceivedMessageCache, ScoringEvent, TaskQueue, TransactionNodeInformation,
};
use crate::events::{Message, MessageType, SyncError};
use crate::ports::{
    BlockProcessor, MessageHandlerApi, PeerNetwork, PeerScoring, SnapshotApi, StatusResolver,
    SyncEngine, TransactionGateway,
};

/// Collaborators the handler dispatches to.
#[derive(Clone)]
pub struct HandlerPorts {
    pub block_processor: Arc<dyn BlockProcessor>,
    pub snapshot: Arc<dyn SnapshotApi>,
    pub sync_engine: Arc<dyn SyncEngine>,
    pub network: Arc<dyn PeerNetwork>,
    pub scoring: Arc<dyn PeerScoring>,
    pub status_resolver: Arc<dyn StatusResolver>,
    pub transaction_gateway: Arc<dyn TransactionGateway>,
}

struct Timers {
    last_tick: Instant,
    last_status: Instant,
    last_queued_warn: Option<Instant>,
}

pub struct MessageHandler {
    config: SyncConfig,
    ports: HandlerPorts,
    queue: Mutex<Box<dyn TaskQueue>>,
    task_available: Notify,
    message_counter: MessageCounter,
    received_messages: ReceivedMessageCache,
    transaction_information: TransactionNodeInformation,
    timers: Mutex<Timers>,
    shutdown: watch::Sender<bool>,
}

impl MessageHandler {
    pub fn new(config: SyncConfig, ports: HandlerPorts) -> Self {
        let now = Instant::now();
        let queue = build_task_queue(&config);
        let received_messages = ReceivedMessageCache::new(
            config.max_messages_cached,
            config.received_messages_cache_duration(),
        );
        let transaction_information =
            TransactionNodeInformation::new(config.max_tracked_transactions);
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            ports,
            queue: Mutex::new(queue),
            task_available: Notify::new(),
            message_counter: MessageCounter::new(),
            received_messages,
            transaction_information,
            timers: Mutex::new(Timers {
                last_tick: now,
                last_status: now,
                last_queued_warn: None,
            }),
            shutdown,
        }
    }

    /// Consumer loop. Returns once [`stop`](Self::stop) is called.
    pub async fn run(&self) {
        info!("[qc-05] Message handler started");
        let mut shutdown = self.shutdown.subscribe();

        while !*shutdown.borrow_and_update() {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                task = self.next_task() => {
                    if let Some(task) = task {
                        self.process_task(task);
                    }
                    self.update_timed_events(Instant::now());
                }
            }
        }

        info!("[qc-05] Message handler stopped");
    }

    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn queue_size(&self) -> usize {
        self.queue.lock().size()
    }

    /// In-flight messages admitted from `peer`.
    pub fn message_count(&self, peer: &PeerId) -> usize {
        self.message_counter.get(peer)
    }

    pub fn transaction_information(&self) -> &TransactionNodeInformation {
        &self.transaction_information
    }

    /// Send each active peer the transactions it is not known to have.
    pub fn relay_transactions(&self, transactions: &[Transaction]) {
        let hashed: Vec<(Hash, &Transaction)> = transactions
            .iter()
            .map(|tx| (tx.hash(), tx))
            .collect();

        for peer in self.ports.network.active_peers() {
            let unknown: Vec<Transaction> = hashed
                .iter()
                .filter(|(hash, _)| {
                    !self
                        .transaction_information
                        .get_nodes_by_transaction(hash)
                        .contains(&peer)
                })
                .map(|(hash, tx)| {
                    self.transaction_information
                        .add_transaction_to_node(*hash, peer);
                    (*tx).clone()
                })
                .collect();
            if unknown.is_empty() {
                continue;
            }
            if let Err(e) = self
                .ports
                .network
                .send_message(&peer, Message::Transactions(unknown))
            {
                debug!("[qc-05] Failed to relay transactions to {}: {}", peer, e);
            }
        }
    }

    /// Pop the next task, waiting at most the poll timeout.
    async fn next_task(&self) -> Option<MessageTask> {
        let deadline = tokio::time::Instant::now() + self.config.queue_poll_timeout();
        loop {
            let notified = self.task_available.notified();
            let popped = self.queue.lock().pop();
            if popped.is_some() {
                return popped;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    fn process_task(&self, task: MessageTask) {
        let MessageTask {
            sender,
            message,
            enqueued_at,
            ..
        } = task;
        let message_type = message.message_type();
        let start = Instant::now();
        self.report_queued_time(message_type, start.saturating_duration_since(enqueued_at), start);

        if let Err(e) = self.dispatch(&sender, message) {
            error!(
                "[qc-05] Failed to process {:?} from {}: {}",
                message_type, sender, e
            );
        }
        self.message_counter.decrement(&sender);

        let processing = start.elapsed();
        if processing > Duration::from_secs(self.config.processing_time_warn_secs) {
            warn!(
                "[qc-05] Processing {:?} from {} took {}ms",
                message_type,
                sender,
                processing.as_millis()
            );
        }
    }

    fn report_queued_time(
        &self,
        message_type: MessageType,
        queued: Duration,
        now: Instant,
    ) {
        if queued <= Duration::from_secs(self.config.queued_time_warn_secs) {
            return;
        }
        let period = Duration::from_secs(self.config.queued_time_warn_period_secs);
        let mut timers = self.timers.lock();
        let due = timers
            .last_queued_warn
            .map_or(true, |last| now.saturating_duration_since(last) >= period);
        if due {
            timers.last_queued_warn = Some(now);
            warn!(
                "[qc-05] {:?} waited {}ms in queue ({} queued)",
                message_type,
                queued.as_millis(),
                self.queue.lock().size()
            );
        }
    }

    fn dispatch(&self, sender: &PeerId, message: Message) -> Result<(), SyncError> {
        let processor = &self.ports.block_processor;
        match message {
            Message::Status(status) => {
                self.ports.sync_engine.process_status(sender, &status);
                processor.process_status(sender, &status);
            }
            Message::Block(block) => self.process_block_message(sender, block),
            Message::GetBlock { hash } => processor.process_get_block(sender, &hash),
            Message::BlockHeaders(headers) => processor.process_block_headers(sender, headers),
            Message::NewBlockHashes(identifiers) => {
                processor.process_new_block_hashes(sender, &identifiers)
            }
            Message::Transactions(transactions) => {
                self.process_transactions(sender, transactions)
            }
            Message::BlockHashRequest { id, height } => {
                processor.process_block_hash_request(sender, id, height)
            }
            Message::BlockHeadersRequest { id, hash, count } => {
                processor.process_block_headers_request(sender, id, &hash, count)
            }
            Message::BlockRequest { id, hash } => {
                processor.process_block_request(sender, id, &hash)
            }
            Message::BodyRequest { id, hash } => processor.process_body_request(sender, id, &hash),
            Message::SkeletonRequest { id, start_number } => {
                processor.process_skeleton_request(sender, id, start_number)
            }
            Message::StateChunkRequest(request) => {
                return self.ports.snapshot.process_state_chunk_request(sender, request)
            }
            Message::StateChunkResponse(response) => {
                return self
                    .ports
                    .snapshot
                    .process_state_chunk_response(sender, response)
            }
            response @ (Message::BlockHashResponse { .. }
            | Message::BlockHeadersResponse { .. }
            | Message::BlockResponse { .. }
            | Message::BodyResponse { .. }
            | Message::SkeletonResponse { .. }) => {
                self.ports.sync_engine.process_response(sender, response)
            }
        }
        Ok(())
    }

    fn process_block_message(&self, sender: &PeerId, block: Arc<Block>) {
        let processor = &self.ports.block_processor;
        let hash = block.hash();
        processor.node_information().add_block_to_node(hash, *sender);

        let result = processor.process_block(Some(sender), Arc::clone(&block));
        if result.is_invalid_block() {
            debug!(
                "[qc-05] Invalid block {} #{} from {}",
                block.short_hash(),
                block.number(),
                sender
            );
            self.ports
                .scoring
                .record_event(sender, ScoringEvent::InvalidBlock);
            return;
        }

        if result.was_block_added(&hash) {
            self.ports
                .scoring
                .record_event(sender, ScoringEvent::ValidBlock);
        }

        if result.is_best() && !processor.has_better_block_to_sync() {
            self.relay_block(sender, &block);
        }
    }

    /// Announce a new best block to active peers not known to have it.
    fn relay_block(&self, sender: &PeerId, block: &Block) {
        let known = self
            .ports
            .block_processor
            .node_information()
            .get_nodes_by_block(&block.hash());
        let targets: Vec<PeerId> = self
            .ports
            .network
            .active_peers()
            .into_iter()
            .filter(|peer| peer != sender && !known.contains(peer))
            .collect();
        if targets.is_empty() {
            return;
        }

        trace!(
            "[qc-05] Relaying block {} #{} to {} peers",
            block.short_hash(),
            block.number(),
            targets.len()
        );
        let announcement = Message::NewBlockHashes(vec![block.identifier()]);
        for result in self.ports.network.broadcast(&targets, announcement) {
            if let Err(e) = result {
                debug!("[qc-05] Failed to relay block announcement: {}", e);
            }
        }
    }

    fn process_transactions(&self, sender: &PeerId, transactions: Vec<Transaction>) {
        for tx in &transactions {
            self.transaction_information
                .add_transaction_to_node(tx.hash(), *sender);
        }
        self.ports
            .transaction_gateway
            .receive_transactions(sender, transactions);
    }

    /// Idle tick to the sync engine and periodic status broadcast.
    fn update_timed_events(&self, now: Instant) {
        let (elapsed, send_status) = {
            let mut timers = self.timers.lock();
            let elapsed = now.saturating_duration_since(timers.last_tick);
            timers.last_tick = now;
            let send_status =
                now.saturating_duration_since(timers.last_status) > self.config.status_interval();
            if send_status {
                timers.last_status = now;
            }
            (elapsed, send_status)
        };

        let idle = self.queue.lock().is_empty();
        if idle {
            self.ports.sync_engine.on_time_passed(elapsed);
        }
        if send_status {
            self.broadcast_status();
        }
    }

    fn broadcast_status(&self) {
        let status = self.ports.status_resolver.current_status();
        let peers = self.ports.network.active_peers();
        debug!(
            "[qc-05] Sending status #{} to {} peers",
            status.best_block_number,
            peers.len()
        );
        for result in self.ports.network.broadcast(&peers, Message::Status(status)) {
            if let Err(e) = result {
                debug!("[qc-05] Failed to send status: {}", e);
            }
        }
    }
}

impl MessageHandlerApi for MessageHandler {
    fn post_message(&self, sender: PeerId, message: Message) -> Result<(), AdmissionRejection> {
        self.received_messages.clean_expired(Instant::now());

        let message_type = message.message_type();
        let score = self.ports.scoring.score(&sender, now_ms(), message_type);

        if let Err(rejection) = check_admission(
            score,
            &sender,
            &message,
            &self.message_counter,
            self.config.message_queue_max_size,
            &self.config.banned_miners,
            &self.received_messages,
        ) {
            if rejection == AdmissionRejection::RepeatedMessage {
                debug!("[qc-05] Repeated {:?} from {}", message_type, sender);
                self.ports
                    .scoring
                    .record_event(&sender, ScoringEvent::RepeatedMessage);
            } else {
                trace!(
                    "[qc-05] Rejected {:?} from {}: {:?}",
                    message_type,
                    sender,
                    rejection
                );
            }
            return Err(rejection);
        }

        self.message_counter.increment(&sender);
        let evicted = self
            .queue
            .lock()
            .push(MessageTask::new(sender, message, score));
        if let Some(evicted) = evicted {
            debug!(
                "[qc-05] Dropped queued {:?} from {}",
                evicted.message_type(),
                evicted.sender
            );
            self.message_counter.decrement(&evicted.sender);
        }
        self.task_available.notify_one();
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
