//! # Async Block Processor
//!
//! Blocks whose only unconnected ancestor is themselves are connected on a
//! dedicated worker task; the caller gets a scheduled result immediately and
//! the outcome is reported to a listener. Longer staged ancestries are
//! connected inline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use shared_types::{Block, BlockHeader, BlockIdentifier, Hash, PeerId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{BlockNodeInformation, ProcessResult};
use crate::events::{Status, SyncError};
use crate::ports::inbound::BlockProcessor;
use crate::ports::outbound::Blockchain;
use crate::processor::NodeBlockProcessor;

/// Called on the worker with the outcome of each scheduled block.
pub type BlockProcessedListener =
    Arc<dyn Fn(Option<PeerId>, &Arc<Block>, &ProcessResult) + Send + Sync>;

struct BlockJob {
    sender: Option<PeerId>,
    block: Arc<Block>,
    ancestry: Vec<Arc<Block>>,
    received_at: Instant,
}

/// [`NodeBlockProcessor`] with block connection moved onto a worker task.
pub struct AsyncBlockProcessor<B: Blockchain + 'static> {
    inner: Arc<NodeBlockProcessor<B>>,
    jobs: Mutex<Option<mpsc::UnboundedSender<BlockJob>>>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    join_timeout: Duration,
}

impl<B: Blockchain + 'static> AsyncBlockProcessor<B> {
    /// Spawns the worker; must be called within a tokio runtime.
    pub fn start(inner: Arc<NodeBlockProcessor<B>>, listener: Option<BlockProcessedListener>) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join_timeout = inner.config().async_join_timeout();

        let worker = tokio::spawn(run_worker(
            Arc::clone(&inner),
            jobs_rx,
            shutdown_rx,
            listener,
        ));

        Self {
            inner,
            jobs: Mutex::new(Some(jobs_tx)),
            shutdown: shutdown_tx,
            worker: Mutex::new(Some(worker)),
            join_timeout,
        }
    }

    pub fn is_running(&self) -> bool {
        self.jobs.lock().is_some()
    }

    /// Stop accepting blocks and signal the worker to exit.
    pub fn stop(&self) {
        if self.jobs.lock().take().is_some() {
            info!("[qc-05] Stopping async block worker");
        }
        let _ = self.shutdown.send(true);
    }

    /// Stop, then wait for the worker within the configured timeout.
    ///
    /// A cancelled or panicked worker counts as stopped.
    pub async fn stop_and_wait(&self) -> Result<(), SyncError> {
        self.stop();
        let handle = self.worker.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };

        match tokio::time::timeout(self.join_timeout, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                if e.is_panic() {
                    error!("[qc-05] Async block worker panicked: {}", e);
                } else {
                    debug!("[qc-05] Async block worker cancelled");
                }
                Ok(())
            }
            Err(_) => {
                warn!(
                    "[qc-05] Async block worker did not stop within {:?}",
                    self.join_timeout
                );
                Err(SyncError::ShutdownTimeout(self.join_timeout))
            }
        }
    }

    fn connect_inline(
        &self,
        sender: Option<&PeerId>,
        block: &Arc<Block>,
        ancestry: Vec<Arc<Block>>,
        start: Instant,
    ) -> ProcessResult {
        let results = self
            .inner
            .sync_service()
            .connect_blocks_and_descendants(sender, ancestry, false);
        let result = ProcessResult::connected(block.hash(), results, start.elapsed());
        result.log_if_slow(self.inner.config().slow_block_threshold());
        self.inner.remember_connected(block, &result);
        result
    }
}

async fn run_worker<B: Blockchain + 'static>(
    processor: Arc<NodeBlockProcessor<B>>,
    mut jobs: mpsc::UnboundedReceiver<BlockJob>,
    mut shutdown: watch::Receiver<bool>,
    listener: Option<BlockProcessedListener>,
) {
    info!("[qc-05] Async block worker started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            job = jobs.recv() => {
                let Some(job) = job else { break };
                let results = processor.sync_service().connect_blocks_and_descendants(
                    job.sender.as_ref(),
                    job.ancestry,
                    false,
                );
                let result =
                    ProcessResult::connected(job.block.hash(), results, job.received_at.elapsed());
                result.log_if_slow(processor.config().slow_block_threshold());
                processor.remember_connected(&job.block, &result);

                if let Some(listener) = &listener {
                    listener(job.sender, &job.block, &result);
                }
            }
        }
    }
    info!("[qc-05] Async block worker stopped");
}

impl<B: Blockchain + 'static> BlockProcessor for AsyncBlockProcessor<B> {
    fn process_block(&self, sender: Option<&PeerId>, block: Arc<Block>) -> ProcessResult {
        let start = Instant::now();
        if !self.is_running() {
            debug!(
                "[qc-05] Async block worker stopped, block {} not scheduled",
                block.short_hash()
            );
            return ProcessResult::not_scheduled(block.hash(), start.elapsed());
        }
        if !self.inner.is_header_valid(block.header()) {
            warn!(
                "[qc-05] Invalid header for block {} #{}",
                block.short_hash(),
                block.number()
            );
            return ProcessResult::invalid(block.hash(), start.elapsed());
        }

        self.inner.raise_last_known(block.number());
        let Some(ancestry) = self
            .inner
            .sync_service()
            .preprocess_block(sender, &block, false)
        else {
            return ProcessResult::not_scheduled(block.hash(), start.elapsed());
        };

        if ancestry.len() != 1 {
            return self.connect_inline(sender, &block, ancestry, start);
        }

        let job = BlockJob {
            sender: sender.copied(),
            block: Arc::clone(&block),
            ancestry,
            received_at: start,
        };
        let rejected = match self.jobs.lock().as_ref() {
            Some(jobs) => jobs.send(job).err().map(|e| e.0),
            None => Some(job),
        };
        match rejected {
            // Stopped between the check and the hand-off
            Some(job) => self.connect_inline(sender, &block, job.ancestry, start),
            None => ProcessResult::scheduled(block.hash(), start.elapsed()),
        }
    }

    fn process_status(&self, sender: &PeerId, status: &Status) {
        self.inner.process_status(sender, status)
    }

    fn process_new_block_hashes(&self, sender: &PeerId, identifiers: &[BlockIdentifier]) {
        self.inner.process_new_block_hashes(sender, identifiers)
    }

    fn process_block_headers(&self, sender: &PeerId, headers: Vec<BlockHeader>) {
        self.inner.process_block_headers(sender, headers)
    }

    fn process_get_block(&self, sender: &PeerId, hash: &Hash) {
        self.inner.process_get_block(sender, hash)
    }

    fn process_block_request(&self, sender: &PeerId, id: u64, hash: &Hash) {
        self.inner.process_block_request(sender, id, hash)
    }

    fn process_block_headers_request(&self, sender: &PeerId, id: u64, hash: &Hash, count: u32) {
        self.inner
            .process_block_headers_request(sender, id, hash, count)
    }

    fn process_body_request(&self, sender: &PeerId, id: u64, hash: &Hash) {
        self.inner.process_body_request(sender, id, hash)
    }

    fn process_block_hash_request(&self, sender: &PeerId, id: u64, height: u64) {
        self.inner.process_block_hash_request(sender, id, height)
    }

    fn process_skeleton_request(&self, sender: &PeerId, id: u64, start_number: u64) {
        self.inner.process_skeleton_request(sender, id, start_number)
    }

    fn has_block(&self, hash: &Hash) -> bool {
        self.inner.has_block(hash)
    }

    fn has_better_block_to_sync(&self) -> bool {
        self.inner.has_better_block_to_sync()
    }

    fn last_known_block_number(&self) -> u64 {
        self.inner.last_known_block_number()
    }

    fn node_information(&self) -> Arc<BlockNodeInformation> {
        self.inner.node_information()
    }
}
