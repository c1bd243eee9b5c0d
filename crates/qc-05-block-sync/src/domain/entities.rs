//! # Core Domain Entities
//!
//! - [`MessageTask`]: an admitted message waiting for the consumer loop
//! - [`ImportResult`]: outcome of one connect attempt against the chain
//! - [`ProcessResult`]: outcome of processing one inbound block
//! - [`ScoringEvent`]: peer behaviour reported to the scoring collaborator

use std::collections::HashMap;
use std::time::{Duration, Instant};

use shared_types::{short_hex, Hash, PeerId};
use tracing::warn;

use crate::events::{Message, MessageType};

/// An admitted message, consumed exactly once by the processing loop.
#[derive(Clone, Debug)]
pub struct MessageTask {
    pub sender: PeerId,
    pub message: Message,
    /// Admission score; higher is processed first.
    pub score: f64,
    pub enqueued_at: Instant,
}

impl MessageTask {
    pub fn new(sender: PeerId, message: Message, score: f64) -> Self {
        Self {
            sender,
            message,
            score,
            enqueued_at: Instant::now(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }
}

/// Outcome of `try_to_connect` on the chain connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImportResult {
    ImportedBest,
    ImportedNotBest,
    Exist,
    NoParent,
    Invalid,
}

impl ImportResult {
    pub fn is_imported(self) -> bool {
        matches!(self, ImportResult::ImportedBest | ImportResult::ImportedNotBest)
    }
}

/// Peer behaviour reported to the scoring collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScoringEvent {
    /// Same block or transaction batch received twice within the dedup window.
    RepeatedMessage,
    ValidBlock,
    InvalidBlock,
    /// Snapshot chunk that failed to decode or verify.
    InvalidStateChunk,
}

/// Result of processing one inbound block.
///
/// `additional_validations_ok == false` means the block was not scheduled
/// for connection at all. A scheduled result with no connect map is pending
/// on the async worker.
#[derive(Clone, Debug)]
pub struct ProcessResult {
    additional_validations_ok: bool,
    connect_result: Option<HashMap<Hash, ImportResult>>,
    block_hash: Hash,
    duration: Duration,
}

impl ProcessResult {
    pub fn not_scheduled(block_hash: Hash, duration: Duration) -> Self {
        Self {
            additional_validations_ok: false,
            connect_result: None,
            block_hash,
            duration,
        }
    }

    pub fn scheduled(block_hash: Hash, duration: Duration) -> Self {
        Self {
            additional_validations_ok: true,
            connect_result: None,
            block_hash,
            duration,
        }
    }

    pub fn connected(
        block_hash: Hash,
        connect_result: HashMap<Hash, ImportResult>,
        duration: Duration,
    ) -> Self {
        Self {
            additional_validations_ok: true,
            connect_result: Some(connect_result),
            block_hash,
            duration,
        }
    }

    /// Block rejected by header validation.
    pub fn invalid(block_hash: Hash, duration: Duration) -> Self {
        Self::connected(
            block_hash,
            HashMap::from([(block_hash, ImportResult::Invalid)]),
            duration,
        )
    }

    /// Whether `hash` itself was imported (best or not).
    pub fn was_block_added(&self, hash: &Hash) -> bool {
        self.additional_validations_ok
            && self
                .connect_result
                .as_ref()
                .and_then(|results| results.get(hash))
                .is_some_and(|result| result.is_imported())
    }

    /// Any block of the cascade became the new best.
    pub fn is_best(&self) -> bool {
        self.outcomes()
            .any(|result| result == ImportResult::ImportedBest)
    }

    pub fn is_invalid_block(&self) -> bool {
        self.outcomes().any(|result| result == ImportResult::Invalid)
    }

    pub fn is_scheduled(&self) -> bool {
        self.additional_validations_ok
    }

    /// Scheduled on the async worker, outcome not known yet.
    pub fn is_pending(&self) -> bool {
        self.additional_validations_ok && self.connect_result.is_none()
    }

    pub fn connect_result(&self) -> Option<&HashMap<Hash, ImportResult>> {
        self.connect_result.as_ref()
    }

    pub fn block_hash(&self) -> Hash {
        self.block_hash
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn log_if_slow(&self, threshold: Duration) {
        if self.duration > threshold {
            warn!(
                "[qc-05] Slow block processing: {} took {}ms",
                short_hex(&self.block_hash),
                self.duration.as_millis()
            );
        }
    }

    fn outcomes(&self) -> impl Iterator<Item = ImportResult> + '_ {
        self.connect_result
            .iter()
            .flat_map(|results| results.values().copied())
    }
}
