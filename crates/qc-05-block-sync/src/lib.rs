//! # Block Sync Subsystem (qc-05)
//!
//! Admits inbound peer messages under backpressure, resolves orphaned blocks
//! into a connected chain, tracks which peers know which blocks and
//! transactions, and transfers state snapshots in chunks.
//!
//! ## Architecture Role
//!
//! ```text
//! [Transport] ──post_message──→ [MessageHandler] ──dispatch──┬──→ [BlockProcessor] ──→ [BlockSyncService] ──→ [Blockchain]
//!                                  (admission,                ├──→ [SnapshotProcessor] ──→ [TrieStore]
//!                                   priority queue)           ├──→ [SyncEngine]
//!                                                             └──→ [TransactionGateway]
//! ```
//!
//! ## Admission (in order)
//!
//! - Negative peer score → reject
//! - Too many in-flight messages from the sender → reject
//! - Block mined by a banned coinbase → reject
//! - Block or transaction batch already seen in the dedup window → reject, scored
//!
//! Rejections are silent towards the peer.

pub mod async_processor;
pub mod config;
pub mod domain;
pub mod events;
pub mod handler;
pub mod ports;
pub mod processor;
pub mod service;
pub mod snapshot;

pub use async_processor::{AsyncBlockProcessor, BlockProcessedListener};
pub use config::{SchedulingMode, SnapshotConfig, SyncConfig};
pub use domain::*;
pub use events::SyncError;
pub use handler::{HandlerPorts, MessageHandler};
pub use ports::inbound::{BlockProcessor, MessageHandlerApi, SnapshotApi};
pub use processor::NodeBlockProcessor;
pub use service::BlockSyncService;
pub use snapshot::{SnapshotPhase, SnapshotProcessor, SnapshotTarget};
