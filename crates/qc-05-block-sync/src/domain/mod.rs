//! # Domain Layer for Block Sync
//!
//! Business logic with no network I/O. Interior mutability uses
//! `parking_lot` locks so the components can be shared behind `Arc`.
//!
//! ## Contents
//!
//! - **entities**: `MessageTask`, `ProcessResult`, `ImportResult`, `ScoringEvent`
//! - **value_objects**: dedup cache and per-peer message counter
//! - **invariants**: ordered admission checks
//! - **queue**: task queue disciplines and the class scheduler
//! - **node_information**: LRU-bounded peer knowledge and block cache
//! - **staging**: orphan block and header staging store
//! - **services**: content hashing, ordering and skeleton helpers

mod entities;
mod invariants;
mod node_information;
mod queue;
mod services;
mod staging;
mod value_objects;

pub use entities::*;
pub use invariants::*;
pub use node_information::*;
pub use queue::*;
pub use services::*;
pub use staging::*;
pub use value_objects::*;
