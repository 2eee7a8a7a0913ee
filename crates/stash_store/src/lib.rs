//! # Stash Store
//!
//! Durable local storage for synchronized records.
//!
//! The store keeps three things consistent with each other:
//! - one [`LocalRecord`] per entity identifier
//! - at most one [`PendingMutation`] per identifier, present exactly while
//!   the record is dirty
//! - the [`SyncCursor`](stash_protocol::SyncCursor), which only moves forward
//!
//! All changes go through [`LocalStore::commit`] as a [`WriteBatch`], which is
//! validated, written as one checksummed log frame and synced before it
//! becomes visible.
//!
//! ## Layout
//!
//! - [`StorageBackend`]: raw bytes ([`FileBackend`], [`InMemoryBackend`])
//! - [`log`]: frame format and crash recovery
//! - [`StoreDir`]: store directory and the single-writer lock
//! - [`LogStore`]: the [`LocalStore`] implementation ([`FileStore`],
//!   [`MemoryStore`])

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod batch;
mod dir;
mod error;
mod file;
pub mod log;
mod memory;
mod record;
mod state;
mod store;

pub use backend::StorageBackend;
pub use batch::WriteBatch;
pub use dir::StoreDir;
pub use error::{StoreError, StoreResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use record::{BaseView, LocalRecord, Origin, PendingMutation, ScanFilter, StoreSummary};
pub use state::Snapshot;
pub use store::{Compaction, FileStore, LocalStore, LogStore, MemoryStore};
