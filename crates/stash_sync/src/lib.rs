//! # Stash Sync
//!
//! Local-state synchronization and caching engine.
//!
//! This crate provides:
//! - Incremental, resumable pulls of the remote change feed
//! - Local reads and lazy listings that never touch the remote
//! - Optimistic local mutations with idempotent submission
//! - Conflict handling that keeps the local intent until the caller
//!   discards or rebases it
//!
//! ## Architecture
//!
//! The engine sits between a [`LocalStore`](stash_store::LocalStore) and a
//! [`RemoteClient`](stash_remote::RemoteClient):
//! 1. Pull pages from the stored cursor, committing each page with its
//!    cursor in one batch
//! 2. Apply remote entities to clean records, stage them on dirty ones
//! 3. Submit pending mutations in enqueue order
//!
//! ## Key Invariants
//!
//! - The cursor only moves forward and lands together with its page
//! - A dirty record always has exactly one pending mutation
//! - Remote data never silently overwrites a pending local change
//! - Re-running a pass over unchanged remote data changes nothing

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod iter;

pub use config::SyncConfig;
pub use engine::{
    ConflictInfo, FlushReport, Freshness, MutationOutcome, RefreshReport, SyncEngine, SyncState,
    SyncStats, SyncStatus, VerifyReport,
};
pub use error::{ErrorClass, SyncError, SyncResult};
pub use iter::RecordIter;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
