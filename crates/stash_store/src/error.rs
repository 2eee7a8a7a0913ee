//! Error types for the local store.

use stash_protocol::{EntityId, ProtocolError, SyncCursor};
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// The commit log is damaged in a way recovery cannot repair.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// A log entry could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// Another process holds the store lock.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// A batch would move the sync cursor backwards.
    #[error("cursor regression: store is at {current}, batch carries {proposed}")]
    CursorRegression {
        /// Cursor currently persisted.
        current: SyncCursor,
        /// Cursor carried by the rejected batch.
        proposed: SyncCursor,
    },

    /// A batch would break a record/pending-mutation invariant.
    #[error("invariant violation for entity {id}: {message}")]
    InvariantViolation {
        /// Entity the batch touched.
        id: EntityId,
        /// What went wrong.
        message: String,
    },

    /// Invalid store layout or path.
    #[error("invalid store: {0}")]
    InvalidFormat(String),
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates an invariant violation error.
    pub fn invariant(id: EntityId, message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            id,
            message: message.into(),
        }
    }

    /// Returns true if the failure is the single-writer lock being taken.
    pub fn is_locked(&self) -> bool {
        matches!(self, StoreError::Locked)
    }
}
