//! Error types for the sync engine.

use stash_protocol::{EntityId, Version};
use stash_remote::{FatalKind, RemoteError};
use stash_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Broad category of a sync failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The requested record does not exist locally.
    NotFound,
    /// The remote holds a newer version than the local change was based on.
    Conflict,
    /// The remote stayed unreachable through every retry.
    Retryable,
    /// The operation cannot succeed as issued.
    Fatal,
    /// Another process holds the store.
    LockBusy,
}

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No live record (or no pending mutation) for the identifier.
    #[error("entity {0} not found")]
    NotFound(EntityId),

    /// The remote rejected a mutation made against a stale version.
    #[error("conflict on entity {id}: remote is at version {remote_version}")]
    Conflict {
        /// Entity in conflict.
        id: EntityId,
        /// Version the remote currently holds.
        remote_version: Version,
    },

    /// The remote stayed unreachable after bounded retries.
    #[error("remote unreachable: {0}")]
    Retryable(String),

    /// The remote refused the call for good.
    #[error("{kind} error: {message}")]
    Fatal {
        /// Failure category.
        kind: FatalKind,
        /// Error message.
        message: String,
    },

    /// Another process has the store open.
    #[error("store is locked by another process")]
    LockBusy,

    /// Local store failure.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl SyncError {
    /// Returns the category of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::NotFound(_) => ErrorClass::NotFound,
            SyncError::Conflict { .. } => ErrorClass::Conflict,
            SyncError::Retryable(_) => ErrorClass::Retryable,
            SyncError::LockBusy => ErrorClass::LockBusy,
            SyncError::Fatal { .. } | SyncError::Store(_) => ErrorClass::Fatal,
        }
    }

    /// Creates a fatal error for a response that breaks the protocol.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Fatal {
            kind: FatalKind::Malformed,
            message: message.into(),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Locked => SyncError::LockBusy,
            other => SyncError::Store(other),
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Retryable { message } | RemoteError::Unreachable { message } => {
                SyncError::Retryable(message)
            }
            RemoteError::Conflict {
                entity_id,
                current_version,
            } => SyncError::Conflict {
                id: entity_id,
                remote_version: current_version,
            },
            RemoteError::Fatal { kind, message } => SyncError::Fatal { kind, message },
        }
    }
}
