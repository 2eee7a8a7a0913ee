//! Error types for remote calls.

use stash_protocol::{EntityId, Version};
use std::fmt;
use thiserror::Error;

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Why a remote call failed for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// Credentials were missing or rejected.
    Auth,
    /// The endpoint or entity does not exist.
    NotFound,
    /// The request or response could not be understood.
    Malformed,
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FatalKind::Auth => "authentication",
            FatalKind::NotFound => "not found",
            FatalKind::Malformed => "malformed",
        };
        f.write_str(name)
    }
}

/// Classified failure of a remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote was temporarily failing. The request may have reached it,
    /// so a mutation's effect is unknown.
    #[error("remote unavailable: {message}")]
    Retryable {
        /// Error message.
        message: String,
    },

    /// The request never left this machine (connection refused, DNS
    /// failure). The remote saw nothing.
    #[error("remote unreachable: {message}")]
    Unreachable {
        /// Error message.
        message: String,
    },

    /// The mutation was made against a stale version.
    #[error("version conflict on entity {entity_id}: remote is at version {current_version}")]
    Conflict {
        /// Entity the mutation targeted.
        entity_id: EntityId,
        /// Version the remote currently holds.
        current_version: Version,
    },

    /// The call can never succeed as issued.
    #[error("{kind} error: {message}")]
    Fatal {
        /// Failure category.
        kind: FatalKind,
        /// Error message.
        message: String,
    },
}

impl RemoteError {
    /// Creates a retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
        }
    }

    /// Creates an error for a request that was never delivered.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }

    /// Creates a fatal error.
    pub fn fatal(kind: FatalKind, message: impl Into<String>) -> Self {
        Self::Fatal {
            kind,
            message: message.into(),
        }
    }

    /// Creates a fatal error for a response that could not be understood.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::fatal(FatalKind::Malformed, message)
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Retryable { .. } | RemoteError::Unreachable { .. }
        )
    }

    /// Returns true if the request certainly did not reach the remote.
    pub fn is_undelivered(&self) -> bool {
        matches!(self, RemoteError::Unreachable { .. })
    }
}
