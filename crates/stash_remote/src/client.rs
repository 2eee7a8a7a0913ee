//! The remote client contract used by the sync engine.

use crate::error::RemoteResult;
use stash_protocol::{FetchPage, MutationRequest, SyncCursor, Version};
use std::sync::Arc;

/// A client for the remote account service.
///
/// Implementations report failures already classified as [`RemoteError`]
/// so callers can tell retryable trouble from conflicts and fatal errors.
///
/// [`RemoteError`]: crate::RemoteError
pub trait RemoteClient: Send + Sync {
    /// Fetches the next page of the change feed after `cursor`.
    fn fetch_from_cursor(&self, cursor: SyncCursor, limit: u32) -> RemoteResult<FetchPage>;

    /// Submits a mutation and returns the version the remote assigned.
    ///
    /// Submitting the same idempotency token twice applies the change at
    /// most once.
    fn submit_mutation(&self, request: &MutationRequest) -> RemoteResult<Version>;
}

impl<T: RemoteClient + ?Sized> RemoteClient for &T {
    fn fetch_from_cursor(&self, cursor: SyncCursor, limit: u32) -> RemoteResult<FetchPage> {
        (**self).fetch_from_cursor(cursor, limit)
    }

    fn submit_mutation(&self, request: &MutationRequest) -> RemoteResult<Version> {
        (**self).submit_mutation(request)
    }
}

impl<T: RemoteClient + ?Sized> RemoteClient for Arc<T> {
    fn fetch_from_cursor(&self, cursor: SyncCursor, limit: u32) -> RemoteResult<FetchPage> {
        (**self).fetch_from_cursor(cursor, limit)
    }

    fn submit_mutation(&self, request: &MutationRequest) -> RemoteResult<Version> {
        (**self).submit_mutation(request)
    }
}
