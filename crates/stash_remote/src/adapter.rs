//! Applies a retry policy uniformly to every remote call.

use crate::client::RemoteClient;
use crate::error::RemoteResult;
use crate::retry::RetryPolicy;
use stash_protocol::{FetchPage, MutationRequest, SyncCursor, Version};

/// Wraps a client so every call goes through one [`RetryPolicy`].
///
/// Mutation retries resend the same request, so the idempotency token keeps
/// a retried submission from applying twice.
#[derive(Debug)]
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: RemoteClient> RetryingClient<C> {
    /// Wraps `inner` with `policy`.
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Returns the wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Returns the policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<C: RemoteClient> RemoteClient for RetryingClient<C> {
    fn fetch_from_cursor(&self, cursor: SyncCursor, limit: u32) -> RemoteResult<FetchPage> {
        self.policy
            .run("fetch_from_cursor", || self.inner.fetch_from_cursor(cursor, limit))
    }

    fn submit_mutation(&self, request: &MutationRequest) -> RemoteResult<Version> {
        self.policy
            .run("submit_mutation", || self.inner.submit_mutation(request))
    }
}
