//! Atomic write batches.

use crate::record::{LocalRecord, PendingMutation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stash_protocol::{EntityId, SyncCursor};

/// A set of changes committed to the store as one unit.
///
/// Everything in a batch lands in a single framed log entry: either all of
/// it is visible after a crash or none of it is. Within a batch, `dequeue`
/// is applied before `enqueue`, so a batch may drop and re-queue the same
/// identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    /// Records to insert or overwrite.
    pub records: Vec<LocalRecord>,
    /// Pending mutations to queue. A mutation for an identifier that is
    /// already queued replaces it and keeps its place in the queue.
    pub enqueue: Vec<PendingMutation>,
    /// Identifiers whose pending mutation is removed.
    pub dequeue: Vec<EntityId>,
    /// New sync cursor, if the batch advances it.
    pub cursor: Option<SyncCursor>,
    /// Completion time of a full sync pass, if this batch ends one.
    pub full_sync_at: Option<DateTime<Utc>>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record.
    #[must_use]
    pub fn record(mut self, record: LocalRecord) -> Self {
        self.records.push(record);
        self
    }

    /// Adds several records.
    #[must_use]
    pub fn records(mut self, records: impl IntoIterator<Item = LocalRecord>) -> Self {
        self.records.extend(records);
        self
    }

    /// Queues a pending mutation.
    #[must_use]
    pub fn enqueue(mut self, mutation: PendingMutation) -> Self {
        self.enqueue.push(mutation);
        self
    }

    /// Removes the pending mutation of an identifier.
    #[must_use]
    pub fn dequeue(mut self, id: EntityId) -> Self {
        self.dequeue.push(id);
        self
    }

    /// Moves the sync cursor.
    #[must_use]
    pub fn cursor(mut self, cursor: SyncCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Records the end of a full sync pass.
    #[must_use]
    pub fn full_sync_at(mut self, at: DateTime<Utc>) -> Self {
        self.full_sync_at = Some(at);
        self
    }

    /// Returns true if the batch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
            && self.enqueue.is_empty()
            && self.dequeue.is_empty()
            && self.cursor.is_none()
            && self.full_sync_at.is_none()
    }
}
