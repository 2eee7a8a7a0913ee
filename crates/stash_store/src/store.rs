//! The local store trait and its log-backed implementation.

use crate::backend::StorageBackend;
use crate::batch::WriteBatch;
use crate::dir::StoreDir;
use crate::error::{StoreError, StoreResult};
use crate::file::FileBackend;
use crate::log::{encode_frame, read_log, LogEntry};
use crate::memory::InMemoryBackend;
use crate::record::{LocalRecord, PendingMutation, ScanFilter, StoreSummary};
use crate::state::StoreState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use stash_protocol::{EntityId, SyncCursor};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Outcome of a log compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compaction {
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction.
    pub bytes_after: u64,
}

/// Durable local storage for records, pending mutations and the sync cursor.
///
/// Implementations serialize access internally; every method takes `&self`.
/// A failed `commit` leaves the store exactly as it was.
pub trait LocalStore: Send + Sync {
    /// Returns the record for `id`, tombstones included.
    fn get(&self, id: EntityId) -> StoreResult<Option<LocalRecord>>;

    /// Returns the pending mutation for `id`.
    fn pending(&self, id: EntityId) -> StoreResult<Option<PendingMutation>>;

    /// Returns every pending mutation in enqueue order.
    fn pending_mutations(&self) -> StoreResult<Vec<PendingMutation>>;

    /// Returns up to `limit` records matching `filter` with identifiers
    /// strictly greater than `after`, in identifier order.
    fn scan(
        &self,
        filter: &ScanFilter,
        after: Option<EntityId>,
        limit: usize,
    ) -> StoreResult<Vec<LocalRecord>>;

    /// Returns the persisted sync cursor.
    fn cursor(&self) -> StoreResult<SyncCursor>;

    /// Returns the completion time of the last full sync pass.
    fn last_full_sync(&self) -> StoreResult<Option<DateTime<Utc>>>;

    /// Returns aggregate counts.
    fn summary(&self) -> StoreResult<StoreSummary>;

    /// Validates and durably applies a batch.
    ///
    /// # Errors
    ///
    /// - `CursorRegression` if the batch moves the cursor backwards
    /// - `InvariantViolation` if the batch breaks record/queue consistency
    /// - `Closed` after [`LocalStore::close`]
    fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Writes records together with a new cursor in one atomic commit.
    fn upsert_batch(&self, records: Vec<LocalRecord>, cursor: SyncCursor) -> StoreResult<()> {
        self.commit(WriteBatch::new().records(records).cursor(cursor))
    }

    /// Rewrites the log as a single snapshot.
    fn compact(&self) -> StoreResult<Compaction>;

    /// Flushes and releases the store. Calling it again is a no-op.
    fn close(&self) -> StoreResult<()>;
}

impl<T: LocalStore + ?Sized> LocalStore for Arc<T> {
    fn get(&self, id: EntityId) -> StoreResult<Option<LocalRecord>> {
        (**self).get(id)
    }

    fn pending(&self, id: EntityId) -> StoreResult<Option<PendingMutation>> {
        (**self).pending(id)
    }

    fn pending_mutations(&self) -> StoreResult<Vec<PendingMutation>> {
        (**self).pending_mutations()
    }

    fn scan(
        &self,
        filter: &ScanFilter,
        after: Option<EntityId>,
        limit: usize,
    ) -> StoreResult<Vec<LocalRecord>> {
        (**self).scan(filter, after, limit)
    }

    fn cursor(&self) -> StoreResult<SyncCursor> {
        (**self).cursor()
    }

    fn last_full_sync(&self) -> StoreResult<Option<DateTime<Utc>>> {
        (**self).last_full_sync()
    }

    fn summary(&self) -> StoreResult<StoreSummary> {
        (**self).summary()
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        (**self).commit(batch)
    }

    fn compact(&self) -> StoreResult<Compaction> {
        (**self).compact()
    }

    fn close(&self) -> StoreResult<()> {
        (**self).close()
    }
}

/// A store whose state is rebuilt from a framed commit log at open.
pub struct LogStore<B: StorageBackend> {
    inner: Mutex<Inner<B>>,
}

impl<B: StorageBackend> fmt::Debug for LogStore<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LogStore")
            .field("cursor", &inner.state.cursor())
            .field("closed", &inner.closed)
            .finish_non_exhaustive()
    }
}

struct Inner<B> {
    backend: B,
    state: StoreState,
    dir: Option<StoreDir>,
    closed: bool,
}

impl<B> Inner<B> {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

/// A store persisted in a directory on disk.
pub type FileStore = LogStore<FileBackend>;

/// A store that lives only in memory.
pub type MemoryStore = LogStore<InMemoryBackend>;

impl FileStore {
    /// Opens or creates the store directory at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another process has the store open, or
    /// `Corrupted` if the log is damaged beyond its final frame.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = StoreDir::open(path.as_ref(), true)?;
        let backend = FileBackend::open(&dir.log_path())?;
        Self::recover(backend, Some(dir))
    }
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                backend: InMemoryBackend::new(),
                state: StoreState::default(),
                dir: None,
                closed: false,
            }),
        }
    }
}

impl<B: StorageBackend> LogStore<B> {
    /// Opens a store over an existing backend, replaying its log.
    pub fn with_backend(backend: B) -> StoreResult<Self> {
        Self::recover(backend, None)
    }

    fn recover(mut backend: B, dir: Option<StoreDir>) -> StoreResult<Self> {
        let replay = read_log(&backend)?;

        if replay.torn_tail {
            let size = backend.size()?;
            tracing::warn!(
                valid_len = replay.valid_len,
                dropped = size - replay.valid_len,
                "truncating torn frame at end of commit log"
            );
            backend.truncate(replay.valid_len)?;
        }

        let mut state = StoreState::default();
        let entries = replay.entries.len();
        for entry in replay.entries {
            match entry {
                LogEntry::Commit(batch) => state.apply(batch),
                LogEntry::Snapshot(snapshot) => state = StoreState::from_snapshot(snapshot),
            }
        }

        tracing::debug!(
            entries,
            cursor = %state.cursor(),
            "store recovered"
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                backend,
                state,
                dir,
                closed: false,
            }),
        })
    }

    /// Consumes the store and returns its backend.
    pub fn into_backend(self) -> B {
        self.inner.into_inner().backend
    }
}

impl<B: StorageBackend> LocalStore for LogStore<B> {
    fn get(&self, id: EntityId) -> StoreResult<Option<LocalRecord>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.state.get(id).cloned())
    }

    fn pending(&self, id: EntityId) -> StoreResult<Option<PendingMutation>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.state.pending(id).cloned())
    }

    fn pending_mutations(&self) -> StoreResult<Vec<PendingMutation>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.state.pending_in_order())
    }

    fn scan(
        &self,
        filter: &ScanFilter,
        after: Option<EntityId>,
        limit: usize,
    ) -> StoreResult<Vec<LocalRecord>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.state.scan(filter, after, limit))
    }

    fn cursor(&self) -> StoreResult<SyncCursor> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.state.cursor())
    }

    fn last_full_sync(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.state.last_full_sync())
    }

    fn summary(&self) -> StoreResult<StoreSummary> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.state.summary())
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.ensure_open()?;

        if batch.is_empty() {
            return Ok(());
        }

        inner.state.validate(&batch)?;

        let entry = LogEntry::Commit(batch);
        let frame = encode_frame(&entry)?;
        let start = inner.backend.size()?;

        let written = match inner.backend.append(&frame) {
            Ok(_) => inner.backend.sync(),
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            if let Err(undo) = inner.backend.truncate(start) {
                tracing::warn!(error = %undo, "could not cut failed commit from log");
            }
            return Err(err);
        }

        if let LogEntry::Commit(batch) = entry {
            tracing::debug!(
                records = batch.records.len(),
                enqueued = batch.enqueue.len(),
                dequeued = batch.dequeue.len(),
                cursor = ?batch.cursor,
                "batch committed"
            );
            inner.state.apply(batch);
        }
        Ok(())
    }

    fn compact(&self) -> StoreResult<Compaction> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.ensure_open()?;

        let bytes_before = inner.backend.size()?;
        let frame = encode_frame(&LogEntry::Snapshot(inner.state.snapshot()))?;
        inner.backend.replace(&frame)?;
        let bytes_after = inner.backend.size()?;

        tracing::info!(bytes_before, bytes_after, "commit log compacted");
        Ok(Compaction {
            bytes_before,
            bytes_after,
        })
    }

    fn close(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.backend.sync()?;
        inner.closed = true;
        if let Some(dir) = inner.dir.take() {
            dir.release()?;
        }
        Ok(())
    }
}
