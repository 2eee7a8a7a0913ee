//! The sync engine.
//!
//! ## Reconciliation rules
//!
//! For every entity on a fetched page:
//!
//! | local record                         | action                  |
//! |--------------------------------------|-------------------------|
//! | absent                               | insert                  |
//! | clean, remote version >= local       | overwrite (or tombstone)|
//! | clean, remote version < local        | ignore (stale)          |
//! | dirty, remote version > local        | stage, do not apply     |
//! | dirty, remote version <= local       | ignore (stale)          |
//!
//! A dirty record keeps its local intent until the pending mutation is
//! confirmed, explicitly discarded, or rebased onto the staged version.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::iter::RecordIter;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use stash_protocol::{Change, EntityId, SyncCursor, Version};
use stash_remote::{FatalKind, RemoteClient, RemoteError, RetryingClient};
use stash_store::{
    Compaction, LocalRecord, LocalStore, Origin, PendingMutation, ScanFilter, StoreSummary,
    WriteBatch,
};
use std::collections::BTreeMap;
use std::time::Duration;

/// How fresh the local store must be before a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Skip the pass if the last full sync is younger than this.
    MaxAge(Duration),
    /// Always run a pass.
    Force,
}

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    /// No pass has run yet.
    Idle,
    /// Pulling pages from the change feed.
    Pulling,
    /// Submitting pending mutations.
    Flushing,
    /// The last pass completed.
    Synced,
    /// The last pass failed.
    Error,
}

/// Statistics about sync operations in this process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    /// Completed refresh passes.
    pub passes_completed: u64,
    /// Pages committed.
    pub pages_pulled: u64,
    /// Remote entities applied to clean records.
    pub entities_applied: u64,
    /// Remote entities staged on dirty records.
    pub entities_staged: u64,
    /// Mutations confirmed by the remote.
    pub mutations_confirmed: u64,
    /// Mutations rejected as conflicts.
    pub conflicts: u64,
    /// When the last pass completed.
    pub last_pass: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of [`SyncEngine::ensure_fresh`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    /// True if the store was fresh enough and nothing ran.
    pub skipped: bool,
    /// Pages committed.
    pub pages: u32,
    /// Entities inserted or overwritten.
    pub applied: usize,
    /// Entities staged on dirty records.
    pub staged: usize,
    /// Entities older than the local copy.
    pub stale: usize,
    /// Cursor after the pass.
    pub cursor: SyncCursor,
    /// Submission results for pending mutations.
    pub flush: FlushReport,
}

/// A mutation the remote rejected as stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictInfo {
    /// Entity in conflict.
    pub id: EntityId,
    /// Version the local change was based on.
    pub base_version: Version,
    /// Version the remote holds.
    pub remote_version: Version,
}

/// Result of submitting the pending queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Mutations the remote accepted, with their new versions.
    pub confirmed: Vec<(EntityId, Version)>,
    /// Mutations rejected as stale; they stay queued.
    pub conflicts: Vec<ConflictInfo>,
    /// Mutations rejected for good; they stay queued.
    pub failed: Vec<(EntityId, String)>,
    /// Deletions of local records the remote never created.
    pub withdrawn: Vec<EntityId>,
    /// True if submission stopped because the remote was unreachable.
    pub interrupted: bool,
    /// Mutations still queued afterwards.
    pub remaining: usize,
}

/// Result of [`SyncEngine::mutate`] and [`SyncEngine::rebase_pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MutationOutcome {
    /// The remote accepted the change at this version.
    Confirmed {
        /// Version the remote assigned.
        version: Version,
    },
    /// Locally committed, remote pending: the remote was unreachable.
    RemotePending,
    /// A never-confirmed local record was deleted and the remote does not
    /// hold it; its pending creation was dropped.
    Withdrawn,
}

/// Result of [`SyncEngine::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Records checked.
    pub records: usize,
    /// Pending mutations checked.
    pub pending: usize,
    /// Every broken invariant found.
    pub problems: Vec<String>,
}

impl VerifyReport {
    /// Returns true if no problem was found.
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Store summary plus engine state.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    /// Store counts.
    pub summary: StoreSummary,
    /// Engine state.
    pub state: SyncState,
    /// Engine statistics.
    pub stats: SyncStats,
}

#[derive(Debug, Default)]
struct PullCounts {
    pages: u32,
    applied: usize,
    staged: usize,
    stale: usize,
}

/// Keeps a local store consistent with the remote account.
pub struct SyncEngine<S: LocalStore, R: RemoteClient> {
    config: SyncConfig,
    store: S,
    remote: RetryingClient<R>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl<S: LocalStore, R: RemoteClient> SyncEngine<S, R> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, store: S, remote: R) -> Self {
        let remote = RetryingClient::new(remote, config.retry.clone());
        Self {
            config,
            store,
            remote,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the local store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the remote client.
    pub fn remote(&self) -> &R {
        self.remote.inner()
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn handle_error(&self, error: &SyncError) {
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
    }

    /// Brings the local store up to date with the remote.
    ///
    /// Pages are committed one at a time together with their cursor, so an
    /// interrupted pass keeps what it committed and the next pass resumes at
    /// the first uncommitted page. Pending mutations are submitted after
    /// the pull.
    pub fn ensure_fresh(&self, freshness: Freshness) -> SyncResult<RefreshReport> {
        if let Freshness::MaxAge(max_age) = freshness {
            if self.is_fresh(max_age)? {
                tracing::debug!(?max_age, "store is fresh, skipping refresh");
                return Ok(RefreshReport {
                    skipped: true,
                    cursor: self.store.cursor()?,
                    ..RefreshReport::default()
                });
            }
        }

        self.set_state(SyncState::Pulling);
        let counts = self.pull().inspect_err(|e| self.handle_error(e))?;

        let flush = if self.config.flush_after_pull {
            self.set_state(SyncState::Flushing);
            self.flush_pending().inspect_err(|e| self.handle_error(e))?
        } else {
            FlushReport {
                remaining: self.store.pending_mutations()?.len(),
                ..FlushReport::default()
            }
        };

        let cursor = self.store.cursor()?;
        self.set_state(SyncState::Synced);
        {
            let mut stats = self.stats.write();
            stats.passes_completed += 1;
            stats.last_pass = Some(Utc::now());
            stats.last_error = None;
        }

        tracing::info!(
            pages = counts.pages,
            applied = counts.applied,
            staged = counts.staged,
            confirmed = flush.confirmed.len(),
            remaining = flush.remaining,
            %cursor,
            "sync pass complete"
        );

        Ok(RefreshReport {
            skipped: false,
            pages: counts.pages,
            applied: counts.applied,
            staged: counts.staged,
            stale: counts.stale,
            cursor,
            flush,
        })
    }

    fn is_fresh(&self, max_age: Duration) -> SyncResult<bool> {
        let Some(last) = self.store.last_full_sync()? else {
            return Ok(false);
        };
        Ok((Utc::now() - last)
            .to_std()
            .is_ok_and(|elapsed| elapsed < max_age))
    }

    /// Pulls every page after the stored cursor.
    fn pull(&self) -> SyncResult<PullCounts> {
        let mut counts = PullCounts::default();
        let mut cursor = self.store.cursor()?;

        loop {
            let page = self
                .remote
                .fetch_from_cursor(cursor, self.config.page_size)?;
            page.validate(cursor)
                .map_err(|e| SyncError::malformed(e.to_string()))?;

            let now = Utc::now();
            let mut records = Vec::with_capacity(page.entities.len());

            for entity in &page.entities {
                let record = match self.store.get(entity.id)? {
                    None => {
                        counts.applied += 1;
                        LocalRecord::from_remote(entity, now)
                    }
                    Some(mut record) if record.dirty => {
                        if entity.version > record.last_synced_version {
                            record.stage(entity);
                            counts.staged += 1;
                        } else {
                            counts.stale += 1;
                        }
                        record
                    }
                    Some(mut record) => {
                        if entity.version >= record.last_synced_version {
                            record.apply_remote(entity, now);
                            counts.applied += 1;
                        } else {
                            counts.stale += 1;
                        }
                        record
                    }
                };
                records.push(record);
            }

            let mut batch = WriteBatch::new()
                .records(records)
                .cursor(page.next_cursor);
            if !page.has_more {
                batch = batch.full_sync_at(now);
            }
            self.store.commit(batch)?;

            counts.pages += 1;
            tracing::debug!(
                from = %cursor,
                to = %page.next_cursor,
                entities = page.entities.len(),
                has_more = page.has_more,
                "page committed"
            );

            cursor = page.next_cursor;
            if !page.has_more {
                break;
            }
        }

        let mut stats = self.stats.write();
        stats.pages_pulled += u64::from(counts.pages);
        stats.entities_applied += counts.applied as u64;
        stats.entities_staged += counts.staged as u64;
        Ok(counts)
    }

    /// Returns a live record from the local store. Never contacts the remote.
    pub fn read(&self, id: EntityId) -> SyncResult<LocalRecord> {
        match self.store.get(id)? {
            Some(record) if record.is_live() => Ok(record),
            _ => Err(SyncError::NotFound(id)),
        }
    }

    /// Lists local records matching `filter`. Never contacts the remote.
    pub fn list(&self, filter: ScanFilter) -> RecordIter<'_, S> {
        self.list_after(filter, None)
    }

    /// Lists local records after `after`, continuing an earlier listing.
    pub fn list_after(&self, filter: ScanFilter, after: Option<EntityId>) -> RecordIter<'_, S> {
        RecordIter::new(&self.store, filter, after, self.config.scan_batch)
    }

    /// Applies a change locally and submits it to the remote.
    ///
    /// The local write (record plus pending mutation) is committed before
    /// the remote is contacted. A record that already has a pending
    /// mutation gets it replaced: fresh token, same base version. A put on
    /// a tombstone recreates the record on top of the deleted version.
    ///
    /// Deleting a local record whose creation never reached the remote
    /// drops it without contacting the remote. If the creation may have
    /// been applied, the delete is queued like any other change.
    ///
    /// # Errors
    ///
    /// - `NotFound` for a delete of an unknown or tombstoned identifier
    /// - `Conflict` if the remote holds a newer version; the change stays
    ///   queued
    /// - `Fatal` if the remote refuses the change; the change stays queued
    pub fn mutate(&self, id: EntityId, change: Change) -> SyncResult<MutationOutcome> {
        let now = Utc::now();
        let previous = self.store.pending(id)?;

        let (record, base_version) = match self.store.get(id)? {
            None => match &change {
                Change::Put(payload) => (LocalRecord::new_local(id, payload.clone(), now), 0),
                Change::Delete => return Err(SyncError::NotFound(id)),
            },
            Some(record) if record.tombstone && change.is_delete() => {
                return Err(SyncError::NotFound(id))
            }
            Some(mut record) => {
                let delivered = previous.as_ref().is_some_and(|p| p.submitted);
                if change.is_delete() && record.origin == Origin::Local && !delivered {
                    record.discard(now);
                    self.store
                        .commit(WriteBatch::new().record(record).dequeue(id))?;
                    tracing::debug!(%id, "withdrew unconfirmed local record");
                    return Ok(MutationOutcome::Withdrawn);
                }
                let base_version = match &previous {
                    Some(pending) => pending.base_version,
                    None => record.last_synced_version,
                };
                record.apply_local(&change, now);
                (record, base_version)
            }
        };

        let mut mutation = PendingMutation::new(id, change, base_version, now);
        mutation.submitted = previous.is_some_and(|p| p.submitted);
        self.store
            .commit(WriteBatch::new().record(record).enqueue(mutation.clone()))?;

        self.submit(&mutation)
    }

    fn submit(&self, mutation: &PendingMutation) -> SyncResult<MutationOutcome> {
        match self.remote.submit_mutation(&mutation.to_request()) {
            Ok(version) => {
                self.confirm(mutation.entity_id, version)?;
                Ok(MutationOutcome::Confirmed { version })
            }
            Err(err) if err.is_retryable() => {
                tracing::info!(
                    id = %mutation.entity_id,
                    error = %err,
                    "locally committed, remote pending"
                );
                self.note_delivery(mutation, &err)?;
                Ok(MutationOutcome::RemotePending)
            }
            Err(err) if is_withdrawal(mutation, &err) => {
                self.withdraw(mutation.entity_id)?;
                Ok(MutationOutcome::Withdrawn)
            }
            Err(err) => {
                if matches!(err, RemoteError::Conflict { .. }) {
                    self.stats.write().conflicts += 1;
                }
                Err(err.into())
            }
        }
    }

    /// Remembers that a submission may have reached the remote.
    fn note_delivery(&self, mutation: &PendingMutation, err: &RemoteError) -> SyncResult<()> {
        if mutation.submitted || err.is_undelivered() {
            return Ok(());
        }
        let mut marked = mutation.clone();
        marked.submitted = true;
        self.store.commit(WriteBatch::new().enqueue(marked))?;
        Ok(())
    }

    /// Drops a local record the remote reported it never created.
    fn withdraw(&self, id: EntityId) -> SyncResult<()> {
        let mut record = self.store.get(id)?.ok_or(SyncError::NotFound(id))?;
        record.discard(Utc::now());
        self.store
            .commit(WriteBatch::new().record(record).dequeue(id))?;
        tracing::debug!(%id, "remote never created the record, withdrawn");
        Ok(())
    }

    fn confirm(&self, id: EntityId, version: Version) -> SyncResult<()> {
        let mut record = self.store.get(id)?.ok_or(SyncError::NotFound(id))?;
        record.confirm(version, Utc::now());
        self.store
            .commit(WriteBatch::new().record(record).dequeue(id))?;
        self.stats.write().mutations_confirmed += 1;
        Ok(())
    }

    /// Submits queued mutations in enqueue order.
    ///
    /// Stops at the first submission that stays unreachable after retries.
    /// Conflicts and fatal rejections are reported per identifier and the
    /// mutations stay queued.
    pub fn flush_pending(&self) -> SyncResult<FlushReport> {
        let mut report = FlushReport::default();

        for mutation in self.store.pending_mutations()? {
            let id = mutation.entity_id;
            match self.remote.submit_mutation(&mutation.to_request()) {
                Ok(version) => {
                    self.confirm(id, version)?;
                    report.confirmed.push((id, version));
                }
                Err(RemoteError::Conflict {
                    current_version, ..
                }) => {
                    self.stats.write().conflicts += 1;
                    report.conflicts.push(ConflictInfo {
                        id,
                        base_version: mutation.base_version,
                        remote_version: current_version,
                    });
                }
                Err(err) if err.is_retryable() => {
                    tracing::warn!(%id, error = %err, "remote unreachable, flush stopped");
                    self.note_delivery(&mutation, &err)?;
                    report.interrupted = true;
                    break;
                }
                Err(err) if is_withdrawal(&mutation, &err) => {
                    self.withdraw(id)?;
                    report.withdrawn.push(id);
                }
                Err(err) => {
                    tracing::warn!(%id, error = %err, "mutation rejected");
                    report.failed.push((id, err.to_string()));
                }
            }
        }

        report.remaining = self.store.pending_mutations()?.len();
        Ok(report)
    }

    /// Drops the pending mutation for `id` and returns to the confirmed state.
    ///
    /// A staged remote update is applied; otherwise the saved base view is
    /// restored. A record never confirmed by the remote becomes a tombstone.
    pub fn discard_pending(&self, id: EntityId) -> SyncResult<LocalRecord> {
        if self.store.pending(id)?.is_none() {
            return Err(SyncError::NotFound(id));
        }
        let mut record = self.store.get(id)?.ok_or(SyncError::NotFound(id))?;
        record.discard(Utc::now());
        self.store
            .commit(WriteBatch::new().record(record.clone()).dequeue(id))?;
        tracing::info!(%id, "pending mutation discarded");
        Ok(record)
    }

    /// Keeps the local intent for `id` on top of the latest remote version.
    ///
    /// The staged remote version becomes the new base (pulling first if
    /// nothing is staged yet), the mutation gets a fresh token and is
    /// resubmitted.
    pub fn rebase_pending(&self, id: EntityId) -> SyncResult<MutationOutcome> {
        let pending = self.store.pending(id)?.ok_or(SyncError::NotFound(id))?;
        let mut record = self.store.get(id)?.ok_or(SyncError::NotFound(id))?;

        if record.staged.is_none() {
            self.pull()?;
            record = self.store.get(id)?.ok_or(SyncError::NotFound(id))?;
        }

        let now = Utc::now();
        let base_version = record.rebase(now);
        let mutation = PendingMutation::new(id, pending.change, base_version, now);
        self.store
            .commit(WriteBatch::new().record(record).enqueue(mutation.clone()))?;
        tracing::info!(%id, base_version, "pending mutation rebased");

        self.submit(&mutation)
    }

    /// Returns every pending mutation in enqueue order.
    pub fn pending(&self) -> SyncResult<Vec<PendingMutation>> {
        Ok(self.store.pending_mutations()?)
    }

    /// Returns store counts and engine state.
    pub fn status(&self) -> SyncResult<SyncStatus> {
        Ok(SyncStatus {
            summary: self.store.summary()?,
            state: self.state(),
            stats: self.stats(),
        })
    }

    /// Re-checks every record and pending mutation against the store
    /// invariants.
    pub fn verify(&self) -> SyncResult<VerifyReport> {
        let mut report = VerifyReport::default();
        let mut pending: BTreeMap<EntityId, PendingMutation> = self
            .store
            .pending_mutations()?
            .into_iter()
            .map(|m| (m.entity_id, m))
            .collect();
        report.pending = pending.len();

        let mut previous: Option<EntityId> = None;
        for record in self.list(ScanFilter::all()) {
            let record = record?;
            report.records += 1;
            let id = record.id;

            if previous.is_some_and(|prev| prev >= id) {
                report
                    .problems
                    .push(format!("entity {id}: records out of order or duplicated"));
            }
            previous = Some(id);

            let mutation = pending.remove(&id);
            match (&mutation, record.dirty) {
                (None, true) => report
                    .problems
                    .push(format!("entity {id}: dirty without a pending mutation")),
                (Some(_), false) => report
                    .problems
                    .push(format!("entity {id}: pending mutation on a clean record")),
                _ => {}
            }
            if let Some(mutation) = &mutation {
                if mutation.base_version > record.last_synced_version {
                    report.problems.push(format!(
                        "entity {id}: pending base version {} is ahead of synced version {}",
                        mutation.base_version, record.last_synced_version
                    ));
                }
            }
            if let Some(staged) = &record.staged {
                if !record.dirty {
                    report
                        .problems
                        .push(format!("entity {id}: staged update on a clean record"));
                }
                if staged.version <= record.last_synced_version {
                    report.problems.push(format!(
                        "entity {id}: staged version {} is not newer than synced version {}",
                        staged.version, record.last_synced_version
                    ));
                }
            }
            if record.origin == Origin::Local && record.last_synced_version != 0 {
                report
                    .problems
                    .push(format!("entity {id}: local record has a synced version"));
            }
        }

        for id in pending.keys() {
            report
                .problems
                .push(format!("entity {id}: pending mutation without a record"));
        }

        Ok(report)
    }

    /// Rewrites the store log as a single snapshot.
    pub fn compact(&self) -> SyncResult<Compaction> {
        Ok(self.store.compact()?)
    }

    /// Closes the store. Later calls fail.
    pub fn close(&self) -> SyncResult<()> {
        Ok(self.store.close()?)
    }
}

/// A delete of something the remote has never held: the creation it
/// follows did not land.
fn is_withdrawal(mutation: &PendingMutation, err: &RemoteError) -> bool {
    mutation.change.is_delete()
        && mutation.base_version == 0
        && matches!(
            err,
            RemoteError::Fatal {
                kind: FatalKind::NotFound,
                ..
            }
        )
}
