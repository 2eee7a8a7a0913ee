//! In-memory store state rebuilt from the commit log.

use crate::batch::WriteBatch;
use crate::error::{StoreError, StoreResult};
use crate::record::{LocalRecord, PendingMutation, ScanFilter, StoreSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stash_protocol::{EntityId, SyncCursor};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Full store contents, written by compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Every record, tombstones included.
    pub records: Vec<LocalRecord>,
    /// Every queued mutation.
    pub pending: Vec<PendingMutation>,
    /// Persisted cursor.
    pub cursor: SyncCursor,
    /// Completion time of the last full sync.
    pub last_full_sync: Option<DateTime<Utc>>,
    /// Next enqueue sequence number.
    pub next_seq: u64,
}

/// Records, queue and cursor held by an open store.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    records: BTreeMap<EntityId, LocalRecord>,
    pending: BTreeMap<EntityId, PendingMutation>,
    cursor: SyncCursor,
    last_full_sync: Option<DateTime<Utc>>,
    next_seq: u64,
}

impl StoreState {
    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            records: snapshot.records.into_iter().map(|r| (r.id, r)).collect(),
            pending: snapshot
                .pending
                .into_iter()
                .map(|m| (m.entity_id, m))
                .collect(),
            cursor: snapshot.cursor,
            last_full_sync: snapshot.last_full_sync,
            next_seq: snapshot.next_seq,
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            records: self.records.values().cloned().collect(),
            pending: self.pending.values().cloned().collect(),
            cursor: self.cursor,
            last_full_sync: self.last_full_sync,
            next_seq: self.next_seq,
        }
    }

    pub(crate) fn get(&self, id: EntityId) -> Option<&LocalRecord> {
        self.records.get(&id)
    }

    pub(crate) fn pending(&self, id: EntityId) -> Option<&PendingMutation> {
        self.pending.get(&id)
    }

    /// Queued mutations in enqueue order.
    pub(crate) fn pending_in_order(&self) -> Vec<PendingMutation> {
        let mut queue: Vec<_> = self.pending.values().cloned().collect();
        queue.sort_by_key(|m| m.seq);
        queue
    }

    pub(crate) fn scan(
        &self,
        filter: &ScanFilter,
        after: Option<EntityId>,
        limit: usize,
    ) -> Vec<LocalRecord> {
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        self.records
            .range((lower, Bound::Unbounded))
            .map(|(_, record)| record)
            .take_while(|record| filter.max_id.map_or(true, |max| record.id <= max))
            .filter(|record| filter.matches(record))
            .take(limit)
            .cloned()
            .collect()
    }

    pub(crate) fn cursor(&self) -> SyncCursor {
        self.cursor
    }

    pub(crate) fn last_full_sync(&self) -> Option<DateTime<Utc>> {
        self.last_full_sync
    }

    pub(crate) fn summary(&self) -> StoreSummary {
        let mut summary = StoreSummary {
            pending: self.pending.len(),
            cursor: self.cursor,
            last_full_sync: self.last_full_sync,
            ..StoreSummary::default()
        };
        for record in self.records.values() {
            if record.tombstone {
                summary.tombstones += 1;
            } else {
                summary.records += 1;
                summary.payload_bytes += record.payload_len() as u64;
            }
            if record.dirty {
                summary.dirty += 1;
            }
            if record.staged.is_some() {
                summary.staged += 1;
            }
        }
        summary
    }

    /// Checks that applying `batch` keeps every invariant.
    ///
    /// Only identifiers the batch touches are checked; the rest of the state
    /// was checked when it was committed.
    pub(crate) fn validate(&self, batch: &WriteBatch) -> StoreResult<()> {
        if let Some(proposed) = batch.cursor {
            if proposed < self.cursor {
                return Err(StoreError::CursorRegression {
                    current: self.cursor,
                    proposed,
                });
            }
        }

        let mut records = BTreeMap::new();
        for record in &batch.records {
            if records.insert(record.id, record).is_some() {
                return Err(StoreError::invariant(
                    record.id,
                    "record appears twice in one batch",
                ));
            }
        }

        let mut enqueued = BTreeSet::new();
        for mutation in &batch.enqueue {
            if !enqueued.insert(mutation.entity_id) {
                return Err(StoreError::invariant(
                    mutation.entity_id,
                    "two pending mutations in one batch",
                ));
            }
        }
        let dequeued: BTreeSet<_> = batch.dequeue.iter().copied().collect();

        let touched = records
            .keys()
            .chain(enqueued.iter())
            .chain(dequeued.iter())
            .copied()
            .collect::<BTreeSet<_>>();

        for id in touched {
            let record = records.get(&id).copied().or_else(|| self.records.get(&id));
            let has_pending = enqueued.contains(&id)
                || (self.pending.contains_key(&id) && !dequeued.contains(&id));
            check_record(id, record, has_pending)?;
        }
        Ok(())
    }

    /// Applies a batch. Callers validate first; replay applies what was
    /// validated when it was written.
    pub(crate) fn apply(&mut self, batch: WriteBatch) {
        for record in batch.records {
            self.records.insert(record.id, record);
        }
        for id in &batch.dequeue {
            self.pending.remove(id);
        }
        for mut mutation in batch.enqueue {
            mutation.seq = match self.pending.get(&mutation.entity_id) {
                Some(existing) => existing.seq,
                None => {
                    self.next_seq += 1;
                    self.next_seq
                }
            };
            self.pending.insert(mutation.entity_id, mutation);
        }
        if let Some(cursor) = batch.cursor {
            self.cursor = cursor;
        }
        if let Some(at) = batch.full_sync_at {
            self.last_full_sync = Some(at);
        }
    }
}

/// Checks one identifier's record against its queue state.
pub(crate) fn check_record(
    id: EntityId,
    record: Option<&LocalRecord>,
    has_pending: bool,
) -> StoreResult<()> {
    match record {
        None if has_pending => Err(StoreError::invariant(
            id,
            "pending mutation without a record",
        )),
        None => Ok(()),
        Some(record) if record.dirty && !has_pending => Err(StoreError::invariant(
            id,
            "dirty record without a pending mutation",
        )),
        Some(record) if !record.dirty && has_pending => Err(StoreError::invariant(
            id,
            "pending mutation on a clean record",
        )),
        Some(record) if !record.dirty && record.staged.is_some() => Err(StoreError::invariant(
            id,
            "staged update on a clean record",
        )),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stash_protocol::{Change, Entity};

    fn clean(id: u64) -> LocalRecord {
        LocalRecord::from_remote(&Entity::new(EntityId::new(id), 1, b"x".to_vec()), Utc::now())
    }

    fn dirty(id: u64) -> (LocalRecord, PendingMutation) {
        let now = Utc::now();
        let mut record = clean(id);
        let change = Change::Put(b"y".to_vec());
        record.apply_local(&change, now);
        let mutation = PendingMutation::new(record.id, change, 1, now);
        (record, mutation)
    }

    #[test]
    fn cursor_cannot_regress() {
        let mut state = StoreState::default();
        state.apply(WriteBatch::new().cursor(SyncCursor::new(5)));

        let err = state
            .validate(&WriteBatch::new().cursor(SyncCursor::new(4)))
            .unwrap_err();
        assert!(matches!(err, StoreError::CursorRegression { .. }));
        assert!(state
            .validate(&WriteBatch::new().cursor(SyncCursor::new(5)))
            .is_ok());
    }

    #[test]
    fn dirty_requires_pending() {
        let state = StoreState::default();
        let (record, mutation) = dirty(1);

        assert!(matches!(
            state.validate(&WriteBatch::new().record(record.clone())),
            Err(StoreError::InvariantViolation { .. })
        ));
        assert!(matches!(
            state.validate(&WriteBatch::new().enqueue(mutation.clone())),
            Err(StoreError::InvariantViolation { .. })
        ));
        assert!(state
            .validate(&WriteBatch::new().record(record).enqueue(mutation))
            .is_ok());
    }

    #[test]
    fn duplicate_records_rejected() {
        let state = StoreState::default();
        let batch = WriteBatch::new().record(clean(1)).record(clean(1));
        assert!(state.validate(&batch).is_err());
    }

    #[test]
    fn replacement_keeps_queue_position() {
        let mut state = StoreState::default();
        let (r1, m1) = dirty(1);
        let (r2, m2) = dirty(2);
        state.apply(WriteBatch::new().record(r1).enqueue(m1));
        state.apply(WriteBatch::new().record(r2).enqueue(m2));

        let (_, replacement) = dirty(1);
        let token = replacement.token;
        state.apply(WriteBatch::new().enqueue(replacement));

        let queue = state.pending_in_order();
        assert_eq!(queue[0].entity_id, EntityId::new(1));
        assert_eq!(queue[0].token, token);
        assert_eq!(queue[1].entity_id, EntityId::new(2));
    }

    #[test]
    fn scan_is_ordered_and_resumable() {
        let mut state = StoreState::default();
        state.apply(WriteBatch::new().records((1..=5).map(clean)));

        let first = state.scan(&ScanFilter::live(), None, 2);
        assert_eq!(first.iter().map(|r| r.id.as_u64()).collect::<Vec<_>>(), [1, 2]);
        let rest = state.scan(&ScanFilter::live(), Some(EntityId::new(2)), 10);
        assert_eq!(rest.iter().map(|r| r.id.as_u64()).collect::<Vec<_>>(), [3, 4, 5]);
    }

    #[test]
    fn snapshot_roundtrip_preserves_state() {
        let mut state = StoreState::default();
        let (record, mutation) = dirty(3);
        state.apply(
            WriteBatch::new()
                .record(clean(1))
                .record(record)
                .enqueue(mutation)
                .cursor(SyncCursor::new(8)),
        );

        let restored = StoreState::from_snapshot(state.snapshot());
        assert_eq!(restored.summary(), state.summary());
        assert_eq!(restored.pending_in_order(), state.pending_in_order());
    }
}
