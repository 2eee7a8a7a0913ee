//! Lazy, restartable iteration over local records.

use crate::error::SyncResult;
use stash_protocol::EntityId;
use stash_store::{LocalRecord, LocalStore, ScanFilter};
use std::collections::VecDeque;

/// Iterates local records in identifier order, reading the store in batches.
///
/// The iterator never contacts the remote. If it is dropped part way,
/// [`RecordIter::resume_point`] gives the identifier to pass to
/// `list_after` to continue where it stopped.
pub struct RecordIter<'a, S: LocalStore> {
    store: &'a S,
    filter: ScanFilter,
    batch: usize,
    buffer: VecDeque<LocalRecord>,
    scanned_to: Option<EntityId>,
    last_yielded: Option<EntityId>,
    exhausted: bool,
}

impl<'a, S: LocalStore> RecordIter<'a, S> {
    pub(crate) fn new(
        store: &'a S,
        filter: ScanFilter,
        after: Option<EntityId>,
        batch: usize,
    ) -> Self {
        Self {
            store,
            filter,
            batch: batch.max(1),
            buffer: VecDeque::new(),
            scanned_to: after,
            last_yielded: after,
            exhausted: false,
        }
    }

    /// Returns the identifier of the last record yielded.
    pub fn resume_point(&self) -> Option<EntityId> {
        self.last_yielded
    }

    fn refill(&mut self) -> SyncResult<()> {
        let records = self
            .store
            .scan(&self.filter, self.scanned_to, self.batch)?;
        if records.len() < self.batch {
            self.exhausted = true;
        }
        if let Some(last) = records.last() {
            self.scanned_to = Some(last.id);
        }
        self.buffer.extend(records);
        Ok(())
    }
}

impl<S: LocalStore> Iterator for RecordIter<'_, S> {
    type Item = SyncResult<LocalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.refill() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }

        let record = self.buffer.pop_front()?;
        self.last_yielded = Some(record.id);
        Some(Ok(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stash_protocol::{Entity, SyncCursor};
    use stash_store::MemoryStore;

    fn seeded(count: u64) -> MemoryStore {
        let store = MemoryStore::in_memory();
        let now = Utc::now();
        let records = (1..=count)
            .map(|n| LocalRecord::from_remote(&Entity::new(EntityId::new(n), 1, vec![n as u8]), now))
            .collect();
        store.upsert_batch(records, SyncCursor::new(count)).unwrap();
        store
    }

    #[test]
    fn yields_every_record_in_order() {
        let store = seeded(7);
        let ids: Vec<u64> = RecordIter::new(&store, ScanFilter::live(), None, 3)
            .map(|r| r.unwrap().id.as_u64())
            .collect();
        assert_eq!(ids, (1..=7).collect::<Vec<_>>());
    }

    #[test]
    fn resumes_after_partial_consumption() {
        let store = seeded(5);
        let mut iter = RecordIter::new(&store, ScanFilter::live(), None, 2);
        iter.next().unwrap().unwrap();
        iter.next().unwrap().unwrap();
        iter.next().unwrap().unwrap();
        let resume = iter.resume_point();
        assert_eq!(resume, Some(EntityId::new(3)));

        let rest: Vec<u64> = RecordIter::new(&store, ScanFilter::live(), resume, 2)
            .map(|r| r.unwrap().id.as_u64())
            .collect();
        assert_eq!(rest, vec![4, 5]);
    }

    #[test]
    fn errors_end_iteration() {
        let store = seeded(3);
        store.close().unwrap();
        let mut iter = RecordIter::new(&store, ScanFilter::live(), None, 2);
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }
}
