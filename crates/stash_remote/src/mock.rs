//! Deterministic in-memory stand-in for the remote service.

use crate::client::RemoteClient;
use crate::error::{FatalKind, RemoteError, RemoteResult};
use parking_lot::Mutex;
use stash_protocol::{
    Change, Entity, EntityId, FetchPage, IdempotencyToken, MutationRequest, SyncCursor, Version,
};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// An in-memory remote with an ordered change stream.
///
/// Every change to an entity moves it to the head of the stream, so a fetch
/// from any cursor returns each changed entity once, in its latest state.
/// Failures can be scripted to exercise retry and resume paths.
#[derive(Debug, Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

#[derive(Debug)]
struct MockState {
    entities: BTreeMap<EntityId, Entity>,
    stream: BTreeMap<u64, EntityId>,
    head: u64,
    page_size: Option<u32>,
    reachable: bool,
    fail_next: VecDeque<RemoteError>,
    fetch_failures: BTreeMap<usize, RemoteError>,
    fetch_calls: usize,
    fetch_log: Vec<SyncCursor>,
    tokens: HashMap<IdempotencyToken, Version>,
    submissions: usize,
    applied: usize,
    drop_response: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            entities: BTreeMap::new(),
            stream: BTreeMap::new(),
            head: 0,
            page_size: None,
            reachable: true,
            fail_next: VecDeque::new(),
            fetch_failures: BTreeMap::new(),
            fetch_calls: 0,
            fetch_log: Vec::new(),
            tokens: HashMap::new(),
            submissions: 0,
            applied: 0,
            drop_response: false,
        }
    }
}

impl MockState {
    fn record_change(&mut self, entity: Entity) -> Version {
        self.stream.retain(|_, id| *id != entity.id);
        self.head += 1;
        self.stream.insert(self.head, entity.id);
        let version = entity.version;
        self.entities.insert(entity.id, entity);
        version
    }

    fn next_version(&self, id: EntityId) -> Version {
        self.entities.get(&id).map_or(1, |e| e.version + 1)
    }
}

impl MockRemote {
    /// Creates an empty, reachable remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps every page at `size` entities, whatever limit the client asks for.
    pub fn with_page_size(self, size: u32) -> Self {
        self.state.lock().page_size = Some(size);
        self
    }

    /// Creates or updates an entity on the remote side.
    pub fn upsert_remote(&self, id: EntityId, payload: Vec<u8>) -> Version {
        let mut state = self.state.lock();
        let version = state.next_version(id);
        state.record_change(Entity::new(id, version, payload))
    }

    /// Deletes an entity on the remote side.
    pub fn delete_remote(&self, id: EntityId) -> Version {
        let mut state = self.state.lock();
        let version = state.next_version(id);
        state.record_change(Entity::deleted(id, version))
    }

    /// Makes every call fail as unreachable, or restores service.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Fails the next call of any kind with `err`.
    pub fn fail_next(&self, err: RemoteError) {
        self.state.lock().fail_next.push_back(err);
    }

    /// Fails the `call`-th fetch (1-based, counted from creation) with `err`.
    pub fn fail_fetch_on(&self, call: usize, err: RemoteError) {
        self.state.lock().fetch_failures.insert(call, err);
    }

    /// Applies the next mutation but reports it as a lost response.
    pub fn drop_response_after_apply(&self) {
        self.state.lock().drop_response = true;
    }

    /// Returns the cursors of every fetch that reached the remote.
    pub fn fetch_log(&self) -> Vec<SyncCursor> {
        self.state.lock().fetch_log.clone()
    }

    /// Returns the current state of an entity.
    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        self.state.lock().entities.get(&id).cloned()
    }

    /// Returns the current version of an entity.
    pub fn current_version(&self, id: EntityId) -> Option<Version> {
        self.state.lock().entities.get(&id).map(|e| e.version)
    }

    /// Returns the position of the newest change.
    pub fn head(&self) -> SyncCursor {
        SyncCursor::new(self.state.lock().head)
    }

    /// Returns how many mutation submissions reached the remote.
    pub fn submissions(&self) -> usize {
        self.state.lock().submissions
    }

    /// Returns how many mutations were actually applied.
    pub fn applied_mutations(&self) -> usize {
        self.state.lock().applied
    }
}

impl RemoteClient for MockRemote {
    fn fetch_from_cursor(&self, cursor: SyncCursor, limit: u32) -> RemoteResult<FetchPage> {
        let mut state = self.state.lock();
        if !state.reachable {
            return Err(RemoteError::unreachable("mock remote unreachable"));
        }

        state.fetch_calls += 1;
        state.fetch_log.push(cursor);

        let call = state.fetch_calls;
        if let Some(err) = state.fetch_failures.remove(&call) {
            return Err(err);
        }
        if let Some(err) = state.fail_next.pop_front() {
            return Err(err);
        }

        let limit = state.page_size.map_or(limit, |size| size.min(limit)).max(1) as usize;
        let mut entities = Vec::new();
        let mut next_cursor = cursor;

        for (&position, id) in state.stream.range(cursor.position() + 1..).take(limit) {
            if let Some(entity) = state.entities.get(id) {
                entities.push(entity.clone());
            }
            next_cursor = SyncCursor::new(position);
        }

        let has_more = state.stream.range(next_cursor.position() + 1..).next().is_some();
        Ok(FetchPage::new(entities, next_cursor, has_more))
    }

    fn submit_mutation(&self, request: &MutationRequest) -> RemoteResult<Version> {
        let mut state = self.state.lock();
        if !state.reachable {
            return Err(RemoteError::unreachable("mock remote unreachable"));
        }

        state.submissions += 1;
        if let Some(err) = state.fail_next.pop_front() {
            return Err(err);
        }

        if let Some(&version) = state.tokens.get(&request.token) {
            return Ok(version);
        }

        let id = request.entity_id;
        let current = state.entities.get(&id).map_or(0, |e| e.version);
        if request.base_version != current {
            return Err(RemoteError::Conflict {
                entity_id: id,
                current_version: current,
            });
        }

        let live = state.entities.get(&id).is_some_and(|e| !e.deleted);
        let version = current + 1;
        let entity = match &request.change {
            Change::Put(payload) => Entity::new(id, version, payload.clone()),
            Change::Delete if live => Entity::deleted(id, version),
            Change::Delete => {
                return Err(RemoteError::fatal(
                    FatalKind::NotFound,
                    format!("entity {id} does not exist"),
                ))
            }
        };

        state.record_change(entity);
        state.tokens.insert(request.token, version);
        state.applied += 1;

        if std::mem::take(&mut state.drop_response) {
            return Err(RemoteError::retryable("response lost"));
        }
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> EntityId {
        EntityId::new(n)
    }

    #[test]
    fn pages_follow_the_stream() {
        let remote = MockRemote::new();
        for n in 1..=5 {
            remote.upsert_remote(id(n), vec![n as u8]);
        }

        let first = remote.fetch_from_cursor(SyncCursor::START, 3).unwrap();
        assert_eq!(first.entities.len(), 3);
        assert_eq!(first.next_cursor, SyncCursor::new(3));
        assert!(first.has_more);

        let second = remote.fetch_from_cursor(first.next_cursor, 3).unwrap();
        assert_eq!(second.entities.len(), 2);
        assert!(!second.has_more);

        let empty = remote.fetch_from_cursor(second.next_cursor, 3).unwrap();
        assert!(empty.entities.is_empty());
        assert_eq!(empty.next_cursor, second.next_cursor);
    }

    #[test]
    fn updates_move_entity_to_head() {
        let remote = MockRemote::new();
        remote.upsert_remote(id(1), b"a".to_vec());
        remote.upsert_remote(id(2), b"b".to_vec());
        let cursor = remote.head();
        remote.upsert_remote(id(1), b"a2".to_vec());

        let page = remote.fetch_from_cursor(cursor, 10).unwrap();
        assert_eq!(page.entities.len(), 1);
        assert_eq!(page.entities[0].version, 2);
        assert_eq!(page.entities[0].payload, b"a2");
    }

    #[test]
    fn stale_base_version_conflicts() {
        let remote = MockRemote::new();
        remote.upsert_remote(id(1), b"a".to_vec());
        remote.upsert_remote(id(1), b"b".to_vec());

        let request =
            MutationRequest::new(IdempotencyToken::generate(), id(1), 1, Change::Delete);
        assert_eq!(
            remote.submit_mutation(&request),
            Err(RemoteError::Conflict {
                entity_id: id(1),
                current_version: 2,
            })
        );
    }

    #[test]
    fn tokens_deduplicate() {
        let remote = MockRemote::new();
        let request = MutationRequest::new(
            IdempotencyToken::generate(),
            id(9),
            0,
            Change::Put(b"x".to_vec()),
        );

        let v1 = remote.submit_mutation(&request).unwrap();
        let v2 = remote.submit_mutation(&request).unwrap();
        assert_eq!(v1, v2);
        assert_eq!(remote.applied_mutations(), 1);
        assert_eq!(remote.submissions(), 2);
    }

    #[test]
    fn scripted_fetch_failure() {
        let remote = MockRemote::new().with_page_size(1);
        remote.upsert_remote(id(1), b"a".to_vec());
        remote.upsert_remote(id(2), b"b".to_vec());
        remote.fail_fetch_on(2, RemoteError::malformed("scripted"));

        let page = remote.fetch_from_cursor(SyncCursor::START, 10).unwrap();
        assert_eq!(page.entities.len(), 1);
        assert!(remote.fetch_from_cursor(page.next_cursor, 10).is_err());
        assert!(remote.fetch_from_cursor(page.next_cursor, 10).is_ok());
    }

    #[test]
    fn deleting_missing_entity_is_not_found() {
        let remote = MockRemote::new();
        let request =
            MutationRequest::new(IdempotencyToken::generate(), id(3), 0, Change::Delete);
        assert!(matches!(
            remote.submit_mutation(&request),
            Err(RemoteError::Fatal {
                kind: FatalKind::NotFound,
                ..
            })
        ));
    }
}
