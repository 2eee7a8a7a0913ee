//! Property tests: random interleavings of remote changes, local mutations
//! and sync passes must keep the store consistent.

use proptest::prelude::*;
use stash_protocol::{Change, EntityId, SyncCursor};
use stash_remote::{MockRemote, RetryPolicy};
use stash_store::{LocalStore, MemoryStore, ScanFilter};
use stash_sync::{Freshness, SyncConfig, SyncEngine};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    RemoteUpsert(u64, u8),
    RemoteDelete(u64),
    LocalPut(u64, u8),
    LocalDelete(u64),
    Refresh,
    Flush,
    Discard(u64),
    Rebase(u64),
    SetReachable(bool),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let id = 1u64..8;
    prop_oneof![
        (id.clone(), any::<u8>()).prop_map(|(i, b)| Op::RemoteUpsert(i, b)),
        id.clone().prop_map(Op::RemoteDelete),
        (id.clone(), any::<u8>()).prop_map(|(i, b)| Op::LocalPut(i, b)),
        id.clone().prop_map(Op::LocalDelete),
        Just(Op::Refresh),
        Just(Op::Flush),
        id.clone().prop_map(Op::Discard),
        id.prop_map(Op::Rebase),
        any::<bool>().prop_map(Op::SetReachable),
    ]
}

type Snapshot = Vec<(EntityId, Vec<u8>, u64, bool, bool, bool)>;

fn snapshot<S: LocalStore>(store: &S) -> Snapshot {
    store
        .scan(&ScanFilter::all(), None, usize::MAX)
        .unwrap()
        .into_iter()
        .map(|r| {
            (
                r.id,
                r.payload,
                r.last_synced_version,
                r.dirty,
                r.tombstone,
                r.staged.is_some(),
            )
        })
        .collect()
}

fn run(ops: &[Op]) -> (Arc<MockRemote>, SyncEngine<MemoryStore, Arc<MockRemote>>) {
    let remote = Arc::new(MockRemote::new().with_page_size(3));
    let config = SyncConfig::new()
        .with_page_size(3)
        .with_retry(RetryPolicy::no_retry());
    let engine = SyncEngine::new(config, MemoryStore::in_memory(), Arc::clone(&remote));

    let mut cursor = SyncCursor::START;
    for op in ops {
        match op {
            Op::RemoteUpsert(id, byte) => {
                remote.upsert_remote(EntityId::new(*id), vec![*byte]);
            }
            Op::RemoteDelete(id) => {
                remote.delete_remote(EntityId::new(*id));
            }
            Op::LocalPut(id, byte) => {
                let _ = engine.mutate(EntityId::new(*id), Change::Put(vec![*byte]));
            }
            Op::LocalDelete(id) => {
                let _ = engine.mutate(EntityId::new(*id), Change::Delete);
            }
            Op::Refresh => {
                let _ = engine.ensure_fresh(Freshness::Force);
            }
            Op::Flush => {
                let _ = engine.flush_pending();
            }
            Op::Discard(id) => {
                let _ = engine.discard_pending(EntityId::new(*id));
            }
            Op::Rebase(id) => {
                let _ = engine.rebase_pending(EntityId::new(*id));
            }
            Op::SetReachable(reachable) => remote.set_reachable(*reachable),
        }

        let now = engine.store().cursor().unwrap();
        assert!(now >= cursor, "cursor moved back from {cursor} to {now}");
        cursor = now;
    }

    (remote, engine)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn invariants_hold_after_any_sequence(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let (_, engine) = run(&ops);

        let report = engine.verify().unwrap();
        prop_assert!(report.is_ok(), "{:?}", report.problems);

        let ids: Vec<_> = snapshot(engine.store()).into_iter().map(|r| r.0).collect();
        prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn settled_refresh_is_idempotent(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let (remote, engine) = run(&ops);
        remote.set_reachable(true);

        engine.ensure_fresh(Freshness::Force).unwrap();
        engine.ensure_fresh(Freshness::Force).unwrap();
        let settled = snapshot(engine.store());
        let cursor = engine.store().cursor().unwrap();

        engine.ensure_fresh(Freshness::Force).unwrap();
        prop_assert_eq!(snapshot(engine.store()), settled);
        prop_assert_eq!(engine.store().cursor().unwrap(), cursor);
    }

    #[test]
    fn pending_mutations_are_never_lost_to_remote_updates(
        payload in any::<u8>(),
        updates in 1usize..5,
    ) {
        let remote = Arc::new(MockRemote::new());
        remote.upsert_remote(EntityId::new(1), vec![0]);
        let engine = SyncEngine::new(
            SyncConfig::new().with_retry(RetryPolicy::no_retry()),
            MemoryStore::in_memory(),
            Arc::clone(&remote),
        );
        engine.ensure_fresh(Freshness::Force).unwrap();

        remote.set_reachable(false);
        engine.mutate(EntityId::new(1), Change::Put(vec![payload])).unwrap();
        remote.set_reachable(true);
        for n in 0..updates {
            remote.upsert_remote(EntityId::new(1), vec![n as u8, 0xEE]);
            engine.ensure_fresh(Freshness::Force).unwrap();
        }

        let record = engine.read(EntityId::new(1)).unwrap();
        prop_assert_eq!(record.payload, vec![payload]);
        prop_assert!(record.dirty);
        prop_assert_eq!(engine.pending().unwrap().len(), 1);
    }
}
