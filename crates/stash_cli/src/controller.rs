//! Translates CLI intents into sync engine calls.

use crate::format::{
    render, CompactionView, DiscardView, ListView, MutationView, OutputFormat, PendingRow,
    PendingView, RecordDetail, RecordView, UsageView,
};
use stash_protocol::{Change, EntityId};
use stash_remote::RemoteClient;
use stash_store::{LocalStore, ScanFilter};
use stash_sync::{ErrorClass, FlushReport, Freshness, SyncEngine, SyncError};
use std::time::Duration;
use thiserror::Error;

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The command succeeded.
    Success,
    /// Unexpected internal failure.
    Unexpected,
    /// Bad arguments or configuration.
    Usage,
    /// The remote failed or could not be reached.
    Remote,
    /// The local store failed or is locked.
    Store,
    /// A local change conflicts with the remote.
    Conflict,
    /// The entity does not exist.
    NotFound,
}

impl ExitStatus {
    /// Returns the numeric exit code.
    pub const fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Unexpected => 1,
            ExitStatus::Usage => 2,
            ExitStatus::Remote => 3,
            ExitStatus::Store => 4,
            ExitStatus::Conflict => 5,
            ExitStatus::NotFound => 6,
        }
    }
}

/// Errors surfaced by the controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Engine failure.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid command input.
    #[error("invalid input: {0}")]
    Input(String),

    /// Output could not be rendered.
    #[error("render error: {0}")]
    Render(#[from] serde_json::Error),
}

impl ControllerError {
    /// Maps the error to a process exit status.
    pub fn status(&self) -> ExitStatus {
        match self {
            ControllerError::Sync(SyncError::Store(_)) => ExitStatus::Store,
            ControllerError::Sync(err) => match err.class() {
                ErrorClass::NotFound => ExitStatus::NotFound,
                ErrorClass::Conflict => ExitStatus::Conflict,
                ErrorClass::Retryable | ErrorClass::Fatal => ExitStatus::Remote,
                ErrorClass::LockBusy => ExitStatus::Store,
            },
            ControllerError::Config(_) | ControllerError::Input(_) => ExitStatus::Usage,
            ControllerError::Render(_) => ExitStatus::Unexpected,
        }
    }

    /// Suggests what the user can do next, if anything.
    pub fn hint(&self) -> Option<String> {
        match self {
            ControllerError::Sync(SyncError::Conflict { id, .. }) => Some(format!(
                "your change is kept; run `stash resolve {id} --keep-local` to reapply it \
                 on the remote version, or `stash resolve {id} --discard` to drop it"
            )),
            ControllerError::Sync(SyncError::LockBusy) => {
                Some("another stash process is using this store".to_string())
            }
            ControllerError::Sync(SyncError::Retryable(_)) => {
                Some("check --host and your network connection".to_string())
            }
            _ => None,
        }
    }
}

/// Result type for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Rendered command output and the status to exit with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Text for stdout.
    pub body: String,
    /// Exit status.
    pub status: ExitStatus,
}

impl Output {
    /// Successful output.
    pub fn ok(body: String) -> Self {
        Self {
            body,
            status: ExitStatus::Success,
        }
    }

    fn with_status(mut self, status: ExitStatus) -> Self {
        self.status = status;
        self
    }
}

/// Controller options.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Refresh before reads when the last full sync is older than this.
    pub max_age: Duration,
    /// Account quota for `usage`.
    pub quota_bytes: Option<u64>,
    /// Output format.
    pub format: OutputFormat,
    /// Never refresh before reads.
    pub offline: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(crate::config::DEFAULT_MAX_AGE_SECS),
            quota_bytes: None,
            format: OutputFormat::Text,
            offline: false,
        }
    }
}

/// Options for `list`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Include deleted records.
    pub all: bool,
    /// Only records with a pending change.
    pub dirty: bool,
    /// Start after this identifier.
    pub after: Option<EntityId>,
    /// Stop after this many records.
    pub limit: Option<usize>,
}

/// How to settle a pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Reapply the local change on top of the latest remote version.
    KeepLocal,
    /// Drop the local change.
    Discard,
}

const UNREACHABLE_NOTE: &str = "remote unreachable, showing cached data";

/// Runs user commands against a sync engine.
pub struct Controller<S: LocalStore, R: RemoteClient> {
    engine: SyncEngine<S, R>,
    options: ControllerOptions,
}

impl<S: LocalStore, R: RemoteClient> Controller<S, R> {
    /// Creates a controller.
    pub fn new(engine: SyncEngine<S, R>, options: ControllerOptions) -> Self {
        Self { engine, options }
    }

    /// Checks that the store is readable and logs its state.
    pub fn init(&self) -> ControllerResult<()> {
        let summary = self.engine.status()?.summary;
        tracing::debug!(
            records = summary.records,
            pending = summary.pending,
            cursor = %summary.cursor,
            "store opened"
        );
        if summary.last_full_sync.is_none() {
            tracing::info!("store has not completed a full sync yet");
        }
        if summary.pending > 0 {
            tracing::info!(pending = summary.pending, "local changes await the remote");
        }
        Ok(())
    }

    /// Refreshes a stale store before a read.
    ///
    /// Returns a note when the remote could not be reached and cached data
    /// is served instead.
    fn refresh_for_read(&self) -> ControllerResult<Option<String>> {
        if self.options.offline {
            return Ok(None);
        }
        match self.engine.ensure_fresh(Freshness::MaxAge(self.options.max_age)) {
            Ok(report) => {
                if !report.flush.conflicts.is_empty() {
                    tracing::warn!(
                        conflicts = report.flush.conflicts.len(),
                        "pending changes conflict with the remote; see `stash pending`"
                    );
                }
                Ok(None)
            }
            Err(err) if err.class() == ErrorClass::Retryable => {
                tracing::warn!(error = %err, "refresh failed, serving cached data");
                Ok(Some(UNREACHABLE_NOTE.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn render<T: serde::Serialize + crate::format::Render>(
        &self,
        value: &T,
    ) -> ControllerResult<Output> {
        Ok(Output::ok(render(value, self.options.format)?))
    }

    /// Lists local records.
    pub fn list(&self, options: ListOptions) -> ControllerResult<Output> {
        let note = self.refresh_for_read()?;

        let mut filter = if options.all {
            ScanFilter::all()
        } else {
            ScanFilter::live()
        };
        if options.dirty {
            filter = filter.dirty();
        }

        let limit = options.limit.unwrap_or(usize::MAX);
        let mut iter = self.engine.list_after(filter, options.after);
        let mut records = Vec::new();
        for record in iter.by_ref().take(limit) {
            records.push(RecordView::from(&record?));
        }
        let next_after = if records.len() == limit {
            let resume = iter.resume_point();
            match iter.next() {
                Some(next) => {
                    next?;
                    resume
                }
                None => None,
            }
        } else {
            None
        };

        self.render(&ListView {
            records,
            next_after,
            note,
        })
    }

    /// Shows one record.
    pub fn get(&self, id: EntityId) -> ControllerResult<Output> {
        let note = self.refresh_for_read()?;
        let record = self.engine.read(id)?;
        self.render(&RecordDetail {
            record: RecordView::from(&record),
            note,
        })
    }

    /// Creates or replaces a record.
    pub fn put(&self, id: EntityId, payload: Vec<u8>) -> ControllerResult<Output> {
        let outcome = self.engine.mutate(id, Change::Put(payload))?;
        self.render(&MutationView { id, outcome })
    }

    /// Deletes a record.
    pub fn delete(&self, id: EntityId) -> ControllerResult<Output> {
        let outcome = self.engine.mutate(id, Change::Delete)?;
        self.render(&MutationView { id, outcome })
    }

    /// Runs a full sync pass regardless of freshness.
    pub fn sync(&self) -> ControllerResult<Output> {
        let report = self.engine.ensure_fresh(Freshness::Force)?;
        let status = flush_status(&report.flush);
        Ok(self.render(&report)?.with_status(status))
    }

    /// Submits pending changes without pulling.
    pub fn flush(&self) -> ControllerResult<Output> {
        let report = self.engine.flush_pending()?;
        let status = flush_status(&report);
        Ok(self.render(&report)?.with_status(status))
    }

    /// Settles the pending change for `id`.
    pub fn resolve(&self, id: EntityId, resolution: Resolution) -> ControllerResult<Output> {
        match resolution {
            Resolution::KeepLocal => {
                let outcome = self.engine.rebase_pending(id)?;
                self.render(&MutationView { id, outcome })
            }
            Resolution::Discard => {
                let record = self.engine.discard_pending(id)?;
                self.render(&DiscardView {
                    record: RecordView::from(&record),
                })
            }
        }
    }

    /// Lists pending changes in submission order.
    pub fn pending(&self) -> ControllerResult<Output> {
        let mutations = self
            .engine
            .pending()?
            .iter()
            .map(PendingRow::from)
            .collect();
        self.render(&PendingView { mutations })
    }

    /// Shows store counts and engine state.
    pub fn status(&self) -> ControllerResult<Output> {
        let status = self.engine.status()?;
        self.render(&status)
    }

    /// Reports storage used by live records.
    pub fn usage(&self) -> ControllerResult<Output> {
        let note = self.refresh_for_read()?;
        let summary = self.engine.status()?.summary;
        let mut view = UsageView::new(
            summary.payload_bytes,
            self.options.quota_bytes,
            summary.records,
        );
        view.note = note;
        self.render(&view)
    }

    /// Checks store invariants.
    pub fn verify(&self) -> ControllerResult<Output> {
        let report = self.engine.verify()?;
        let status = if report.is_ok() {
            ExitStatus::Success
        } else {
            ExitStatus::Store
        };
        Ok(self.render(&report)?.with_status(status))
    }

    /// Rewrites the store log.
    pub fn compact(&self) -> ControllerResult<Output> {
        let compaction = self.engine.compact()?;
        tracing::info!(
            before = compaction.bytes_before,
            after = compaction.bytes_after,
            "store compacted"
        );
        self.render(&CompactionView::from(compaction))
    }

    /// Closes the store and releases its lock.
    pub fn close(&self) -> ControllerResult<()> {
        Ok(self.engine.close()?)
    }
}

fn flush_status(report: &FlushReport) -> ExitStatus {
    if !report.conflicts.is_empty() {
        ExitStatus::Conflict
    } else if !report.failed.is_empty() || report.interrupted {
        ExitStatus::Remote
    } else {
        ExitStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stash_remote::{MockRemote, RetryPolicy};
    use stash_store::MemoryStore;
    use stash_sync::SyncConfig;
    use std::sync::Arc;

    type TestController = Controller<MemoryStore, Arc<MockRemote>>;

    fn id(n: u64) -> EntityId {
        EntityId::new(n)
    }

    fn controller(remote: &Arc<MockRemote>, format: OutputFormat) -> TestController {
        let config = SyncConfig::new()
            .with_page_size(2)
            .with_retry(RetryPolicy::no_retry());
        let engine = SyncEngine::new(config, MemoryStore::in_memory(), Arc::clone(remote));
        Controller::new(
            engine,
            ControllerOptions {
                format,
                quota_bytes: Some(1024),
                ..ControllerOptions::default()
            },
        )
    }

    fn json(output: &Output) -> serde_json::Value {
        serde_json::from_str(&output.body).unwrap()
    }

    fn seeded_remote(count: u64) -> Arc<MockRemote> {
        let remote = Arc::new(MockRemote::new());
        for n in 1..=count {
            remote.upsert_remote(id(n), format!("item-{n}").into_bytes());
        }
        remote
    }

    #[test]
    fn list_refreshes_a_new_store() {
        let remote = seeded_remote(3);
        let ctl = controller(&remote, OutputFormat::Json);
        ctl.init().unwrap();

        let output = ctl.list(ListOptions::default()).unwrap();

        assert_eq!(output.status, ExitStatus::Success);
        let value = json(&output);
        assert_eq!(value["records"].as_array().unwrap().len(), 3);
        assert_eq!(value["records"][0]["payload"], "item-1");
        assert!(value["note"].is_null());
    }

    #[test]
    fn fresh_store_is_not_refreshed_again() {
        let remote = seeded_remote(2);
        let ctl = controller(&remote, OutputFormat::Text);
        ctl.list(ListOptions::default()).unwrap();
        let fetches = remote.fetch_log().len();

        ctl.get(id(1)).unwrap();
        ctl.usage().unwrap();

        assert_eq!(remote.fetch_log().len(), fetches);
    }

    #[test]
    fn unreachable_remote_serves_cached_data() {
        let remote = Arc::new(MockRemote::new());
        remote.set_reachable(false);
        let ctl = controller(&remote, OutputFormat::Text);

        let output = ctl.list(ListOptions::default()).unwrap();

        assert_eq!(output.status, ExitStatus::Success);
        assert!(output.body.starts_with("note: remote unreachable"));
    }

    #[test]
    fn list_limit_reports_where_to_continue() {
        let remote = seeded_remote(5);
        let ctl = controller(&remote, OutputFormat::Json);

        let first = json(
            &ctl.list(ListOptions {
                limit: Some(2),
                ..ListOptions::default()
            })
            .unwrap(),
        );
        assert_eq!(first["next_after"], 2);

        let rest = json(
            &ctl.list(ListOptions {
                after: Some(id(2)),
                ..ListOptions::default()
            })
            .unwrap(),
        );
        assert_eq!(rest["records"].as_array().unwrap().len(), 3);
        assert!(rest["next_after"].is_null());
    }

    #[test]
    fn exact_limit_has_no_continuation() {
        let remote = seeded_remote(2);
        let ctl = controller(&remote, OutputFormat::Json);
        let value = json(
            &ctl.list(ListOptions {
                limit: Some(2),
                ..ListOptions::default()
            })
            .unwrap(),
        );
        assert!(value["next_after"].is_null());
    }

    #[test]
    fn put_while_offline_is_pending_then_flushed() {
        let remote = Arc::new(MockRemote::new());
        remote.set_reachable(false);
        let ctl = controller(&remote, OutputFormat::Text);

        let output = ctl.put(id(9), b"nine".to_vec()).unwrap();
        assert!(output.body.contains("saved locally"));
        assert!(ctl.pending().unwrap().body.contains("put"));

        remote.set_reachable(true);
        let output = ctl.flush().unwrap();
        assert_eq!(output.status, ExitStatus::Success);
        assert!(output.body.contains("confirmed  9 -> v1"));
        assert_eq!(ctl.pending().unwrap().body, "no pending changes");
    }

    #[test]
    fn conflict_maps_to_exit_five_with_hint() {
        let remote = seeded_remote(1);
        let ctl = controller(&remote, OutputFormat::Text);
        ctl.sync().unwrap();
        remote.upsert_remote(id(1), b"remote edit".to_vec());

        let err = ctl.put(id(1), b"local edit".to_vec()).unwrap_err();

        assert_eq!(err.status(), ExitStatus::Conflict);
        assert_eq!(err.status().code(), 5);
        assert!(err.hint().unwrap().contains("stash resolve 1"));
    }

    #[test]
    fn sync_with_conflicts_exits_with_conflict() {
        let remote = seeded_remote(1);
        let ctl = controller(&remote, OutputFormat::Text);
        ctl.sync().unwrap();
        remote.set_reachable(false);
        ctl.put(id(1), b"local".to_vec()).unwrap();
        remote.set_reachable(true);
        remote.upsert_remote(id(1), b"remote".to_vec());

        let output = ctl.sync().unwrap();

        assert_eq!(output.status, ExitStatus::Conflict);
        assert!(output.body.contains("conflict   1"));
    }

    #[test]
    fn resolve_keep_local_and_discard() {
        let remote = seeded_remote(2);
        let ctl = controller(&remote, OutputFormat::Json);
        ctl.sync().unwrap();
        remote.upsert_remote(id(1), b"remote-1".to_vec());
        remote.upsert_remote(id(2), b"remote-2".to_vec());
        assert!(ctl.put(id(1), b"mine-1".to_vec()).is_err());
        assert!(ctl.put(id(2), b"mine-2".to_vec()).is_err());

        let kept = json(&ctl.resolve(id(1), Resolution::KeepLocal).unwrap());
        assert!(kept["outcome"]["Confirmed"]["version"].is_u64());
        assert_eq!(remote.entity(id(1)).unwrap().payload, b"mine-1");

        let discarded = json(&ctl.resolve(id(2), Resolution::Discard).unwrap());
        assert_eq!(discarded["record"]["payload"], "remote-2");
        assert_eq!(remote.entity(id(2)).unwrap().payload, b"remote-2");

        assert!(json(&ctl.pending().unwrap())["mutations"]
            .as_array()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn missing_entity_is_not_found() {
        let remote = Arc::new(MockRemote::new());
        let ctl = controller(&remote, OutputFormat::Text);

        let err = ctl.get(id(42)).unwrap_err();
        assert_eq!(err.status(), ExitStatus::NotFound);

        let err = ctl.delete(id(42)).unwrap_err();
        assert_eq!(err.status().code(), 6);

        let err = ctl.resolve(id(42), Resolution::Discard).unwrap_err();
        assert_eq!(err.status(), ExitStatus::NotFound);
    }

    #[test]
    fn delete_of_unsynced_local_record_is_withdrawn() {
        let remote = Arc::new(MockRemote::new());
        remote.set_reachable(false);
        let ctl = controller(&remote, OutputFormat::Text);
        ctl.put(id(3), b"draft".to_vec()).unwrap();

        let output = ctl.delete(id(3)).unwrap();

        assert!(output.body.contains("removed before it reached the remote"));
        assert_eq!(remote.submissions(), 0);
    }

    #[test]
    fn usage_reports_against_quota() {
        let remote = Arc::new(MockRemote::new());
        remote.upsert_remote(id(1), vec![0; 512]);
        let ctl = controller(&remote, OutputFormat::Text);

        let output = ctl.usage().unwrap();

        assert!(output.body.contains("512 B of 1.0 KB used"));
        assert!(output.body.contains("1 records"));
    }

    #[test]
    fn status_verify_and_compact() {
        let remote = seeded_remote(4);
        let ctl = controller(&remote, OutputFormat::Json);
        ctl.sync().unwrap();

        let status = json(&ctl.status().unwrap());
        assert_eq!(status["summary"]["records"], 4);
        assert_eq!(status["state"], "Synced");

        let verify = ctl.verify().unwrap();
        assert_eq!(verify.status, ExitStatus::Success);
        assert!(json(&verify)["problems"].as_array().unwrap().is_empty());

        let compact = json(&ctl.compact().unwrap());
        assert!(compact["bytes_after"].is_u64());
    }

    #[test]
    fn offline_option_skips_refresh() {
        let remote = seeded_remote(2);
        let config = SyncConfig::new().with_retry(RetryPolicy::no_retry());
        let engine = SyncEngine::new(config, MemoryStore::in_memory(), Arc::clone(&remote));
        let ctl = Controller::new(
            engine,
            ControllerOptions {
                offline: true,
                ..ControllerOptions::default()
            },
        );

        let output = ctl.list(ListOptions::default()).unwrap();

        assert_eq!(output.body, "no records");
        assert!(remote.fetch_log().is_empty());
    }

    #[test]
    fn closed_controller_reports_store_failure() {
        let remote = Arc::new(MockRemote::new());
        let ctl = controller(&remote, OutputFormat::Text);
        ctl.close().unwrap();

        let err = ctl.status().unwrap_err();
        assert_eq!(err.status(), ExitStatus::Store);
    }
}
