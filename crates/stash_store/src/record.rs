//! Local records, pending mutations and scan filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stash_protocol::{
    payload_bytes, Change, Entity, EntityId, IdempotencyToken, MutationRequest, SyncCursor,
    Version,
};

/// Where a local record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Observed on the remote at least once.
    Remote,
    /// Created locally and never confirmed by the remote.
    Local,
}

impl Origin {
    /// Returns a short lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Origin::Remote => "remote",
            Origin::Local => "local",
        }
    }
}

/// The remote-confirmed view of a record, kept while it is dirty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseView {
    /// Confirmed payload.
    #[serde(with = "payload_bytes")]
    pub payload: Vec<u8>,
    /// Whether the confirmed state was a deletion.
    pub tombstone: bool,
}

/// The locally persisted copy of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRecord {
    /// Entity identifier.
    pub id: EntityId,
    /// Current payload, including unconfirmed local changes.
    #[serde(with = "payload_bytes")]
    pub payload: Vec<u8>,
    /// Remote version this record was last reconciled with (`0` if never).
    pub last_synced_version: Version,
    /// Whether the remote has ever confirmed this record.
    pub origin: Origin,
    /// True while a pending mutation exists for this record.
    pub dirty: bool,
    /// True if the record is deleted (remote-confirmed or locally pending).
    pub tombstone: bool,
    /// Confirmed view saved when the record became dirty.
    #[serde(default)]
    pub base: Option<BaseView>,
    /// Remote update held back while the record is dirty.
    #[serde(default)]
    pub staged: Option<Entity>,
    /// Last time this record changed locally.
    pub updated_at: DateTime<Utc>,
}

impl LocalRecord {
    /// Creates a record from an entity observed on the remote.
    pub fn from_remote(entity: &Entity, now: DateTime<Utc>) -> Self {
        Self {
            id: entity.id,
            payload: entity.payload.clone(),
            last_synced_version: entity.version,
            origin: Origin::Remote,
            dirty: false,
            tombstone: entity.deleted,
            base: None,
            staged: None,
            updated_at: now,
        }
    }

    /// Creates a record for an entity first created by a local put.
    pub fn new_local(id: EntityId, payload: Vec<u8>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            payload,
            last_synced_version: 0,
            origin: Origin::Local,
            dirty: true,
            tombstone: false,
            base: None,
            staged: None,
            updated_at: now,
        }
    }

    /// Returns true if the record is readable (not tombstoned).
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.tombstone
    }

    /// Overwrites the record with remote state.
    pub fn apply_remote(&mut self, entity: &Entity, now: DateTime<Utc>) {
        self.payload = entity.payload.clone();
        self.last_synced_version = entity.version;
        self.tombstone = entity.deleted;
        self.origin = Origin::Remote;
        self.updated_at = now;
    }

    /// Applies a local change and marks the record dirty.
    ///
    /// The confirmed view is saved the first time a clean record changes so a
    /// later discard can restore it.
    pub fn apply_local(&mut self, change: &Change, now: DateTime<Utc>) {
        if !self.dirty && self.origin == Origin::Remote {
            self.base = Some(BaseView {
                payload: self.payload.clone(),
                tombstone: self.tombstone,
            });
        }
        match change {
            Change::Put(payload) => {
                self.payload = payload.clone();
                self.tombstone = false;
            }
            Change::Delete => {
                self.payload.clear();
                self.tombstone = true;
            }
        }
        self.dirty = true;
        self.updated_at = now;
    }

    /// Holds a remote update back until the pending mutation resolves.
    ///
    /// Only the newest staged version is kept.
    pub fn stage(&mut self, entity: &Entity) {
        let newer = self
            .staged
            .as_ref()
            .map_or(true, |staged| entity.version > staged.version);
        if newer {
            self.staged = Some(entity.clone());
        }
    }

    /// Marks the pending mutation as accepted at `version`.
    ///
    /// A staged update newer than the accepted version is applied on top;
    /// older ones are dropped.
    pub fn confirm(&mut self, version: Version, now: DateTime<Utc>) {
        self.dirty = false;
        self.base = None;
        self.origin = Origin::Remote;
        self.last_synced_version = self.last_synced_version.max(version);
        self.updated_at = now;
        if let Some(staged) = self.staged.take() {
            if staged.version > self.last_synced_version {
                self.apply_remote(&staged, now);
            }
        }
    }

    /// Drops the local intent and returns to the latest confirmed state.
    ///
    /// A staged remote update wins over the saved base. A record that was
    /// never confirmed becomes a tombstone.
    pub fn discard(&mut self, now: DateTime<Utc>) {
        if let Some(staged) = self.staged.take() {
            self.apply_remote(&staged, now);
        } else if let Some(base) = self.base.take() {
            self.payload = base.payload;
            self.tombstone = base.tombstone;
        } else if self.origin == Origin::Local {
            self.payload.clear();
            self.tombstone = true;
        }
        self.base = None;
        self.dirty = false;
        self.updated_at = now;
    }

    /// Accepts the staged remote version as the new base of the local intent.
    ///
    /// Returns the version the pending mutation should now be based on.
    pub fn rebase(&mut self, now: DateTime<Utc>) -> Version {
        if let Some(staged) = self.staged.take() {
            self.last_synced_version = staged.version;
            self.origin = Origin::Remote;
            self.base = Some(BaseView {
                payload: staged.payload,
                tombstone: staged.deleted,
            });
            self.updated_at = now;
        }
        self.last_synced_version
    }

    /// Returns the size of the payload in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// A locally committed change awaiting remote confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Target entity.
    pub entity_id: EntityId,
    /// Token the remote uses to deduplicate submissions.
    pub token: IdempotencyToken,
    /// The requested change.
    pub change: Change,
    /// Remote version the change was made against.
    pub base_version: Version,
    /// Enqueue order, assigned by the store on commit.
    #[serde(default)]
    pub seq: u64,
    /// A submission reached the remote without a definite answer.
    #[serde(default)]
    pub submitted: bool,
    /// When the change was made.
    pub created_at: DateTime<Utc>,
}

impl PendingMutation {
    /// Creates a pending mutation with a fresh idempotency token.
    pub fn new(
        entity_id: EntityId,
        change: Change,
        base_version: Version,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id,
            token: IdempotencyToken::generate(),
            change,
            base_version,
            seq: 0,
            submitted: false,
            created_at: now,
        }
    }

    /// Builds the wire request for this mutation.
    #[must_use]
    pub fn to_request(&self) -> MutationRequest {
        MutationRequest::new(
            self.token,
            self.entity_id,
            self.base_version,
            self.change.clone(),
        )
    }
}

/// Selects records during a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// Include tombstoned records.
    pub include_tombstones: bool,
    /// Only records with a pending mutation.
    pub dirty_only: bool,
    /// Only records of this origin.
    pub origin: Option<Origin>,
    /// Lowest identifier to return (inclusive).
    pub min_id: Option<EntityId>,
    /// Highest identifier to return (inclusive).
    pub max_id: Option<EntityId>,
}

impl ScanFilter {
    /// A filter matching every live record.
    #[must_use]
    pub fn live() -> Self {
        Self::default()
    }

    /// A filter matching every record, tombstones included.
    #[must_use]
    pub fn all() -> Self {
        Self {
            include_tombstones: true,
            ..Self::default()
        }
    }

    /// Restricts the scan to dirty records.
    #[must_use]
    pub fn dirty(mut self) -> Self {
        self.dirty_only = true;
        self
    }

    /// Restricts the scan to one origin.
    #[must_use]
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Restricts the scan to an identifier range.
    #[must_use]
    pub fn with_range(mut self, min: Option<EntityId>, max: Option<EntityId>) -> Self {
        self.min_id = min;
        self.max_id = max;
        self
    }

    /// Returns true if the record passes the filter.
    #[must_use]
    pub fn matches(&self, record: &LocalRecord) -> bool {
        if record.tombstone && !self.include_tombstones {
            return false;
        }
        if self.dirty_only && !record.dirty {
            return false;
        }
        if self.origin.is_some_and(|origin| origin != record.origin) {
            return false;
        }
        if self.min_id.is_some_and(|min| record.id < min) {
            return false;
        }
        if self.max_id.is_some_and(|max| record.id > max) {
            return false;
        }
        true
    }
}

/// Aggregate counts over the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    /// Live records.
    pub records: usize,
    /// Tombstoned records.
    pub tombstones: usize,
    /// Records with a pending mutation.
    pub dirty: usize,
    /// Queued pending mutations.
    pub pending: usize,
    /// Records holding a staged remote update.
    pub staged: usize,
    /// Payload bytes held by live records.
    pub payload_bytes: u64,
    /// Persisted sync cursor.
    pub cursor: SyncCursor,
    /// Completion time of the last full sync pass.
    pub last_full_sync: Option<DateTime<Utc>>,
}
