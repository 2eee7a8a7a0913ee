//! Core identifier and record types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Version marker of a remote entity.
///
/// Versions are assigned by the remote service and grow monotonically per
/// entity. `0` means "never confirmed by the remote".
pub type Version = u64;

/// Stable identifier of a remote-owned entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Creates an entity ID from its numeric value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Position in the remote's ordered change stream.
///
/// The cursor records the last change that has been durably applied to the
/// local store. It only ever moves forward.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SyncCursor(u64);

impl SyncCursor {
    /// The cursor of a store that has processed nothing yet.
    pub const START: SyncCursor = SyncCursor(0);

    /// Creates a cursor at the given stream position.
    #[must_use]
    pub const fn new(position: u64) -> Self {
        Self(position)
    }

    /// Returns the stream position.
    #[must_use]
    pub const fn position(self) -> u64 {
        self.0
    }

    /// Returns true if this cursor is at the start of the stream.
    #[must_use]
    pub const fn is_start(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque token that makes a retried mutation apply at most once remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyToken(Uuid);

impl IdempotencyToken {
    /// Generates a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A remote-owned record as reported by the change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier.
    pub id: EntityId,
    /// Remote version of this state.
    pub version: Version,
    /// Opaque payload.
    #[serde(with = "payload_bytes")]
    pub payload: Vec<u8>,
    /// True if the remote confirmed the entity as deleted.
    #[serde(default)]
    pub deleted: bool,
}

impl Entity {
    /// Creates a live entity.
    pub fn new(id: EntityId, version: Version, payload: Vec<u8>) -> Self {
        Self {
            id,
            version,
            payload,
            deleted: false,
        }
    }

    /// Creates a deletion marker.
    pub fn deleted(id: EntityId, version: Version) -> Self {
        Self {
            id,
            version,
            payload: Vec::new(),
            deleted: true,
        }
    }
}

/// A locally requested change to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    /// Create the entity or replace its payload.
    Put(#[serde(with = "payload_bytes")] Vec<u8>),
    /// Delete the entity.
    Delete,
}

impl Change {
    /// Returns true for deletions.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self, Change::Delete)
    }

    /// Returns the payload of a put.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Change::Put(payload) => Some(payload),
            Change::Delete => None,
        }
    }
}

/// Serde adapter that encodes payloads as CBOR byte strings instead of
/// integer arrays. Use with `#[serde(with = "stash_protocol::payload_bytes")]`.
pub mod payload_bytes {
    use serde::de::{Error, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    /// Upper bound on the capacity reserved from a length read off the wire.
    const MAX_PREALLOC: usize = 4096;

    /// Serializes a payload as a byte string.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    /// Deserializes a payload from a byte string or a byte sequence.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte string")
            }

            fn visit_bytes<E: Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(v)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(MAX_PREALLOC));
                while let Some(byte) = seq.next_element::<u8>()? {
                    out.push(byte);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_byte_buf(BytesVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_parses_and_displays() {
        let id: EntityId = " 42 ".parse().unwrap();
        assert_eq!(id, EntityId::new(42));
        assert_eq!(id.to_string(), "42");
        assert!("abc".parse::<EntityId>().is_err());
    }

    #[test]
    fn cursor_ordering() {
        assert!(SyncCursor::START.is_start());
        assert!(SyncCursor::new(3) > SyncCursor::new(2));
        assert_eq!(SyncCursor::default(), SyncCursor::START);
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(IdempotencyToken::generate(), IdempotencyToken::generate());
    }

    #[test]
    fn change_accessors() {
        assert!(Change::Delete.is_delete());
        assert_eq!(Change::Put(b"x".to_vec()).payload(), Some(&b"x"[..]));
        assert_eq!(Change::Delete.payload(), None);
    }

    #[test]
    fn deleted_entity_has_no_payload() {
        let entity = Entity::deleted(EntityId::new(1), 7);
        assert!(entity.deleted);
        assert!(entity.payload.is_empty());
    }
}
