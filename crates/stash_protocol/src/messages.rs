//! Wire messages for the change feed and mutation endpoints.

use crate::codec::{decode, encode};
use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Change, Entity, EntityId, IdempotencyToken, SyncCursor, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Request for the next page of the change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Last position the client has durably applied.
    pub cursor: SyncCursor,
    /// Maximum number of entities to return.
    pub limit: u32,
}

impl FetchRequest {
    /// Creates a new fetch request.
    pub fn new(cursor: SyncCursor, limit: u32) -> Self {
        Self { cursor, limit }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// One page of the change feed, in stream order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchPage {
    /// Changed entities, ordered by stream position.
    pub entities: Vec<Entity>,
    /// Cursor to persist once this page has been applied.
    pub next_cursor: SyncCursor,
    /// Whether more pages follow `next_cursor`.
    pub has_more: bool,
}

impl FetchPage {
    /// Creates a page.
    pub fn new(entities: Vec<Entity>, next_cursor: SyncCursor, has_more: bool) -> Self {
        Self {
            entities,
            next_cursor,
            has_more,
        }
    }

    /// Creates an empty final page that keeps the cursor where it is.
    pub fn empty(cursor: SyncCursor) -> Self {
        Self::new(Vec::new(), cursor, false)
    }

    /// Checks the page against the cursor it was requested with.
    ///
    /// A page must never move the cursor backwards, and a page that claims
    /// more data must move it forwards, otherwise the client would loop.
    /// Each entity appears at most once per page.
    pub fn validate(&self, requested: SyncCursor) -> ProtocolResult<()> {
        let mut seen = BTreeSet::new();
        if let Some(entity) = self.entities.iter().find(|e| !seen.insert(e.id)) {
            return Err(ProtocolError::invalid(format!(
                "entity {} appears twice in one page",
                entity.id
            )));
        }
        if self.next_cursor < requested {
            return Err(ProtocolError::invalid(format!(
                "page cursor {} is behind requested cursor {}",
                self.next_cursor, requested
            )));
        }
        if self.has_more && self.next_cursor == requested {
            return Err(ProtocolError::invalid(format!(
                "page reports more data without advancing past cursor {requested}"
            )));
        }
        Ok(())
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// A locally originated mutation submitted to the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRequest {
    /// Token the remote uses to deduplicate retried submissions.
    pub token: IdempotencyToken,
    /// Target entity.
    pub entity_id: EntityId,
    /// Version the change was made against (`0` for creations).
    pub base_version: Version,
    /// The change itself.
    pub change: Change,
}

impl MutationRequest {
    /// Creates a mutation request.
    pub fn new(
        token: IdempotencyToken,
        entity_id: EntityId,
        base_version: Version,
        change: Change,
    ) -> Self {
        Self {
            token,
            entity_id,
            base_version,
            change,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// Successful mutation response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationAccepted {
    /// Version the remote assigned to the new state.
    pub version: Version,
}

impl MutationAccepted {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// Body of a stale-version rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictBody {
    /// The entity's version on the remote.
    pub current_version: Version,
}

impl ConflictBody {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_validation() {
        let at = SyncCursor::new(10);

        assert!(FetchPage::new(vec![], SyncCursor::new(12), true)
            .validate(at)
            .is_ok());
        assert!(FetchPage::empty(at).validate(at).is_ok());

        let backwards = FetchPage::new(vec![], SyncCursor::new(9), false);
        assert!(matches!(backwards.validate(at), Err(ProtocolError::Invalid(_))));

        let stuck = FetchPage::new(vec![], at, true);
        assert!(stuck.validate(at).is_err());
    }

    #[test]
    fn repeated_entity_in_page_is_invalid() {
        let at = SyncCursor::new(10);
        let page = FetchPage::new(
            vec![
                Entity::new(EntityId::new(4), 1, b"a".to_vec()),
                Entity::new(EntityId::new(5), 1, b"b".to_vec()),
                Entity::new(EntityId::new(4), 2, b"c".to_vec()),
            ],
            SyncCursor::new(13),
            false,
        );
        assert!(matches!(page.validate(at), Err(ProtocolError::Invalid(_))));
    }

    #[test]
    fn oversized_payload_length_is_a_decode_error() {
        let page = FetchPage::new(
            vec![Entity::new(EntityId::new(1), 1, vec![7])],
            SyncCursor::new(1),
            false,
        );
        let bytes = page.encode().unwrap();

        // Replace the one-byte string `41 07` with an array header claiming
        // 2^40 elements followed by the single element present.
        let at = bytes
            .windows(2)
            .position(|w| w == [0x41, 0x07])
            .unwrap();
        let mut forged = bytes[..at].to_vec();
        forged.push(0x9b);
        forged.extend_from_slice(&(1u64 << 40).to_be_bytes());
        forged.push(0x07);
        forged.extend_from_slice(&bytes[at + 2..]);

        assert!(matches!(
            FetchPage::decode(&forged),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn mutation_request_encoding() {
        let request = MutationRequest::new(
            IdempotencyToken::generate(),
            EntityId::new(7),
            3,
            Change::Put(vec![1, 2, 3]),
        );
        let decoded = MutationRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn page_with_tombstone_encoding() {
        let page = FetchPage::new(
            vec![
                Entity::new(EntityId::new(1), 2, b"a".to_vec()),
                Entity::deleted(EntityId::new(2), 5),
            ],
            SyncCursor::new(2),
            false,
        );
        let decoded = FetchPage::decode(&page.encode().unwrap()).unwrap();
        assert!(decoded.entities[1].deleted);
        assert_eq!(decoded.next_cursor, SyncCursor::new(2));
    }
}
