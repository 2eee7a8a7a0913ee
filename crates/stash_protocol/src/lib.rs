//! # Stash Protocol
//!
//! Shared data model and wire messages for Stash.
//!
//! This crate provides:
//! - Identifier and ordering types (`EntityId`, `Version`, `SyncCursor`)
//! - `Entity` as it exists on the remote service
//! - `Change` and `IdempotencyToken` for locally originated mutations
//! - Request/response messages for the change feed and mutation endpoints
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod messages;
mod types;

pub use codec::{decode, encode};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{ConflictBody, FetchPage, FetchRequest, MutationAccepted, MutationRequest};
pub use types::{payload_bytes, Change, Entity, EntityId, IdempotencyToken, SyncCursor, Version};
