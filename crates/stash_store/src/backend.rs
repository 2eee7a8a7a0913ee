//! Byte-level storage backend beneath the commit log.

use crate::error::StoreResult;

/// An append-only byte store holding the commit log.
///
/// Backends do not interpret what they hold; framing, checksums and replay
/// belong to [`crate::log`].
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - after `sync` returns, every appended byte survives process termination
/// - `replace` is all-or-nothing: a crash leaves either the old or the new
///   contents, never a mix
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends past the current size or an
    /// I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StoreResult<Vec<u8>>;

    /// Appends data to the end of the storage and returns its offset.
    fn append(&mut self, data: &[u8]) -> StoreResult<u64>;

    /// Returns the current size in bytes.
    fn size(&self) -> StoreResult<u64>;

    /// Makes every appended byte durable.
    fn sync(&mut self) -> StoreResult<()>;

    /// Drops everything after `new_size`.
    ///
    /// Used to cut a torn frame off the end of the log during recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size.
    fn truncate(&mut self, new_size: u64) -> StoreResult<()>;

    /// Atomically replaces the whole contents with `data`.
    ///
    /// Used by log compaction.
    fn replace(&mut self, data: &[u8]) -> StoreResult<()>;
}
