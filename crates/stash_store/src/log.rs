//! Framed commit log.
//!
//! ## Frame format
//!
//! ```text
//! | magic (4) | length (4) | crc32 (4) | payload (length) |
//! ```
//!
//! - magic: `STSH`
//! - length: payload length, little-endian
//! - crc32: IEEE CRC32 over the length field and the payload
//! - payload: CBOR-encoded [`LogEntry`]
//!
//! ## Recovery
//!
//! A crash can only damage the frame being appended, so an invalid frame at
//! the very end of the log is a torn write and is cut off. An invalid frame
//! with more data behind it cannot come from a crash and is reported as
//! corruption.

use crate::backend::StorageBackend;
use crate::batch::WriteBatch;
use crate::error::{StoreError, StoreResult};
use crate::state::Snapshot;
use serde::{Deserialize, Serialize};

/// Magic bytes opening every frame.
pub const LOG_MAGIC: [u8; 4] = *b"STSH";

/// Size of the fixed frame header.
pub const HEADER_SIZE: usize = 12;

/// One entry of the commit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntry {
    /// An atomic batch of changes.
    Commit(WriteBatch),
    /// The full state, written by compaction.
    Snapshot(Snapshot),
}

/// Result of scanning the log at open.
#[derive(Debug, Default)]
pub struct Replay {
    /// Entries in log order.
    pub entries: Vec<LogEntry>,
    /// Length of the valid prefix of the log.
    pub valid_len: u64,
    /// True if a torn final frame follows the valid prefix.
    pub torn_tail: bool,
}

/// Encodes an entry as one frame.
pub fn encode_frame(entry: &LogEntry) -> StoreResult<Vec<u8>> {
    let payload = stash_protocol::encode(entry)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| StoreError::corrupted(format!("entry too large: {} bytes", payload.len())))?;
    let len_bytes = len.to_le_bytes();

    let mut crc_input = Vec::with_capacity(4 + payload.len());
    crc_input.extend_from_slice(&len_bytes);
    crc_input.extend_from_slice(&payload);
    let crc = compute_crc32(&crc_input);

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&LOG_MAGIC);
    frame.extend_from_slice(&len_bytes);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Reads every valid frame from the backend.
///
/// # Errors
///
/// Returns `Corrupted` if an invalid frame is followed by more data, or if a
/// checksummed payload does not decode.
pub fn read_log<B: StorageBackend + ?Sized>(backend: &B) -> StoreResult<Replay> {
    let size = backend.size()?;
    let len = usize::try_from(size)
        .map_err(|_| StoreError::corrupted(format!("log too large: {size} bytes")))?;
    let data = backend.read_at(0, len)?;

    let mut replay = Replay::default();
    let mut offset = 0usize;

    while offset < data.len() {
        match next_frame(&data, offset)? {
            Frame::Valid { entry, next } => {
                replay.entries.push(entry);
                offset = next;
            }
            Frame::Torn => {
                replay.torn_tail = true;
                break;
            }
        }
    }

    replay.valid_len = offset as u64;
    Ok(replay)
}

enum Frame {
    Valid { entry: LogEntry, next: usize },
    Torn,
}

fn next_frame(data: &[u8], offset: usize) -> StoreResult<Frame> {
    let rest = &data[offset..];

    if rest.len() < HEADER_SIZE {
        return Ok(Frame::Torn);
    }

    if rest[..4] != LOG_MAGIC {
        // Preallocated but unwritten space reads back as zeros.
        if rest.iter().all(|&b| b == 0) {
            return Ok(Frame::Torn);
        }
        return Err(StoreError::corrupted(format!(
            "invalid frame magic at offset {offset}"
        )));
    }

    let len = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
    let stored_crc = u32::from_le_bytes([rest[8], rest[9], rest[10], rest[11]]);
    let end = HEADER_SIZE.saturating_add(len);

    if end > rest.len() {
        return Ok(Frame::Torn);
    }

    let mut crc_input = Vec::with_capacity(4 + len);
    crc_input.extend_from_slice(&rest[4..8]);
    crc_input.extend_from_slice(&rest[HEADER_SIZE..end]);
    let computed_crc = compute_crc32(&crc_input);

    if stored_crc != computed_crc {
        if end == rest.len() {
            return Ok(Frame::Torn);
        }
        return Err(StoreError::corrupted(format!(
            "checksum mismatch at offset {offset}: expected {stored_crc:#010x}, got {computed_crc:#010x}"
        )));
    }

    let entry: LogEntry = stash_protocol::decode(&rest[HEADER_SIZE..end]).map_err(|e| {
        StoreError::corrupted(format!("undecodable entry at offset {offset}: {e}"))
    })?;

    Ok(Frame::Valid {
        entry,
        next: offset + end,
    })
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, reflected
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
