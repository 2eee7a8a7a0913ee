//! Output rendering.

use crate::controller::ControllerResult;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use stash_protocol::{EntityId, Version};
use stash_store::{Compaction, LocalRecord, PendingMutation};
use stash_sync::{FlushReport, MutationOutcome, RefreshReport, SyncStatus, VerifyReport};
use std::fmt::Write;

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Text rendering for a command result.
pub trait Render {
    /// Renders the value as human-readable text.
    fn text(&self) -> String;
}

/// Renders `value` in the requested format.
pub fn render<T: Serialize + Render>(value: &T, format: OutputFormat) -> ControllerResult<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        OutputFormat::Text => Ok(value.text()),
    }
}

/// Formats a byte count in binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Formats usage against a quota as "X of Y used".
pub fn usage_line(used: u64, quota: u64) -> String {
    format!("{} of {} used", format_bytes(used), format_bytes(quota))
}

/// Returns the payload as text, replacing invalid UTF-8 and truncating to
/// `max_chars` characters.
pub fn payload_preview(payload: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(payload);
    let mut preview: String = text
        .chars()
        .take(max_chars)
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if text.chars().count() > max_chars {
        preview.push_str("...");
    }
    preview
}

fn note_prefix(out: &mut String, note: Option<&str>) {
    if let Some(note) = note {
        let _ = writeln!(out, "note: {note}");
    }
}

/// One local record.
#[derive(Debug, Clone, Serialize)]
pub struct RecordView {
    /// Entity identifier.
    pub id: EntityId,
    /// Last version confirmed by the remote.
    pub version: Version,
    /// `remote` or `local`.
    pub origin: &'static str,
    /// Whether a local change awaits the remote.
    pub dirty: bool,
    /// Whether the record is deleted.
    pub tombstone: bool,
    /// Version of a remote update held back by a pending change.
    pub staged_version: Option<Version>,
    /// Payload size in bytes.
    pub size: usize,
    /// Payload as text.
    pub payload: String,
    /// Last local modification.
    pub updated_at: DateTime<Utc>,
}

impl From<&LocalRecord> for RecordView {
    fn from(record: &LocalRecord) -> Self {
        Self {
            id: record.id,
            version: record.last_synced_version,
            origin: record.origin.as_str(),
            dirty: record.dirty,
            tombstone: record.tombstone,
            staged_version: record.staged.as_ref().map(|e| e.version),
            size: record.payload_len(),
            payload: String::from_utf8_lossy(&record.payload).into_owned(),
            updated_at: record.updated_at,
        }
    }
}

impl RecordView {
    fn flags(&self) -> String {
        let mut flags = Vec::new();
        if self.tombstone {
            flags.push("deleted".to_string());
        }
        if self.dirty {
            flags.push("pending".to_string());
        }
        if let Some(version) = self.staged_version {
            flags.push(format!("remote v{version} staged"));
        }
        if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        }
    }
}

/// Result of `list`.
#[derive(Debug, Clone, Serialize)]
pub struct ListView {
    /// Records in identifier order.
    pub records: Vec<RecordView>,
    /// Pass to `--after` to continue the listing.
    pub next_after: Option<EntityId>,
    /// Set when the data could not be refreshed.
    pub note: Option<String>,
}

impl Render for ListView {
    fn text(&self) -> String {
        let mut out = String::new();
        note_prefix(&mut out, self.note.as_deref());
        if self.records.is_empty() {
            out.push_str("no records");
            return out;
        }
        for record in &self.records {
            let _ = writeln!(
                out,
                "{:>8}  v{:<5} {:>10}  {}{}",
                record.id,
                record.version,
                format_bytes(record.size as u64),
                payload_preview(record.payload.as_bytes(), 40),
                record.flags()
            );
        }
        if let Some(after) = self.next_after {
            let _ = write!(out, "more records: continue with --after {after}");
        }
        out.trim_end().to_string()
    }
}

/// Result of `get`.
#[derive(Debug, Clone, Serialize)]
pub struct RecordDetail {
    /// The record.
    pub record: RecordView,
    /// Set when the data could not be refreshed.
    pub note: Option<String>,
}

impl Render for RecordDetail {
    fn text(&self) -> String {
        let mut out = String::new();
        note_prefix(&mut out, self.note.as_deref());
        let r = &self.record;
        let _ = writeln!(out, "Entity:   {}{}", r.id, r.flags());
        let _ = writeln!(out, "Version:  {}", r.version);
        let _ = writeln!(out, "Origin:   {}", r.origin);
        let _ = writeln!(out, "Size:     {}", format_bytes(r.size as u64));
        let _ = writeln!(out, "Updated:  {}", r.updated_at.to_rfc3339());
        let _ = writeln!(out);
        out.push_str(&r.payload);
        out
    }
}

/// Result of `put`, `delete` and `resolve --keep-local`.
#[derive(Debug, Clone, Serialize)]
pub struct MutationView {
    /// Entity identifier.
    pub id: EntityId,
    /// What the remote said.
    pub outcome: MutationOutcome,
}

impl Render for MutationView {
    fn text(&self) -> String {
        match self.outcome {
            MutationOutcome::Confirmed { version } => {
                format!("entity {}: confirmed at version {version}", self.id)
            }
            MutationOutcome::RemotePending => format!(
                "entity {}: saved locally, remote unreachable (run `stash flush` later)",
                self.id
            ),
            MutationOutcome::Withdrawn => format!(
                "entity {}: removed before it reached the remote",
                self.id
            ),
        }
    }
}

/// Result of `resolve --discard`.
#[derive(Debug, Clone, Serialize)]
pub struct DiscardView {
    /// The record after the pending change was dropped.
    pub record: RecordView,
}

impl Render for DiscardView {
    fn text(&self) -> String {
        if self.record.tombstone {
            format!("entity {}: local change discarded, record removed", self.record.id)
        } else {
            format!(
                "entity {}: local change discarded, now at version {}",
                self.record.id, self.record.version
            )
        }
    }
}

fn flush_text(out: &mut String, report: &FlushReport) {
    for (id, version) in &report.confirmed {
        let _ = writeln!(out, "  confirmed  {id} -> v{version}");
    }
    for conflict in &report.conflicts {
        let _ = writeln!(
            out,
            "  conflict   {} (based on v{}, remote at v{})",
            conflict.id, conflict.base_version, conflict.remote_version
        );
    }
    for id in &report.withdrawn {
        let _ = writeln!(out, "  withdrawn  {id} (never reached the remote)");
    }
    for (id, message) in &report.failed {
        let _ = writeln!(out, "  failed     {id}: {message}");
    }
    if report.interrupted {
        let _ = writeln!(out, "  stopped: remote unreachable");
    }
    let _ = write!(out, "Pending: {}", report.remaining);
}

impl Render for FlushReport {
    fn text(&self) -> String {
        let mut out = String::from("Flush\n");
        flush_text(&mut out, self);
        out
    }
}

impl Render for RefreshReport {
    fn text(&self) -> String {
        let mut out = String::new();
        if self.skipped {
            let _ = writeln!(out, "Store is fresh, nothing pulled.");
        } else {
            let _ = writeln!(
                out,
                "Pulled {} page(s): {} applied, {} staged, {} already current",
                self.pages, self.applied, self.staged, self.stale
            );
        }
        let _ = writeln!(out, "Cursor: {}", self.cursor);
        flush_text(&mut out, &self.flush);
        out
    }
}

/// One pending mutation.
#[derive(Debug, Clone, Serialize)]
pub struct PendingRow {
    /// Entity identifier.
    pub id: EntityId,
    /// `put` or `delete`.
    pub action: &'static str,
    /// Version the change was made against.
    pub base_version: Version,
    /// Idempotency token.
    pub token: String,
    /// When the change was made.
    pub created_at: DateTime<Utc>,
}

impl From<&PendingMutation> for PendingRow {
    fn from(mutation: &PendingMutation) -> Self {
        Self {
            id: mutation.entity_id,
            action: if mutation.change.is_delete() {
                "delete"
            } else {
                "put"
            },
            base_version: mutation.base_version,
            token: mutation.token.to_string(),
            created_at: mutation.created_at,
        }
    }
}

/// Result of `pending`.
#[derive(Debug, Clone, Serialize)]
pub struct PendingView {
    /// Pending mutations in submission order.
    pub mutations: Vec<PendingRow>,
}

impl Render for PendingView {
    fn text(&self) -> String {
        if self.mutations.is_empty() {
            return "no pending changes".to_string();
        }
        let mut out = String::new();
        for row in &self.mutations {
            let _ = writeln!(
                out,
                "{:>8}  {:<6} base v{:<5} {}",
                row.id,
                row.action,
                row.base_version,
                row.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        out.trim_end().to_string()
    }
}

impl Render for SyncStatus {
    fn text(&self) -> String {
        let s = &self.summary;
        let mut out = String::from("Stash Status\n============\n\n");
        let _ = writeln!(out, "Records:     {}", s.records);
        let _ = writeln!(out, "Tombstones:  {}", s.tombstones);
        let _ = writeln!(out, "Pending:     {}", s.pending);
        let _ = writeln!(out, "Staged:      {}", s.staged);
        let _ = writeln!(out, "Cursor:      {}", s.cursor);
        let last = s
            .last_full_sync
            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
        let _ = writeln!(out, "Last sync:   {last}");
        let _ = write!(out, "State:       {:?}", self.state);
        if let Some(error) = &self.stats.last_error {
            let _ = write!(out, "\nLast error:  {error}");
        }
        out
    }
}

/// Result of `usage`.
#[derive(Debug, Clone, Serialize)]
pub struct UsageView {
    /// Payload bytes held by live records.
    pub used_bytes: u64,
    /// Account quota, if configured.
    pub quota_bytes: Option<u64>,
    /// Live records.
    pub records: usize,
    /// Human-readable usage.
    pub summary: String,
    /// Set when the data could not be refreshed.
    pub note: Option<String>,
}

impl UsageView {
    /// Builds the view, formatting the summary line.
    pub fn new(used_bytes: u64, quota_bytes: Option<u64>, records: usize) -> Self {
        let summary = match quota_bytes {
            Some(quota) => usage_line(used_bytes, quota),
            None => format!("{} used", format_bytes(used_bytes)),
        };
        Self {
            used_bytes,
            quota_bytes,
            records,
            summary,
            note: None,
        }
    }
}

impl Render for UsageView {
    fn text(&self) -> String {
        let mut out = String::new();
        note_prefix(&mut out, self.note.as_deref());
        let _ = writeln!(out, "Storage");
        let _ = write!(out, "  {} ({} records)", self.summary, self.records);
        out
    }
}

impl Render for VerifyReport {
    fn text(&self) -> String {
        let mut out = format!(
            "Checked {} records and {} pending changes",
            self.records, self.pending
        );
        if self.is_ok() {
            out.push_str(": ok");
        } else {
            let _ = write!(out, ": {} problem(s)", self.problems.len());
            for problem in &self.problems {
                let _ = write!(out, "\n  {problem}");
            }
        }
        out
    }
}

/// Result of `compact`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CompactionView {
    /// Log size before.
    pub bytes_before: u64,
    /// Log size after.
    pub bytes_after: u64,
}

impl From<Compaction> for CompactionView {
    fn from(c: Compaction) -> Self {
        Self {
            bytes_before: c.bytes_before,
            bytes_after: c.bytes_after,
        }
    }
}

impl Render for CompactionView {
    fn text(&self) -> String {
        format!(
            "Compacted log: {} -> {}",
            format_bytes(self.bytes_before),
            format_bytes(self.bytes_after)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_in_binary_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn usage_against_quota() {
        assert_eq!(
            usage_line(512 * 1024 * 1024, 2 * 1024 * 1024 * 1024),
            "512.0 MB of 2.0 GB used"
        );
        let view = UsageView::new(2048, None, 3);
        assert_eq!(view.summary, "2.0 KB used");
    }

    #[test]
    fn preview_truncates_and_cleans() {
        assert_eq!(payload_preview(b"hello", 10), "hello");
        assert_eq!(payload_preview(b"hello world", 5), "hello...");
        assert_eq!(payload_preview(b"a\nb", 10), "a b");
        assert_eq!(payload_preview(&[0xff, b'x'], 10), "\u{fffd}x");
    }

    #[test]
    fn verify_text_lists_problems() {
        let report = VerifyReport {
            records: 2,
            pending: 1,
            problems: vec!["entity 4: dirty without a pending mutation".to_string()],
        };
        let text = report.text();
        assert!(text.contains("1 problem(s)"));
        assert!(text.contains("entity 4"));
    }

    #[test]
    fn flush_text_lists_withdrawn_records() {
        let report = FlushReport {
            withdrawn: vec![EntityId::new(5)],
            ..FlushReport::default()
        };
        let text = report.text();
        assert!(text.contains("withdrawn  5"));
        assert!(text.ends_with("Pending: 0"));
    }

    #[test]
    fn json_rendering_is_pretty() {
        let view = UsageView::new(10, Some(100), 1);
        let json = render(&view, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["used_bytes"], 10);
        assert_eq!(value["summary"], "10 B of 100 B used");
    }
}
