//! Conflict records and the ledger that keeps them until a human resolves
//! them.
//!
//! A record carries both full texts, a bounded excerpt of each side around
//! the colliding hunk, and a suggested hand-mergeable document with
//! `<<<<<<< CURRENT` / `=======` / `>>>>>>> BACKUP` markers around that hunk.

use crate::document::DocumentId;
use crate::fs::{FileSystem, FsError};
use crate::hash::fingerprint_hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const CURRENT_MARKER: &str = "<<<<<<< CURRENT";
pub const SEPARATOR_MARKER: &str = "=======";
pub const BACKUP_MARKER: &str = ">>>>>>> BACKUP";

/// Lines shown for conflicts that have no precise hunk (too large, or a
/// document missing on one side).
pub const COARSE_EXCERPT_LINES: usize = 40;

/// Why a document could not be merged automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// Both sides changed the same region incompatibly.
    Conflict,
    /// The alignment table would exceed the cell budget.
    TooLarge,
    /// Present locally, absent from the backup/remote side.
    DeletedInBackup,
    /// Present remotely, deleted on this machine.
    DeletedInCurrent,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflict => write!(f, "conflict"),
            Self::TooLarge => write!(f, "too_large"),
            Self::DeletedInBackup => write!(f, "deleted_in_backup"),
            Self::DeletedInCurrent => write!(f, "deleted_in_current"),
        }
    }
}

/// 1-based inclusive line range. `end_line < start_line` marks an empty
/// range positioned before `start_line`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRange {
    pub start_line: usize,
    pub end_line: usize,
}

impl LineRange {
    /// From a 0-based half-open index range.
    fn from_indices(start: usize, end: usize) -> Self {
        Self {
            start_line: start + 1,
            end_line: end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub reason: ConflictReason,
    pub current_text: String,
    pub backup_text: String,
    pub current_excerpt: String,
    pub backup_excerpt: String,
    pub current_range: LineRange,
    pub backup_range: LineRange,
    pub current_hunk: String,
    pub backup_hunk: String,
    pub current_hunk_range: LineRange,
    pub backup_hunk_range: LineRange,
    pub suggested_text: String,
}

/// Line-index window of one side of a hunk.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Hunk {
    pub start: usize,
    pub end: usize,
}

impl Hunk {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

fn excerpt(lines: &[&str], hunk: Hunk, context: usize) -> (String, LineRange) {
    let start = hunk.start.saturating_sub(context);
    let end = (hunk.end + context).min(lines.len());
    (lines[start..end].join("\n"), LineRange::from_indices(start, end))
}

fn wrap_in_markers(current: &str, backup: &str) -> String {
    [CURRENT_MARKER, current, SEPARATOR_MARKER, backup, BACKUP_MARKER].join("\n")
}

impl ConflictRecord {
    /// Record for one colliding hunk, with `context` lines of surrounding
    /// excerpt on each side. The suggestion splices markers around the hunk
    /// only, keeping the rest of the current document intact.
    pub(crate) fn for_hunk(
        reason: ConflictReason,
        current_text: &str,
        backup_text: &str,
        current: (&[&str], Hunk),
        backup: (&[&str], Hunk),
        context: usize,
    ) -> Self {
        let (a_lines, a_hunk) = current;
        let (b_lines, b_hunk) = backup;
        let (current_excerpt, current_range) = excerpt(a_lines, a_hunk, context);
        let (backup_excerpt, backup_range) = excerpt(b_lines, b_hunk, context);

        let current_hunk_lines = &a_lines[a_hunk.start..a_hunk.end];
        let backup_hunk_lines = &b_lines[b_hunk.start..b_hunk.end];

        let mut suggested: Vec<&str> = Vec::with_capacity(a_lines.len() + backup_hunk_lines.len() + 3);
        suggested.extend_from_slice(&a_lines[..a_hunk.start]);
        suggested.push(CURRENT_MARKER);
        suggested.extend_from_slice(current_hunk_lines);
        suggested.push(SEPARATOR_MARKER);
        suggested.extend_from_slice(backup_hunk_lines);
        suggested.push(BACKUP_MARKER);
        suggested.extend_from_slice(&a_lines[a_hunk.end..]);

        Self {
            reason,
            current_text: current_text.to_string(),
            backup_text: backup_text.to_string(),
            current_excerpt,
            backup_excerpt,
            current_range,
            backup_range,
            current_hunk: current_hunk_lines.join("\n"),
            backup_hunk: backup_hunk_lines.join("\n"),
            current_hunk_range: LineRange::from_indices(a_hunk.start, a_hunk.end),
            backup_hunk_range: LineRange::from_indices(b_hunk.start, b_hunk.end),
            suggested_text: suggested.join("\n"),
        }
    }

    /// Coarse record when alignment was declined: the first
    /// `COARSE_EXCERPT_LINES` of each side, and both whole documents wrapped
    /// in markers.
    pub(crate) fn too_large(current_text: &str, backup_text: &str, a_lines: &[&str], b_lines: &[&str]) -> Self {
        let mut record = Self::for_hunk(
            ConflictReason::TooLarge,
            current_text,
            backup_text,
            (a_lines, Hunk::new(0, a_lines.len().min(COARSE_EXCERPT_LINES))),
            (b_lines, Hunk::new(0, b_lines.len().min(COARSE_EXCERPT_LINES))),
            0,
        );
        record.suggested_text = wrap_in_markers(current_text, backup_text);
        record
    }

    /// The document survives locally but is gone from the backup.
    pub fn deleted_in_backup(current_text: &str) -> Self {
        let lines = crate::merge::split_lines(current_text);
        let empty = [""];
        let mut record = Self::for_hunk(
            ConflictReason::DeletedInBackup,
            current_text,
            "",
            (&lines[..], Hunk::new(0, lines.len().min(COARSE_EXCERPT_LINES))),
            (&empty[..], Hunk::new(0, 0)),
            0,
        );
        record.suggested_text = current_text.to_string();
        record
    }

    /// The document exists in the backup but was deleted on this machine.
    pub fn deleted_in_current(backup_text: &str) -> Self {
        let lines = crate::merge::split_lines(backup_text);
        let empty = [""];
        let mut record = Self::for_hunk(
            ConflictReason::DeletedInCurrent,
            "",
            backup_text,
            (&empty[..], Hunk::new(0, 0)),
            (&lines[..], Hunk::new(0, lines.len().min(COARSE_EXCERPT_LINES))),
            0,
        );
        record.suggested_text = backup_text.to_string();
        record
    }

    fn fingerprint(&self, document_id: &str) -> ResolvedMark {
        ResolvedMark {
            document_id: document_id.to_string(),
            current: TextFingerprint::of(&self.current_text),
            backup: TextFingerprint::of(&self.backup_text),
            resolved_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Corrupt conflict ledger: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Identifies a text without storing it: 64-bit hash plus byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFingerprint {
    pub hash: u64,
    pub len: usize,
}

impl TextFingerprint {
    pub fn of(text: &str) -> Self {
        Self {
            hash: fingerprint_hash(text),
            len: text.len(),
        }
    }
}

/// A conflict that a human already settled. Identical inputs re-merged
/// later do not raise it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMark {
    pub document_id: DocumentId,
    pub current: TextFingerprint,
    pub backup: TextFingerprint,
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedMark {
    fn matches(&self, document_id: &str, record: &ConflictRecord) -> bool {
        self.document_id == document_id
            && self.current == TextFingerprint::of(&record.current_text)
            && self.backup == TextFingerprint::of(&record.backup_text)
    }
}

/// Pending conflicts keyed by document id, plus the resolution history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictLedger {
    #[serde(default)]
    pub pending: BTreeMap<DocumentId, ConflictRecord>,
    #[serde(default)]
    pub resolved: Vec<ResolvedMark>,
}

impl ConflictLedger {
    /// Load from `path`; a missing file is an empty ledger. A corrupt file
    /// is an error since dropping it would silently lose conflicts.
    pub async fn load<F: FileSystem + ?Sized>(fs: &F, path: &str) -> Result<Self, LedgerError> {
        match fs.read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(FsError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save<F: FileSystem + ?Sized>(&self, fs: &F, path: &str) -> Result<(), LedgerError> {
        let json = serde_json::to_vec_pretty(self)?;
        fs.write(path, &json).await?;
        Ok(())
    }

    /// Add freshly detected conflicts. A newer record replaces a pending one
    /// for the same document; records matching an earlier resolution are
    /// skipped. Returns how many records were taken.
    pub fn absorb(&mut self, conflicts: BTreeMap<DocumentId, ConflictRecord>) -> usize {
        let mut taken = 0;
        for (id, record) in conflicts {
            if self.resolved.iter().any(|mark| mark.matches(&id, &record)) {
                tracing::debug!("Skipping already resolved conflict for {}", id);
                continue;
            }
            self.pending.insert(id, record);
            taken += 1;
        }
        taken
    }

    pub fn get(&self, document_id: &str) -> Option<&ConflictRecord> {
        self.pending.get(document_id)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove a pending conflict and remember it as resolved.
    pub(crate) fn settle(&mut self, document_id: &str) -> Option<ConflictRecord> {
        let record = self.pending.remove(document_id)?;
        self.resolved.push(record.fingerprint(document_id));
        Some(record)
    }
}
