//! Line-based merge of two versions of one document body.
//!
//! There is no common ancestor: the current text and a candidate (backup or
//! remote) text are aligned with an LCS, and each pair of unmatched gaps
//! between anchors is resolved on its own:
//!
//! 1. identical gaps are emitted once
//! 2. an empty gap on one side takes the other side (pure insert/delete)
//! 3. if one gap is a subsequence of the other, the longer gap wins
//! 4. anything else is a conflict, reported with context around that gap
//!
//! Rule 3 is a heuristic. It treats the longer gap as a superset edit and
//! avoids false conflicts on plain additions, but a deletion that happens to
//! leave a subsequence of the original is silently undone by it.

use crate::align::{Segment, align, is_subsequence, segments};
use crate::conflict::{ConflictReason, ConflictRecord, Hunk};
use serde::Serialize;

/// Default cell budget for merging.
pub const DEFAULT_MERGE_MAX_CELLS: usize = 200_000;
/// Default cell budget for the presentation-only diff mask.
pub const DEFAULT_DIFF_MAX_CELLS: usize = 50_000;
/// Default context lines around a conflicting hunk.
pub const DEFAULT_CONTEXT_LINES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    pub max_cells: usize,
    pub context_lines: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            max_cells: DEFAULT_MERGE_MAX_CELLS,
            context_lines: DEFAULT_CONTEXT_LINES,
        }
    }
}

/// Result of a text merge. Conflicts are a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeOutcome {
    Merged {
        #[serde(rename = "mergedText")]
        merged_text: String,
    },
    Conflict {
        reason: ConflictReason,
        conflict: Box<ConflictRecord>,
    },
}

impl MergeOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }
}

/// Split on `\n`, dropping one `\r` before each newline. A `\r` at the very
/// end (not followed by `\n`) is kept. The empty text is one empty line.
pub fn split_lines(text: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = text.split('\n').collect();
    let last = parts.len() - 1;
    for part in &mut parts[..last] {
        let line: &str = part;
        if let Some(stripped) = line.strip_suffix('\r') {
            *part = stripped;
        }
    }
    parts
}

/// How a pair of gaps resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GapChoice {
    Current,
    Candidate,
    Conflict,
}

fn resolve_gap(current: &[&str], candidate: &[&str]) -> GapChoice {
    if current == candidate || candidate.is_empty() {
        GapChoice::Current
    } else if current.is_empty() {
        GapChoice::Candidate
    } else if is_subsequence(current, candidate) {
        GapChoice::Candidate
    } else if is_subsequence(candidate, current) {
        GapChoice::Current
    } else {
        GapChoice::Conflict
    }
}

/// Merge `candidate_text` into `current_text`.
///
/// Byte-identical inputs always merge to themselves, whatever the budget.
pub fn merge_text(current_text: &str, candidate_text: &str, options: &MergeOptions) -> MergeOutcome {
    if current_text == candidate_text {
        return MergeOutcome::Merged {
            merged_text: current_text.to_string(),
        };
    }

    let a_lines = split_lines(current_text);
    let b_lines = split_lines(candidate_text);

    let Some(pairs) = align(&a_lines, &b_lines, options.max_cells) else {
        return MergeOutcome::Conflict {
            reason: ConflictReason::TooLarge,
            conflict: Box::new(ConflictRecord::too_large(
                current_text,
                candidate_text,
                &a_lines,
                &b_lines,
            )),
        };
    };

    let mut merged: Vec<&str> = Vec::with_capacity(a_lines.len().max(b_lines.len()));
    for segment in segments(&pairs, a_lines.len(), b_lines.len()) {
        match segment {
            Segment::Anchor { a, .. } => merged.push(a_lines[a]),
            Segment::Gap { a, b } => {
                let a_gap = &a_lines[a.clone()];
                let b_gap = &b_lines[b.clone()];
                match resolve_gap(a_gap, b_gap) {
                    GapChoice::Current => merged.extend_from_slice(a_gap),
                    GapChoice::Candidate => merged.extend_from_slice(b_gap),
                    GapChoice::Conflict => {
                        let conflict = ConflictRecord::for_hunk(
                            ConflictReason::Conflict,
                            current_text,
                            candidate_text,
                            (&a_lines[..], Hunk::new(a.start, a.end)),
                            (&b_lines[..], Hunk::new(b.start, b.end)),
                            options.context_lines,
                        );
                        return MergeOutcome::Conflict {
                            reason: ConflictReason::Conflict,
                            conflict: Box::new(conflict),
                        };
                    }
                }
            }
        }
    }

    MergeOutcome::Merged {
        merged_text: merged.join("\n"),
    }
}

/// Per-line "changed" flags for presentation. Not used for merge decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineDiff {
    pub a_changed: Vec<bool>,
    pub b_changed: Vec<bool>,
}

/// Mark every line of `a_text` and `b_text` that is outside the LCS.
/// Returns `None` when alignment is declined.
pub fn diff_lines(a_text: &str, b_text: &str, max_cells: usize) -> Option<LineDiff> {
    let a_lines = split_lines(a_text);
    let b_lines = split_lines(b_text);
    let pairs = align(&a_lines, &b_lines, max_cells)?;

    let mut a_changed = vec![true; a_lines.len()];
    let mut b_changed = vec![true; b_lines.len()];
    for (ai, bi) in pairs {
        a_changed[ai] = false;
        b_changed[bi] = false;
    }
    Some(LineDiff { a_changed, b_changed })
}
