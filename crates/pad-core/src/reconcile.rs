//! Reconcile two snapshots of the same document collection.
//!
//! Ordering is merged by aligning the id sequences; bodies of documents
//! present on both sides go through [`merge_text`]. Nothing is dropped: a
//! document missing on one side is kept and flagged, and a body that cannot
//! be merged keeps its local text until a human picks a resolution.

use crate::align::{Segment, align, segments};
use crate::conflict::{ConflictReason, ConflictRecord};
use crate::document::{CollectionSnapshot, Document, DocumentId, UntitledPattern};
use crate::hash::content_hash;
use crate::merge::{MergeOptions, MergeOutcome, merge_text};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

/// Default cell budget for aligning id sequences.
pub const DEFAULT_ORDER_MAX_CELLS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub merge: MergeOptions,
    pub order_max_cells: usize,
    pub untitled: UntitledPattern,
    /// Ids deleted on this machine (usually taken from the local event
    /// log). A remote-only document listed here is flagged
    /// `deleted_in_current` instead of being adopted silently.
    pub deleted_locally: BTreeSet<DocumentId>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            merge: MergeOptions::default(),
            order_max_cells: DEFAULT_ORDER_MAX_CELLS,
            untitled: UntitledPattern::default(),
            deleted_locally: BTreeSet::new(),
        }
    }
}

/// How one document came out of the reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOutcome {
    Unchanged,
    Merged,
    AdoptedRemote,
    Conflicted(ConflictReason),
}

#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    pub snapshot: CollectionSnapshot,
    pub conflicts: BTreeMap<DocumentId, ConflictRecord>,
    pub outcomes: BTreeMap<DocumentId, DocumentOutcome>,
}

impl Reconciliation {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Merge the id order of both sides.
///
/// Local-only ids stay where they are. Remote-only ids are placed in the gap
/// they were found in, unless the id exists somewhere in the local sequence
/// (then the local position wins). When alignment is declined, the local
/// order is kept and remote-only ids are appended in remote order.
pub fn merge_order<'a>(local: &[&'a str], remote: &[&'a str], max_cells: usize) -> Vec<&'a str> {
    let local_set: HashSet<&str> = local.iter().copied().collect();
    let mut placed: HashSet<&str> = HashSet::with_capacity(local.len() + remote.len());
    let mut order = Vec::with_capacity(local.len() + remote.len());
    let mut place = |id: &'a str, order: &mut Vec<&'a str>| {
        if placed.insert(id) {
            order.push(id);
        }
    };

    let Some(pairs) = align(local, remote, max_cells) else {
        debug!("Order alignment declined, appending remote-only ids");
        for &id in local {
            place(id, &mut order);
        }
        for &id in remote {
            if !local_set.contains(id) {
                place(id, &mut order);
            }
        }
        return order;
    };

    for segment in segments(&pairs, local.len(), remote.len()) {
        match segment {
            Segment::Anchor { a, .. } => place(local[a], &mut order),
            Segment::Gap { a, b } => {
                for &id in &local[a] {
                    place(id, &mut order);
                }
                for &id in &remote[b] {
                    if !local_set.contains(id) {
                        place(id, &mut order);
                    }
                }
            }
        }
    }
    order
}

/// Reconcile `local` (live state) with `remote` (backup or another
/// machine's state).
///
/// The result always holds at least one document, prefers the local active
/// id, and its sequence counter exceeds every `Untitled N` suffix.
pub fn reconcile(
    local: &CollectionSnapshot,
    remote: &CollectionSnapshot,
    options: &ReconcileOptions,
) -> Reconciliation {
    let local_ids = local.ids();
    let remote_ids = remote.ids();
    let order = merge_order(&local_ids, &remote_ids, options.order_max_cells);

    let mut documents = Vec::with_capacity(order.len());
    let mut conflicts = BTreeMap::new();
    let mut outcomes = BTreeMap::new();

    for id in order {
        let (document, outcome) = match (local.get(id), remote.get(id)) {
            (Some(local_doc), Some(remote_doc)) => {
                reconcile_pair(local_doc, remote_doc, &options.merge, &mut conflicts)
            }
            (Some(local_doc), None) => {
                conflicts.insert(
                    local_doc.id.clone(),
                    ConflictRecord::deleted_in_backup(&local_doc.body),
                );
                (
                    local_doc.clone(),
                    DocumentOutcome::Conflicted(ConflictReason::DeletedInBackup),
                )
            }
            (None, Some(remote_doc)) if options.deleted_locally.contains(id) => {
                conflicts.insert(
                    remote_doc.id.clone(),
                    ConflictRecord::deleted_in_current(&remote_doc.body),
                );
                (
                    remote_doc.clone(),
                    DocumentOutcome::Conflicted(ConflictReason::DeletedInCurrent),
                )
            }
            (None, Some(remote_doc)) => (remote_doc.clone(), DocumentOutcome::AdoptedRemote),
            (None, None) => continue,
        };
        outcomes.insert(document.id.clone(), outcome);
        documents.push(document);
    }

    let mut snapshot = CollectionSnapshot {
        documents,
        active_id: None,
        sequence_counter: local.sequence_counter.max(remote.sequence_counter),
    };
    snapshot.raise_sequence_counter(&options.untitled);
    snapshot.ensure_not_empty(&options.untitled);
    snapshot.active_id = [&local.active_id, &remote.active_id]
        .into_iter()
        .flatten()
        .find(|id| snapshot.contains(id))
        .cloned()
        .or_else(|| snapshot.documents.first().map(|d| d.id.clone()));

    info!(
        "Reconciled {} local + {} remote documents into {} ({} conflicts)",
        local.documents.len(),
        remote.documents.len(),
        snapshot.documents.len(),
        conflicts.len()
    );

    Reconciliation {
        snapshot,
        conflicts,
        outcomes,
    }
}

fn reconcile_pair(
    local_doc: &Document,
    remote_doc: &Document,
    options: &MergeOptions,
    conflicts: &mut BTreeMap<DocumentId, ConflictRecord>,
) -> (Document, DocumentOutcome) {
    if content_hash(&local_doc.body) == content_hash(&remote_doc.body) && local_doc.body == remote_doc.body {
        return (local_doc.clone(), DocumentOutcome::Unchanged);
    }

    match merge_text(&local_doc.body, &remote_doc.body, options) {
        MergeOutcome::Merged { merged_text } => {
            let mut document = local_doc.clone();
            document.body = merged_text;
            (document, DocumentOutcome::Merged)
        }
        MergeOutcome::Conflict { reason, conflict } => {
            debug!("Conflict ({}) for document {}", reason, local_doc.id);
            conflicts.insert(local_doc.id.clone(), *conflict);
            (local_doc.clone(), DocumentOutcome::Conflicted(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, body: &str) -> Document {
        Document::new(id, "", body)
    }

    fn snapshot(docs: Vec<Document>, active: Option<&str>, counter: u64) -> CollectionSnapshot {
        CollectionSnapshot {
            documents: docs,
            active_id: active.map(str::to_string),
            sequence_counter: counter,
        }
    }

    // ==================== merge_order ====================

    #[test]
    fn test_merge_order_interleaves_gaps() {
        let order = merge_order(&["a", "b", "d"], &["a", "c", "d"], 100);
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_merge_order_keeps_local_position_for_moved_ids() {
        // "b" moved on the remote side: it must appear once, at its local spot.
        let order = merge_order(&["a", "b", "c"], &["b", "a", "c", "x"], 100);
        assert_eq!(order, vec!["a", "b", "c", "x"]);
    }

    #[test]
    fn test_merge_order_declined_appends_remote_only() {
        let order = merge_order(&["a", "b"], &["z", "b", "y"], 1);
        assert_eq!(order, vec!["a", "b", "z", "y"]);
    }

    // ==================== reconcile ====================

    #[test]
    fn test_identical_snapshots_are_clean() {
        let local = snapshot(vec![doc("a", "x"), doc("b", "y")], Some("b"), 3);
        let result = reconcile(&local, &local.clone(), &ReconcileOptions::default());

        assert!(result.is_clean());
        assert_eq!(result.snapshot.documents, local.documents);
        assert_eq!(result.snapshot.active_id.as_deref(), Some("b"));
        assert_eq!(result.outcomes["a"], DocumentOutcome::Unchanged);
    }

    #[test]
    fn test_remote_only_document_is_adopted() {
        let local = snapshot(vec![doc("a", "x")], Some("a"), 1);
        let remote = snapshot(vec![doc("a", "x"), doc("r", "remote")], Some("r"), 1);

        let result = reconcile(&local, &remote, &ReconcileOptions::default());

        assert!(result.is_clean());
        assert_eq!(result.snapshot.ids(), vec!["a", "r"]);
        assert_eq!(result.snapshot.get("r").unwrap().body, "remote");
        assert_eq!(result.outcomes["r"], DocumentOutcome::AdoptedRemote);
    }

    #[test]
    fn test_local_only_document_is_kept_and_flagged() {
        let local = snapshot(vec![doc("a", "x"), doc("l", "mine")], Some("l"), 1);
        let remote = snapshot(vec![doc("a", "x")], None, 1);

        let result = reconcile(&local, &remote, &ReconcileOptions::default());

        assert_eq!(result.snapshot.get("l").unwrap().body, "mine");
        assert_eq!(result.conflicts["l"].reason, ConflictReason::DeletedInBackup);
        assert_eq!(result.snapshot.active_id.as_deref(), Some("l"));
    }

    #[test]
    fn test_locally_deleted_remote_document_is_flagged() {
        let local = snapshot(vec![doc("a", "x")], None, 1);
        let remote = snapshot(vec![doc("a", "x"), doc("gone", "old")], None, 1);
        let options = ReconcileOptions {
            deleted_locally: BTreeSet::from(["gone".to_string()]),
            ..Default::default()
        };

        let result = reconcile(&local, &remote, &options);

        assert!(result.snapshot.contains("gone"));
        assert_eq!(result.conflicts["gone"].reason, ConflictReason::DeletedInCurrent);
        assert_eq!(result.conflicts["gone"].backup_text, "old");
    }

    #[test]
    fn test_bodies_merge_cleanly() {
        let local = snapshot(vec![doc("a", "one\ntwo")], Some("a"), 1);
        let remote = snapshot(vec![doc("a", "one\nmiddle\ntwo")], Some("a"), 1);

        let result = reconcile(&local, &remote, &ReconcileOptions::default());

        assert!(result.is_clean());
        assert_eq!(result.snapshot.get("a").unwrap().body, "one\nmiddle\ntwo");
        assert_eq!(result.outcomes["a"], DocumentOutcome::Merged);
    }

    #[test]
    fn test_conflicting_bodies_keep_local_text() {
        let local = snapshot(vec![doc("a", "a\nb\nc")], Some("a"), 1);
        let remote = snapshot(vec![doc("a", "a\nZ\nc")], Some("a"), 1);

        let result = reconcile(&local, &remote, &ReconcileOptions::default());

        assert_eq!(result.snapshot.get("a").unwrap().body, "a\nb\nc");
        let record = &result.conflicts["a"];
        assert_eq!(record.reason, ConflictReason::Conflict);
        assert_eq!(record.current_hunk, "b");
        assert_eq!(record.backup_hunk, "Z");
    }

    #[test]
    fn test_too_large_bodies_are_flagged() {
        let local = snapshot(vec![doc("a", "1\n2\n3")], None, 1);
        let remote = snapshot(vec![doc("a", "4\n5\n6")], None, 1);
        let options = ReconcileOptions {
            merge: MergeOptions {
                max_cells: 2,
                context_lines: 3,
            },
            ..Default::default()
        };

        let result = reconcile(&local, &remote, &options);
        assert_eq!(result.conflicts["a"].reason, ConflictReason::TooLarge);
    }

    #[test]
    fn test_empty_sides_never_collapse() {
        let local = snapshot(vec![], None, 4);
        let remote = snapshot(vec![], None, 2);

        let result = reconcile(&local, &remote, &ReconcileOptions::default());

        assert_eq!(result.snapshot.documents.len(), 1);
        assert_eq!(result.snapshot.documents[0].fallback_title, "Untitled 4");
        assert_eq!(result.snapshot.sequence_counter, 5);
        assert_eq!(
            result.snapshot.active_id.as_deref(),
            Some(result.snapshot.documents[0].id.as_str())
        );
    }

    #[test]
    fn test_active_falls_back_to_remote_then_first() {
        let local = snapshot(vec![doc("a", "x")], Some("missing"), 1);
        let remote = snapshot(vec![doc("a", "x"), doc("r", "y")], Some("r"), 1);
        let result = reconcile(&local, &remote, &ReconcileOptions::default());
        assert_eq!(result.snapshot.active_id.as_deref(), Some("r"));

        let remote = snapshot(vec![doc("a", "x")], None, 1);
        let result = reconcile(&local, &remote, &ReconcileOptions::default());
        assert_eq!(result.snapshot.active_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_counter_exceeds_untitled_suffixes() {
        let local = snapshot(vec![Document::new("a", "Untitled 3", "")], None, 2);
        let remote = snapshot(
            vec![Document::new("a", "Untitled 3", ""), Document::new("b", "Untitled 11", "")],
            None,
            5,
        );

        let result = reconcile(&local, &remote, &ReconcileOptions::default());
        assert_eq!(result.snapshot.sequence_counter, 12);
    }
}
