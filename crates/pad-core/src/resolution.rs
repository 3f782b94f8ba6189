//! Applying a human decision to a pending conflict.

use crate::conflict::{ConflictLedger, ConflictReason};
use crate::document::{CollectionSnapshot, UntitledPattern};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No pending conflict for document {0}")]
    NoPendingConflict(String),

    #[error("Document {0} is not in the collection")]
    DocumentMissing(String),

    #[error("Unknown resolution mode: {0}")]
    UnknownMode(String),

    #[error("Manual resolution requires the edited text")]
    MissingManualText,
}

/// What the user chose for one conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
    /// Local body, blank line, remote body (or whichever side is non-empty).
    Concatenate,
    Delete,
    Manual(String),
}

impl Resolution {
    /// Build from a mode string, taking `text` for the manual mode.
    pub fn from_mode(mode: &str, text: Option<String>) -> Result<Self, ResolveError> {
        match mode.parse::<ResolutionMode>()? {
            ResolutionMode::KeepLocal => Ok(Self::KeepLocal),
            ResolutionMode::KeepRemote => Ok(Self::KeepRemote),
            ResolutionMode::Concatenate => Ok(Self::Concatenate),
            ResolutionMode::Delete => Ok(Self::Delete),
            ResolutionMode::Manual => text.map(Self::Manual).ok_or(ResolveError::MissingManualText),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolutionMode {
    KeepLocal,
    KeepRemote,
    Concatenate,
    Delete,
    Manual,
}

impl FromStr for ResolutionMode {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep-local" | "current" | "local" => Ok(Self::KeepLocal),
            "keep-remote" | "backup" | "remote" => Ok(Self::KeepRemote),
            "both" | "concatenate" => Ok(Self::Concatenate),
            "delete" => Ok(Self::Delete),
            "manual" => Ok(Self::Manual),
            other => Err(ResolveError::UnknownMode(other.to_string())),
        }
    }
}

fn concatenate(local: &str, remote: &str) -> String {
    match (local.is_empty(), remote.is_empty()) {
        (true, _) => remote.to_string(),
        (false, true) => local.to_string(),
        (false, false) => format!("{local}\n\n{remote}"),
    }
}

/// Apply `resolution` to the pending conflict for `document_id`.
///
/// The conflict leaves the ledger (and is remembered as resolved); the
/// document's body and title are updated, or the document is removed.
/// Keeping the side where the document no longer exists means accepting
/// that deletion. The collection is refilled with an `Untitled N` document
/// if it would become empty.
pub fn apply_resolution(
    snapshot: &mut CollectionSnapshot,
    ledger: &mut ConflictLedger,
    document_id: &str,
    resolution: Resolution,
    untitled: &UntitledPattern,
) -> Result<(), ResolveError> {
    let record = ledger
        .get(document_id)
        .ok_or_else(|| ResolveError::NoPendingConflict(document_id.to_string()))?;

    // The local side is whatever the document holds now, which may carry
    // edits made after the conflict was recorded.
    let local = snapshot
        .get(document_id)
        .map_or(record.current_text.as_str(), |document| document.body.as_str());

    // `None` means the chosen side no longer has the document.
    let body = match (resolution, record.reason) {
        (Resolution::Delete, _)
        | (Resolution::KeepRemote, ConflictReason::DeletedInBackup)
        | (Resolution::KeepLocal, ConflictReason::DeletedInCurrent) => None,
        (Resolution::KeepLocal, _) => Some(local.to_string()),
        (Resolution::KeepRemote, _) => Some(record.backup_text.clone()),
        (Resolution::Concatenate, _) => Some(concatenate(local, &record.backup_text)),
        (Resolution::Manual(text), _) => Some(text),
    };

    match body {
        Some(body) => {
            let document = snapshot
                .get_mut(document_id)
                .ok_or_else(|| ResolveError::DocumentMissing(document_id.to_string()))?;
            document.set_body(body);
        }
        None => {
            snapshot.remove(document_id);
            snapshot.ensure_not_empty(untitled);
            snapshot.repair_active();
        }
    }

    ledger.settle(document_id);
    tracing::info!("Resolved conflict for {}", document_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictRecord;
    use crate::document::Document;
    use crate::merge::{MergeOptions, MergeOutcome, merge_text};
    use std::collections::BTreeMap;

    fn setup(local: &str, remote: &str) -> (CollectionSnapshot, ConflictLedger) {
        let snapshot = CollectionSnapshot {
            documents: vec![Document::new("t1", "Untitled 1", local), Document::new("t2", "", "other")],
            active_id: Some("t1".into()),
            sequence_counter: 2,
        };
        let MergeOutcome::Conflict { conflict, .. } = merge_text(local, remote, &MergeOptions::default()) else {
            panic!("expected conflict");
        };
        let mut ledger = ConflictLedger::default();
        ledger.absorb(BTreeMap::from([("t1".to_string(), *conflict)]));
        (snapshot, ledger)
    }

    fn apply(snapshot: &mut CollectionSnapshot, ledger: &mut ConflictLedger, resolution: Resolution) {
        apply_resolution(snapshot, ledger, "t1", resolution, &UntitledPattern::default()).unwrap();
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(Resolution::from_mode("current", None), Ok(Resolution::KeepLocal));
        assert_eq!(Resolution::from_mode("Backup", None), Ok(Resolution::KeepRemote));
        assert_eq!(Resolution::from_mode("both", None), Ok(Resolution::Concatenate));
        assert_eq!(
            Resolution::from_mode("manual", Some("x".into())),
            Ok(Resolution::Manual("x".into()))
        );
        assert_eq!(Resolution::from_mode("manual", None), Err(ResolveError::MissingManualText));
        assert!(matches!(
            Resolution::from_mode("merge-harder", None),
            Err(ResolveError::UnknownMode(_))
        ));
    }

    #[test]
    fn test_keep_remote_replaces_body_and_title() {
        let (mut snapshot, mut ledger) = setup("Alpha\nb", "Beta\nc");
        apply(&mut snapshot, &mut ledger, Resolution::KeepRemote);

        let doc = snapshot.get("t1").unwrap();
        assert_eq!(doc.body, "Beta\nc");
        assert_eq!(doc.title, "Beta");
        assert!(ledger.is_empty());
        assert_eq!(ledger.resolved.len(), 1);
    }

    #[test]
    fn test_concatenate_both_sides() {
        let (mut snapshot, mut ledger) = setup("mine", "theirs");
        apply(&mut snapshot, &mut ledger, Resolution::Concatenate);
        assert_eq!(snapshot.get("t1").unwrap().body, "mine\n\ntheirs");
    }

    #[test]
    fn test_concatenate_with_empty_side() {
        assert_eq!(concatenate("", "theirs"), "theirs");
        assert_eq!(concatenate("mine", ""), "mine");
    }

    #[test]
    fn test_manual_text() {
        let (mut snapshot, mut ledger) = setup("a\nb\nc", "a\nZ\nc");
        apply(&mut snapshot, &mut ledger, Resolution::Manual("hand made".into()));
        assert_eq!(snapshot.get("t1").unwrap().body, "hand made");
        assert_eq!(snapshot.get("t1").unwrap().title, "hand made");
    }

    #[test]
    fn test_keep_local_keeps_edits_made_after_the_conflict() {
        let (mut snapshot, mut ledger) = setup("a\nb\nc", "a\nZ\nc");
        snapshot.get_mut("t1").unwrap().set_body("a\nb\nc\nNEW LOCAL WORK".into());

        apply(&mut snapshot, &mut ledger, Resolution::KeepLocal);
        assert_eq!(snapshot.get("t1").unwrap().body, "a\nb\nc\nNEW LOCAL WORK");
    }

    #[test]
    fn test_concatenate_uses_current_local_body() {
        let (mut snapshot, mut ledger) = setup("mine", "theirs");
        snapshot.get_mut("t1").unwrap().set_body("mine, edited".into());

        apply(&mut snapshot, &mut ledger, Resolution::Concatenate);
        assert_eq!(snapshot.get("t1").unwrap().body, "mine, edited\n\ntheirs");
    }

    #[test]
    fn test_delete_removes_document_and_repairs_active() {
        let (mut snapshot, mut ledger) = setup("mine", "theirs");
        apply(&mut snapshot, &mut ledger, Resolution::Delete);

        assert!(!snapshot.contains("t1"));
        assert_eq!(snapshot.active_id.as_deref(), Some("t2"));
    }

    #[test]
    fn test_delete_last_document_refills_collection() {
        let mut snapshot = CollectionSnapshot {
            documents: vec![Document::new("t1", "", "mine")],
            active_id: Some("t1".into()),
            sequence_counter: 7,
        };
        let mut ledger = ConflictLedger::default();
        ledger.absorb(BTreeMap::from([("t1".to_string(), ConflictRecord::deleted_in_backup("mine"))]));

        // Keeping the backup side of a "deleted in backup" conflict accepts the deletion.
        apply(&mut snapshot, &mut ledger, Resolution::KeepRemote);

        assert_eq!(snapshot.documents.len(), 1);
        assert_eq!(snapshot.documents[0].title, "Untitled 7");
        assert_eq!(snapshot.active_id.as_deref(), Some(snapshot.documents[0].id.as_str()));
    }

    #[test]
    fn test_unknown_conflict_is_an_error() {
        let mut snapshot = CollectionSnapshot::default();
        let mut ledger = ConflictLedger::default();
        let err = apply_resolution(
            &mut snapshot,
            &mut ledger,
            "nope",
            Resolution::KeepLocal,
            &UntitledPattern::default(),
        )
        .unwrap_err();
        assert_eq!(err, ResolveError::NoPendingConflict("nope".into()));
    }
}
