//! Documents and collection snapshots.
//!
//! A collection snapshot is the whole tab state of one machine (or one
//! backup): an ordered list of documents, the active document, and the
//! monotonic counter used to name new `Untitled N` documents.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// Opaque, never-reused document identifier.
pub type DocumentId = String;

/// Longest derived title, in characters.
const MAX_TITLE_CHARS: usize = 60;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Invalid snapshot JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// One note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    #[serde(default)]
    pub title: String,
    /// Last externally assigned name (e.g. a file name), used when the body
    /// yields no title.
    #[serde(default)]
    pub fallback_title: String,
    #[serde(default, alias = "content")]
    pub body: String,
}

impl Document {
    pub fn new(id: impl Into<DocumentId>, fallback_title: impl Into<String>, body: impl Into<String>) -> Self {
        let fallback_title = fallback_title.into();
        let body = body.into();
        Self {
            id: id.into(),
            title: derive_title(&body, &fallback_title),
            fallback_title,
            body,
        }
    }

    /// A fresh empty document named from the sequence counter.
    pub fn untitled(pattern: &UntitledPattern, number: u64) -> Self {
        Self::new(Uuid::new_v4().to_string(), pattern.name(number), "")
    }

    /// Replace the body and re-derive the display title from it.
    pub fn set_body(&mut self, body: String) {
        self.title = derive_title(&body, &self.fallback_title);
        self.body = body;
    }
}

/// Display title for a body: its first non-blank line with leading markdown
/// heading markers stripped, capped at `MAX_TITLE_CHARS`. Falls back to
/// `fallback_title` when the body has no text.
pub fn derive_title(body: &str, fallback_title: &str) -> String {
    let first = body
        .lines()
        .map(|line| line.trim().trim_start_matches('#').trim())
        .find(|line| !line.is_empty());

    match first {
        Some(line) => line.chars().take(MAX_TITLE_CHARS).collect(),
        None => fallback_title.to_string(),
    }
}

/// Whitespace then digits, the tail of a default name.
static NUMBER_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s+(\d+)$").expect("valid regex"));

/// Matches default names like `Untitled 7` for a given locale prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UntitledPattern {
    prefix: String,
}

impl UntitledPattern {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim().to_string(),
        }
    }

    /// Numeric suffix of `title` if it is a default name.
    pub fn suffix(&self, title: &str) -> Option<u64> {
        let rest = title.trim().strip_prefix(self.prefix.as_str())?;
        NUMBER_SUFFIX
            .captures(rest)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    pub fn name(&self, number: u64) -> String {
        format!("{} {}", self.prefix, number)
    }
}

impl Default for UntitledPattern {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

fn default_counter() -> u64 {
    1
}

/// One side of a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSnapshot {
    #[serde(alias = "tabs")]
    pub documents: Vec<Document>,
    #[serde(default, alias = "activeTabId")]
    pub active_id: Option<DocumentId>,
    #[serde(default = "default_counter", alias = "nextTabNumber")]
    pub sequence_counter: u64,
}

impl Default for CollectionSnapshot {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            active_id: None,
            sequence_counter: 1,
        }
    }
}

impl CollectionSnapshot {
    /// Parse a snapshot from JSON. Accepts both the canonical field names and
    /// the desktop app's tab payload (`tabs`, `activeTabId`, `nextTabNumber`).
    pub fn from_json(raw: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Document> {
        self.documents.iter_mut().find(|d| d.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.documents.iter().map(|d| d.id.as_str()).collect()
    }

    /// Remove a document, returning it.
    pub fn remove(&mut self, id: &str) -> Option<Document> {
        let pos = self.documents.iter().position(|d| d.id == id)?;
        Some(self.documents.remove(pos))
    }

    /// Highest `Untitled N` suffix among titles and fallback titles.
    pub fn max_untitled_suffix(&self, pattern: &UntitledPattern) -> Option<u64> {
        self.documents
            .iter()
            .flat_map(|d| [pattern.suffix(&d.title), pattern.suffix(&d.fallback_title)])
            .flatten()
            .max()
    }

    /// Raise the counter so it exceeds every default-name suffix present.
    pub fn raise_sequence_counter(&mut self, pattern: &UntitledPattern) {
        let floor = self
            .max_untitled_suffix(pattern)
            .map_or(1, |n| n.saturating_add(1));
        self.sequence_counter = self.sequence_counter.max(floor).max(1);
    }

    /// Add a fresh `Untitled N` document if the collection is empty.
    pub fn ensure_not_empty(&mut self, pattern: &UntitledPattern) {
        if self.documents.is_empty() {
            let doc = Document::untitled(pattern, self.sequence_counter);
            self.sequence_counter = self.sequence_counter.saturating_add(1);
            self.active_id = Some(doc.id.clone());
            self.documents.push(doc);
        }
    }

    /// Point `active_id` at an existing document, preferring the current one.
    pub fn repair_active(&mut self) {
        let valid = self
            .active_id
            .as_deref()
            .is_some_and(|id| self.contains(id));
        if !valid {
            self.active_id = self.documents.first().map(|d| d.id.clone());
        }
    }

    /// Restore every snapshot invariant: unique ids (first occurrence
    /// wins), a valid active id, and a counter above every default name.
    pub fn normalize(&mut self, pattern: &UntitledPattern) {
        let mut seen = HashSet::new();
        self.documents.retain(|d| seen.insert(d.id.clone()));
        self.raise_sequence_counter(pattern);
        self.repair_active();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_title_from_first_line() {
        assert_eq!(derive_title("\n  # Groceries \nmilk", "Untitled 1"), "Groceries");
        assert_eq!(derive_title("   \n\n", "notes.txt"), "notes.txt");
        assert_eq!(derive_title("", ""), "");
    }

    #[test]
    fn test_derive_title_caps_length() {
        let body = "x".repeat(200);
        assert_eq!(derive_title(&body, "").chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_untitled_pattern() {
        let pattern = UntitledPattern::default();
        assert_eq!(pattern.suffix("Untitled 12"), Some(12));
        assert_eq!(pattern.suffix("Untitled"), None);
        assert_eq!(pattern.suffix("Untitled 3b"), None);
        assert_eq!(pattern.name(4), "Untitled 4");

        let german = UntitledPattern::new("Unbenannt");
        assert_eq!(german.suffix("Unbenannt 2"), Some(2));
        assert_eq!(german.suffix("Untitled 2"), None);
    }

    #[test]
    fn test_parse_desktop_payload() {
        let raw = r#"{
            "tabs": [{"id": "t1", "title": "a", "fallbackTitle": "Untitled 4", "content": "a\nb"}],
            "activeTabId": "t1",
            "nextTabNumber": 2,
            "tabsExpanded": true
        }"#;
        let snapshot = CollectionSnapshot::from_json(raw).unwrap();
        assert_eq!(snapshot.documents[0].body, "a\nb");
        assert_eq!(snapshot.active_id.as_deref(), Some("t1"));
        assert_eq!(snapshot.sequence_counter, 2);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            CollectionSnapshot::from_json("{not json"),
            Err(SnapshotError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_normalize_restores_invariants() {
        let pattern = UntitledPattern::default();
        let mut snapshot = CollectionSnapshot {
            documents: vec![
                Document::new("a", "Untitled 9", ""),
                Document::new("b", "", "second"),
                Document::new("a", "", "duplicate"),
            ],
            active_id: Some("gone".into()),
            sequence_counter: 3,
        };

        snapshot.normalize(&pattern);

        assert_eq!(snapshot.ids(), vec!["a", "b"]);
        assert_eq!(snapshot.active_id.as_deref(), Some("a"));
        assert_eq!(snapshot.sequence_counter, 10);
    }

    #[test]
    fn test_ensure_not_empty_consumes_counter() {
        let pattern = UntitledPattern::default();
        let mut snapshot = CollectionSnapshot {
            sequence_counter: 5,
            ..Default::default()
        };

        snapshot.ensure_not_empty(&pattern);

        assert_eq!(snapshot.documents.len(), 1);
        assert_eq!(snapshot.documents[0].fallback_title, "Untitled 5");
        assert_eq!(snapshot.documents[0].title, "Untitled 5");
        assert_eq!(snapshot.sequence_counter, 6);
        assert_eq!(snapshot.active_id.as_deref(), Some(snapshot.documents[0].id.as_str()));
    }

    #[test]
    fn test_counter_saturates_at_max() {
        let pattern = UntitledPattern::default();
        let mut snapshot = CollectionSnapshot {
            documents: vec![Document::new("a", "Untitled 18446744073709551615", "")],
            ..Default::default()
        };

        snapshot.raise_sequence_counter(&pattern);
        assert_eq!(snapshot.sequence_counter, u64::MAX);

        snapshot.documents.clear();
        snapshot.ensure_not_empty(&pattern);
        assert_eq!(snapshot.documents[0].title, "Untitled 18446744073709551615");
        assert_eq!(snapshot.sequence_counter, u64::MAX);
    }
}
