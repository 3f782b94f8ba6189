//! pad-core: local-first reconciliation engine for pad notes.
//!
//! This crate provides:
//! - LCS line alignment with a cell budget (`align`)
//! - Three-outcome text merging and conflict records (`merge`, `conflict`)
//! - Collection reconciliation and human resolution (`reconcile`, `resolution`)
//! - The durable per-machine event log (`events`, `event_log`)
//! - FileSystem trait abstraction (`fs`)

pub mod align;
pub mod conflict;
pub mod document;
pub mod event_log;
pub mod events;
pub mod fs;
pub mod hash;
pub mod machine;
pub mod merge;
pub mod reconcile;
pub mod resolution;

pub use conflict::{ConflictLedger, ConflictReason, ConflictRecord, LedgerError};
pub use document::{CollectionSnapshot, Document, DocumentId, SnapshotError, UntitledPattern};
pub use event_log::{EventLog, EventLogError, MarkOutcome, RecordOutcome, WriteQueue};
pub use events::{Event, EventLogState, EventType, MarkProcessedRequest, RecordEventRequest, TabMeta};
pub use fs::{FileEntry, FileSystem, FsError, InMemoryFs};
pub use machine::MachineName;
pub use merge::{MergeOptions, MergeOutcome, merge_text};
pub use reconcile::{ReconcileOptions, Reconciliation, reconcile};
pub use resolution::{Resolution, ResolveError, apply_resolution};
