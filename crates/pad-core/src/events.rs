//! Structural edit events and the per-machine log state.
//!
//! The state is append-only with one narrow exception: recording an event
//! identical to the most recent one bumps that event's timestamp instead
//! of appending (see [`EventLogState::coalesce_or_append`]).

use crate::document::DocumentId;
use crate::machine::MachineName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub const SCHEMA_VERSION: u32 = 1;

/// Validation failures when recording or marking events.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Invalid event type")]
    InvalidType(String),

    #[error("Missing tabId")]
    MissingTabId,

    #[error("Missing tab for insert/update")]
    MissingTab,

    #[error("Missing eventId or machineName")]
    MissingProcessedKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(EventError::InvalidType(other.to_string())),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// Document metadata captured with insert and update events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabMeta {
    pub id: DocumentId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fallback_title: String,
}

/// One recorded structural edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub tab_id: DocumentId,
    #[serde(default)]
    pub tab_index: Option<u32>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tab: Option<TabMeta>,
}

impl Event {
    /// Whether `other` records the same logical change (ignores id and time).
    pub fn same_change(&self, other: &Event) -> bool {
        self.kind == other.kind
            && self.tab_id == other.tab_id
            && self.tab_index == other.tab_index
            && self.tab == other.tab
    }
}

fn generate_event_id() -> String {
    format!("evt-{}", Uuid::new_v4().simple())
}

/// Unvalidated input to `record_event`, as it arrives from a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEventRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub tab_id: Option<DocumentId>,
    /// Floored; negative or non-finite values are dropped.
    #[serde(default)]
    pub tab_index: Option<f64>,
    #[serde(default)]
    pub tab: Option<TabMeta>,
}

impl RecordEventRequest {
    /// Check the request and turn it into an event stamped `now`.
    ///
    /// `tabId` defaults to the tab metadata's id. Delete events never carry
    /// metadata.
    pub fn into_event(self, now: DateTime<Utc>) -> Result<Event, EventError> {
        let kind: EventType = self.kind.parse()?;

        let tab_id = self
            .tab_id
            .filter(|id| !id.is_empty())
            .or_else(|| self.tab.as_ref().map(|tab| tab.id.clone()))
            .filter(|id| !id.is_empty())
            .ok_or(EventError::MissingTabId)?;

        let tab = match kind {
            EventType::Delete => None,
            EventType::Insert | EventType::Update => {
                let tab = self.tab.filter(|tab| !tab.id.is_empty()).ok_or(EventError::MissingTab)?;
                Some(tab)
            }
        };

        let tab_index = self
            .tab_index
            .filter(|index| index.is_finite() && *index >= 0.0)
            .map(|index| index.floor().min(u32::MAX as f64) as u32);

        Ok(Event {
            id: generate_event_id(),
            kind,
            tab_id,
            tab_index,
            timestamp: now,
            tab,
        })
    }
}

/// Record that a consumer applied event `event_id` from `machine_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEntry {
    pub event_id: String,
    pub machine_name: String,
    pub processed_at: DateTime<Utc>,
}

/// Unvalidated input to `mark_processed`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkProcessedRequest {
    #[serde(default)]
    pub event_id: String,
    /// Machine that originally recorded the event.
    #[serde(default)]
    pub machine_name: String,
}

impl MarkProcessedRequest {
    pub fn validate(&self) -> Result<(), EventError> {
        if self.event_id.is_empty() || self.machine_name.is_empty() {
            return Err(EventError::MissingProcessedKey);
        }
        Ok(())
    }
}

/// How a recorded event landed in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Recorded {
    Appended,
    /// Folded into the previous, identical event.
    Coalesced,
}

/// Full contents of one machine's log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogState {
    pub schema_version: u32,
    pub machine_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub processed: Vec<ProcessedEntry>,
}

impl EventLogState {
    pub fn new(machine_name: &MachineName, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            machine_name: machine_name.to_string(),
            created_at: now,
            updated_at: now,
            events: Vec::new(),
            processed: Vec::new(),
        }
    }

    /// Append `event`, or, if it describes the same change as the last
    /// event, move the last event's timestamp forward instead. Returns the
    /// event as stored.
    pub fn coalesce_or_append(&mut self, event: Event) -> (Event, Recorded) {
        self.updated_at = event.timestamp;

        if let Some(last) = self.events.last_mut().filter(|last| last.same_change(&event)) {
            last.timestamp = event.timestamp;
            return (last.clone(), Recorded::Coalesced);
        }

        self.events.push(event.clone());
        (event, Recorded::Appended)
    }

    pub fn is_processed(&self, event_id: &str, machine_name: &str) -> bool {
        self.processed
            .iter()
            .any(|entry| entry.event_id == event_id && entry.machine_name == machine_name)
    }

    /// Add a processed entry unless the pair is already recorded. Returns
    /// `false` for a repeat.
    pub fn mark_processed(&mut self, event_id: &str, machine_name: &str, now: DateTime<Utc>) -> bool {
        if self.is_processed(event_id, machine_name) {
            return false;
        }
        self.processed.push(ProcessedEntry {
            event_id: event_id.to_string(),
            machine_name: machine_name.to_string(),
            processed_at: now,
        });
        self.updated_at = now;
        true
    }

    /// Documents whose most recent event is a delete.
    pub fn deleted_tab_ids(&self) -> BTreeSet<DocumentId> {
        let mut latest: BTreeMap<&str, EventType> = BTreeMap::new();
        for event in &self.events {
            latest.insert(&event.tab_id, event.kind);
        }
        latest
            .into_iter()
            .filter(|(_, kind)| *kind == EventType::Delete)
            .map(|(id, _)| id.to_string())
            .collect()
    }

    /// Events of `remote` that this log has not yet marked processed.
    pub fn pending_from<'a>(&self, remote: &'a EventLogState) -> Vec<&'a Event> {
        remote
            .events
            .iter()
            .filter(|event| !self.is_processed(&event.id, &remote.machine_name))
            .collect()
    }
}
