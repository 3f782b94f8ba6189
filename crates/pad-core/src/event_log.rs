//! Durable per-machine event log with a single-writer queue.
//!
//! Every mutation is a read-modify-write of the whole log file. Mutations
//! go through one FIFO queue so that concurrent callers within a process
//! never lose each other's updates: job N+1 starts only after job N has
//! finished its write, whether or not that write succeeded.
//!
//! The queue is driven by [`WriteQueue::run`], which the host spawns on
//! its runtime:
//!
//! ```ignore
//! let (log, queue) = EventLog::new(fs, "backups", machine);
//! tokio::spawn(queue.run());
//! log.record_event(request).await?;
//! ```

use crate::events::{Event, EventError, EventLogState, MarkProcessedRequest, RecordEventRequest, Recorded, SCHEMA_VERSION};
use crate::fs::{FileSystem, FsError};
use crate::machine::MachineName;
use chrono::Utc;
use futures::StreamExt;
use futures::channel::{mpsc, oneshot};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const EVENTS_PREFIX: &str = "events-auto-";
pub const EVENTS_EXTENSION: &str = ".json";
const CORRUPT_SUFFIX: &str = ".corrupt";

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error(transparent)]
    Invalid(#[from] EventError),

    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Failed to serialize event log: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event log write queue is closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, EventLogError>;

/// Result of `record_event`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcome {
    pub event: Event,
    pub recorded: Recorded,
    pub file_path: String,
}

impl RecordOutcome {
    pub fn coalesced(&self) -> bool {
        self.recorded == Recorded::Coalesced
    }
}

/// Result of `mark_processed`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkOutcome {
    pub already_processed: bool,
    pub file_path: String,
}

/// File name of a machine's log: `events-auto-<machine>.json`.
pub fn events_file_name(machine: &MachineName) -> String {
    format!("{EVENTS_PREFIX}{machine}{EVENTS_EXTENSION}")
}

fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// What was found on disk.
enum Loaded {
    Missing,
    Valid(EventLogState),
    /// Present but unparsable or from another schema version.
    Unusable(Vec<u8>),
}

fn parse_state(bytes: &[u8]) -> Option<EventLogState> {
    serde_json::from_slice::<EventLogState>(bytes)
        .ok()
        .filter(|state| state.schema_version == SCHEMA_VERSION)
}

/// Reads and writes one machine's log file.
struct EventStore<F> {
    fs: F,
    file_path: String,
    machine: MachineName,
}

impl<F: FileSystem> EventStore<F> {
    async fn load(&self) -> std::result::Result<Loaded, FsError> {
        match self.fs.read(&self.file_path).await {
            Ok(bytes) => Ok(match parse_state(&bytes) {
                Some(state) => Loaded::Valid(state),
                None => Loaded::Unusable(bytes),
            }),
            Err(FsError::NotFound(_)) => Ok(Loaded::Missing),
            Err(e) => Err(e),
        }
    }

    fn adopt(&self, loaded: Loaded) -> EventLogState {
        match loaded {
            Loaded::Valid(mut state) => {
                state.machine_name = self.machine.to_string();
                state
            }
            Loaded::Missing | Loaded::Unusable(_) => EventLogState::new(&self.machine, Utc::now()),
        }
    }

    /// Current state for readers. Never fails: a missing, unreadable or
    /// corrupt log reads as a fresh empty one.
    async fn read_state(&self) -> EventLogState {
        match self.load().await {
            Ok(loaded) => self.adopt(loaded),
            Err(e) => {
                warn!("Could not read {}: {}", self.file_path, e);
                EventLogState::new(&self.machine, Utc::now())
            }
        }
    }

    /// State at the start of a write cycle. A corrupt file is set aside as
    /// `<file>.corrupt` before it gets overwritten.
    async fn read_for_write(&self) -> Result<EventLogState> {
        let loaded = self.load().await?;
        if let Loaded::Unusable(bytes) = &loaded {
            let backup = format!("{}{}", self.file_path, CORRUPT_SUFFIX);
            warn!("Event log {} is unusable, preserving it as {}", self.file_path, backup);
            self.fs.write(&backup, bytes).await?;
        }
        Ok(self.adopt(loaded))
    }

    async fn write_state(&self, state: &EventLogState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        self.fs.write(&self.file_path, &json).await?;
        Ok(())
    }

    async fn record(&self, mut event: Event) -> Result<RecordOutcome> {
        let mut state = self.read_for_write().await?;
        event.timestamp = Utc::now();
        let (event, recorded) = state.coalesce_or_append(event);
        self.write_state(&state).await?;

        match recorded {
            Recorded::Appended => debug!("Appended {} event {} for {}", event.kind, event.id, event.tab_id),
            Recorded::Coalesced => debug!("Coalesced {} event {} for {}", event.kind, event.id, event.tab_id),
        }

        Ok(RecordOutcome {
            event,
            recorded,
            file_path: self.file_path.clone(),
        })
    }

    async fn mark(&self, request: MarkProcessedRequest) -> Result<MarkOutcome> {
        let mut state = self.read_for_write().await?;
        let added = state.mark_processed(&request.event_id, &request.machine_name, Utc::now());
        if added {
            self.write_state(&state).await?;
        } else {
            debug!(
                "Event {} from {} already processed",
                request.event_id, request.machine_name
            );
        }

        Ok(MarkOutcome {
            already_processed: !added,
            file_path: self.file_path.clone(),
        })
    }
}

enum Job {
    Record {
        event: Event,
        reply: oneshot::Sender<Result<RecordOutcome>>,
    },
    Mark {
        request: MarkProcessedRequest,
        reply: oneshot::Sender<Result<MarkOutcome>>,
    },
}

/// Handle to one machine's event log. Cheap to clone; all clones share the
/// same write queue.
pub struct EventLog<F> {
    store: Arc<EventStore<F>>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl<F> Clone for EventLog<F> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            jobs: self.jobs.clone(),
        }
    }
}

/// Worker half of an [`EventLog`]. Must be spawned for mutations to make
/// progress; it exits once every `EventLog` handle is dropped.
pub struct WriteQueue<F> {
    store: Arc<EventStore<F>>,
    jobs: mpsc::UnboundedReceiver<Job>,
}

impl<F: FileSystem> EventLog<F> {
    /// Open the log for `machine` inside `dir` on `fs`.
    pub fn new(fs: F, dir: &str, machine: MachineName) -> (Self, WriteQueue<F>) {
        let store = Arc::new(EventStore {
            fs,
            file_path: join_path(dir, &events_file_name(&machine)),
            machine,
        });
        let (tx, rx) = mpsc::unbounded();
        (
            Self {
                store: Arc::clone(&store),
                jobs: tx,
            },
            WriteQueue { store, jobs: rx },
        )
    }

    pub fn machine_name(&self) -> &MachineName {
        &self.store.machine
    }

    pub fn events_file_path(&self) -> &str {
        &self.store.file_path
    }

    /// Validate and record a structural edit. Invalid requests are rejected
    /// before anything is queued or written.
    pub async fn record_event(&self, request: RecordEventRequest) -> Result<RecordOutcome> {
        let event = request.into_event(Utc::now())?;
        let (reply, response) = oneshot::channel();
        self.submit(Job::Record { event, reply })?;
        response.await.map_err(|_| EventLogError::QueueClosed)?
    }

    /// Note that `request.event_id` from `request.machine_name` has been
    /// applied here. Repeats report `already_processed` and write nothing.
    pub async fn mark_processed(&self, request: MarkProcessedRequest) -> Result<MarkOutcome> {
        request.validate()?;
        let (reply, response) = oneshot::channel();
        self.submit(Job::Mark { request, reply })?;
        response.await.map_err(|_| EventLogError::QueueClosed)?
    }

    /// Snapshot of the log as currently on disk.
    pub async fn state(&self) -> EventLogState {
        self.store.read_state().await
    }

    fn submit(&self, job: Job) -> Result<()> {
        self.jobs
            .unbounded_send(job)
            .map_err(|_| EventLogError::QueueClosed)
    }
}

impl<F: FileSystem> WriteQueue<F> {
    /// Process queued mutations one at a time, in submission order.
    pub async fn run(mut self) {
        info!("Event log writer started for {}", self.store.file_path);

        while let Some(job) = self.jobs.next().await {
            match job {
                Job::Record { event, reply } => {
                    let result = self.store.record(event).await;
                    if let Err(e) = &result {
                        warn!("Failed to record event: {}", e);
                    }
                    // The caller may have stopped waiting.
                    let _ = reply.send(result);
                }
                Job::Mark { request, reply } => {
                    let result = self.store.mark(request).await;
                    if let Err(e) = &result {
                        warn!("Failed to mark event processed: {}", e);
                    }
                    let _ = reply.send(result);
                }
            }
        }

        info!("Event log writer stopped for {}", self.store.file_path);
    }
}

/// Paths of every machine log in `dir`, sorted. A missing directory has
/// no logs.
pub async fn discover_event_logs<F: FileSystem + ?Sized>(
    fs: &F,
    dir: &str,
) -> std::result::Result<Vec<String>, FsError> {
    let entries = match fs.list(dir).await {
        Ok(entries) => entries,
        Err(FsError::NotFound(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut paths: Vec<String> = entries
        .into_iter()
        .filter(|entry| {
            !entry.is_dir && entry.name.starts_with(EVENTS_PREFIX) && entry.name.ends_with(EVENTS_EXTENSION)
        })
        .map(|entry| join_path(dir, &entry.name))
        .collect();
    paths.sort();
    Ok(paths)
}

/// Read another machine's log as-is. Unreadable, corrupt or
/// foreign-schema files yield `None`; callers retry later.
pub async fn read_event_log<F: FileSystem + ?Sized>(fs: &F, path: &str) -> Option<EventLogState> {
    match fs.read(path).await {
        Ok(bytes) => parse_state(&bytes),
        Err(e) => {
            debug!("Could not read event log {}: {}", path, e);
            None
        }
    }
}
