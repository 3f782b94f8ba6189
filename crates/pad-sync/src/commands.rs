//! Command handlers. Each returns a JSON value for the caller to print.

use crate::config::{Config, LEDGER_FILE};
use crate::native_fs::NativeFs;
use anyhow::{Context, Result, anyhow};
use pad_core::event_log::{EventLog, discover_event_logs, read_event_log};
use pad_core::events::{EventLogState, MarkProcessedRequest, RecordEventRequest, TabMeta};
use pad_core::merge::{diff_lines, merge_text};
use pad_core::{CollectionSnapshot, ConflictLedger, MachineName, Resolution, apply_resolution, reconcile};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared state for one invocation. Owns the machine's only event log.
pub struct App {
    config: Config,
    fs: Arc<NativeFs>,
    log: EventLog<Arc<NativeFs>>,
}

async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

async fn read_snapshot(path: &Path) -> Result<CollectionSnapshot> {
    let raw = read_text(path).await?;
    CollectionSnapshot::from_json(&raw).with_context(|| format!("Invalid snapshot in {}", path.display()))
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Fields of `events record`.
#[derive(Debug, Clone, Default)]
pub struct RecordArgs {
    pub kind: String,
    pub tab_id: String,
    pub tab_index: Option<i64>,
    pub title: Option<String>,
    pub fallback_title: Option<String>,
}

impl RecordArgs {
    fn into_request(self) -> RecordEventRequest {
        let tab = (self.title.is_some() || self.fallback_title.is_some() || self.kind != "delete").then(|| TabMeta {
            id: self.tab_id.clone(),
            title: self.title.unwrap_or_default(),
            fallback_title: self.fallback_title.unwrap_or_default(),
        });
        RecordEventRequest {
            kind: self.kind,
            tab_id: Some(self.tab_id),
            tab_index: self.tab_index.map(|i| i as f64),
            tab,
        }
    }
}

impl App {
    /// Open the data directory and this machine's event log. The log's
    /// writer is spawned on the current tokio runtime.
    pub fn new(config: Config, machine: MachineName) -> Self {
        let fs = Arc::new(NativeFs::new(config.data_dir.clone()));
        let (log, queue) = EventLog::new(Arc::clone(&fs), "", machine);
        tokio::spawn(queue.run());
        Self { config, fs, log }
    }

    pub fn machine(&self) -> &MachineName {
        self.log.machine_name()
    }

    fn absolute(&self, relative: &str) -> PathBuf {
        self.fs.base_path().join(relative)
    }

    async fn load_ledger(&self) -> Result<ConflictLedger> {
        ConflictLedger::load(self.fs.as_ref(), LEDGER_FILE)
            .await
            .with_context(|| format!("Failed to load {}", self.absolute(LEDGER_FILE).display()))
    }

    async fn save_ledger(&self, ledger: &ConflictLedger) -> Result<()> {
        ledger.save(self.fs.as_ref(), LEDGER_FILE).await?;
        Ok(())
    }

    pub async fn merge(&self, current: &Path, candidate: &Path) -> Result<Value> {
        let current = read_text(current).await?;
        let candidate = read_text(candidate).await?;
        let outcome = merge_text(&current, &candidate, &self.config.merge_options());
        Ok(serde_json::to_value(outcome)?)
    }

    pub async fn diff(&self, a: &Path, b: &Path) -> Result<Value> {
        let a = read_text(a).await?;
        let b = read_text(b).await?;
        Ok(match diff_lines(&a, &b, self.config.diff_max_cells) {
            Some(diff) => json!({ "declined": false, "diff": diff }),
            None => json!({ "declined": true }),
        })
    }

    /// Reconcile two snapshot files. New conflicts go into the ledger; the
    /// merged snapshot is written to `out` when given.
    pub async fn reconcile(&self, local: &Path, remote: &Path, out: Option<&Path>) -> Result<Value> {
        let local = read_snapshot(local).await?;
        let remote = read_snapshot(remote).await?;

        let mut options = self.config.reconcile_options();
        options.deleted_locally = self.log.state().await.deleted_tab_ids();

        let result = reconcile(&local, &remote, &options);

        let mut ledger = self.load_ledger().await?;
        let absorbed = ledger.absorb(result.conflicts.clone());
        self.save_ledger(&ledger).await?;

        if let Some(out) = out {
            write_json(out, &result.snapshot).await?;
            info!("Wrote reconciled snapshot to {}", out.display());
        }

        Ok(json!({
            "snapshot": result.snapshot,
            "conflicts": result.conflicts,
            "outcomes": result.outcomes,
            "absorbed": absorbed,
            "pending": ledger.pending.len(),
        }))
    }

    pub async fn conflicts(&self) -> Result<Value> {
        let ledger = self.load_ledger().await?;
        Ok(serde_json::to_value(&ledger.pending)?)
    }

    /// Apply a resolution to the snapshot file in place and settle the
    /// conflict in the ledger.
    pub async fn resolve(&self, snapshot_path: &Path, id: &str, mode: &str, text_file: Option<&Path>) -> Result<Value> {
        let text = match text_file {
            Some(path) => Some(read_text(path).await?),
            None => None,
        };
        let resolution = Resolution::from_mode(mode, text)?;

        let mut snapshot = read_snapshot(snapshot_path).await?;
        let mut ledger = self.load_ledger().await?;
        let untitled = self.config.reconcile_options().untitled;

        apply_resolution(&mut snapshot, &mut ledger, id, resolution, &untitled)?;

        // Ledger first: a failed save leaves the snapshot untouched and the
        // conflict still pending.
        self.save_ledger(&ledger).await?;
        write_json(snapshot_path, &snapshot).await?;

        Ok(json!({
            "snapshot": snapshot,
            "pending": ledger.pending.len(),
        }))
    }

    pub async fn record_event(&self, args: RecordArgs) -> Result<Value> {
        let outcome = self.log.record_event(args.into_request()).await?;
        Ok(serde_json::to_value(outcome)?)
    }

    pub async fn mark_processed(&self, event_id: String, source_machine: String) -> Result<Value> {
        let request = MarkProcessedRequest {
            event_id,
            machine_name: source_machine,
        };
        let outcome = self.log.mark_processed(request).await?;
        Ok(serde_json::to_value(outcome)?)
    }

    pub async fn show_events(&self) -> Result<Value> {
        Ok(json!({
            "state": self.log.state().await,
            "filePath": self.absolute(self.log.events_file_path()),
        }))
    }

    pub fn events_path(&self) -> Value {
        json!({ "filePath": self.absolute(self.log.events_file_path()) })
    }

    /// Events from other machines not yet marked processed here. Reads
    /// `remote` when given, else every other log in the data directory.
    pub async fn pending_events(&self, remote: Option<&Path>) -> Result<Value> {
        let local = self.log.state().await;

        let remotes: Vec<EventLogState> = match remote {
            Some(path) => {
                let parent = path.parent().unwrap_or_else(|| Path::new("."));
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| anyhow!("Invalid event log path {}", path.display()))?;
                let remote_fs = NativeFs::new(parent.to_path_buf());
                let state = read_event_log(&remote_fs, name)
                    .await
                    .ok_or_else(|| anyhow!("Could not read event log {}", path.display()))?;
                vec![state]
            }
            None => {
                let own = self.log.events_file_path();
                let mut states = Vec::new();
                for path in discover_event_logs(self.fs.as_ref(), "").await? {
                    if path == own {
                        continue;
                    }
                    match read_event_log(self.fs.as_ref(), &path).await {
                        Some(state) => states.push(state),
                        None => debug!("Skipping unreadable event log {}", path),
                    }
                }
                states
            }
        };

        let pending: Vec<Value> = remotes
            .iter()
            .map(|remote| {
                json!({
                    "machineName": remote.machine_name,
                    "events": local.pending_from(remote),
                })
            })
            .collect();
        Ok(Value::Array(pending))
    }
}
