//! pad-sync: command-line front end for pad reconciliation.
//!
//! Every command prints JSON to stdout. Logs go to stderr.

use anyhow::Result;
use clap::{Parser, Subcommand};
use pad_core::MachineName;
use pad_sync::{App, Config, RecordArgs};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pad-sync")]
#[command(about = "Merge, reconcile and journal pad note collections")]
struct Args {
    /// Machine name for this machine's event log (defaults to the host name)
    #[arg(long, global = true, alias = "pad-machine-name")]
    machine_name: Option<String>,

    /// Data directory for event logs and the conflict ledger (overrides PAD_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge a candidate text into the current text
    Merge { current: PathBuf, candidate: PathBuf },

    /// Per-line change flags between two texts
    Diff { a: PathBuf, b: PathBuf },

    /// Reconcile a remote snapshot into the local one
    Reconcile {
        #[arg(long)]
        local: PathBuf,
        #[arg(long)]
        remote: PathBuf,
        /// Write the merged snapshot here
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// List pending conflicts
    Conflicts,

    /// Resolve a pending conflict, updating the snapshot file in place
    Resolve {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        id: String,
        /// keep-local|current, keep-remote|backup, both|concatenate, delete, manual
        #[arg(long)]
        mode: String,
        /// Replacement text for manual mode
        #[arg(long)]
        text_file: Option<PathBuf>,
    },

    /// Work with this machine's event log
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum EventsCommand {
    /// Record an insert, update or delete
    Record {
        #[arg(long = "type")]
        kind: String,
        #[arg(long)]
        tab_id: String,
        #[arg(long, allow_negative_numbers = true)]
        tab_index: Option<i64>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        fallback_title: Option<String>,
    },

    /// Mark another machine's event as processed here
    Mark {
        #[arg(long)]
        event_id: String,
        /// Machine that recorded the event
        #[arg(long)]
        source_machine: String,
    },

    /// Print the log state
    Show,

    /// Print the log file path
    Path,

    /// Remote events not yet processed here
    Pending {
        /// A specific remote log (defaults to all logs in the data directory)
        #[arg(long)]
        remote: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,pad_sync=debug"
    } else {
        "info,pad_sync=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_env()?;
    if let Some(data_dir) = args.data_dir.as_deref() {
        config.set_data_dir(data_dir);
    }
    let machine = MachineName::resolve(args.machine_name.as_deref());
    debug!("Data directory: {:?}", config.data_dir);

    let app = App::new(config, machine);

    let output = match args.command {
        Command::Merge { current, candidate } => app.merge(&current, &candidate).await?,
        Command::Diff { a, b } => app.diff(&a, &b).await?,
        Command::Reconcile { local, remote, out } => app.reconcile(&local, &remote, out.as_deref()).await?,
        Command::Conflicts => app.conflicts().await?,
        Command::Resolve {
            snapshot,
            id,
            mode,
            text_file,
        } => app.resolve(&snapshot, &id, &mode, text_file.as_deref()).await?,
        Command::Events { command } => match command {
            EventsCommand::Record {
                kind,
                tab_id,
                tab_index,
                title,
                fallback_title,
            } => {
                app.record_event(RecordArgs {
                    kind,
                    tab_id,
                    tab_index,
                    title,
                    fallback_title,
                })
                .await?
            }
            EventsCommand::Mark {
                event_id,
                source_machine,
            } => app.mark_processed(event_id, source_machine).await?,
            EventsCommand::Show => app.show_events().await?,
            EventsCommand::Path => app.events_path(),
            EventsCommand::Pending { remote } => app.pending_events(remote.as_deref()).await?,
        },
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
