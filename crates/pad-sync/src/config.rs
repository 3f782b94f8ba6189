use pad_core::merge::{DEFAULT_CONTEXT_LINES, DEFAULT_DIFF_MAX_CELLS, DEFAULT_MERGE_MAX_CELLS, MergeOptions};
use pad_core::reconcile::{DEFAULT_ORDER_MAX_CELLS, ReconcileOptions};
use std::path::PathBuf;

/// Name of the conflict ledger inside the data directory.
pub const LEDGER_FILE: &str = "conflicts.json";

/// Tool configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding event logs and the conflict ledger
    pub data_dir: PathBuf,
    /// Cell budget for merging document bodies
    pub merge_max_cells: usize,
    /// Cell budget for presentation diffs
    pub diff_max_cells: usize,
    /// Cell budget for aligning document order
    pub order_max_cells: usize,
    /// Unchanged lines shown around a conflict hunk
    pub context_lines: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All optional:
    /// - `PAD_DATA_DIR`: data directory (supports ~ for home directory)
    /// - `PAD_MERGE_MAX_CELLS`, `PAD_DIFF_MAX_CELLS`, `PAD_ORDER_MAX_CELLS`
    /// - `PAD_MERGE_CONTEXT_LINES`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = lookup("PAD_DATA_DIR")
            .filter(|value| !value.trim().is_empty())
            .map(|value| expand_tilde(value.trim()))
            .unwrap_or_else(default_data_dir);

        let number = |key: &'static str, default: usize| -> Result<usize, ConfigError> {
            match lookup(key) {
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber { key, value }),
                None => Ok(default),
            }
        };

        Ok(Self {
            data_dir,
            merge_max_cells: number("PAD_MERGE_MAX_CELLS", DEFAULT_MERGE_MAX_CELLS)?,
            diff_max_cells: number("PAD_DIFF_MAX_CELLS", DEFAULT_DIFF_MAX_CELLS)?,
            order_max_cells: number("PAD_ORDER_MAX_CELLS", DEFAULT_ORDER_MAX_CELLS)?,
            context_lines: number("PAD_MERGE_CONTEXT_LINES", DEFAULT_CONTEXT_LINES)?,
        })
    }

    /// Replace the data directory with a command-line value, expanding `~`.
    pub fn set_data_dir(&mut self, raw: &str) {
        self.data_dir = expand_tilde(raw.trim());
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            max_cells: self.merge_max_cells,
            context_lines: self.context_lines,
        }
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            merge: self.merge_options(),
            order_max_cells: self.order_max_cells,
            ..ReconcileOptions::default()
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pad")
        .join("backups")
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
}
