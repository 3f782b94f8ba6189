//! Machine identity.
//!
//! Each machine owns exactly one event log, named after its sanitized
//! machine name.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name used when no override or host name survives sanitization.
pub const UNKNOWN_MACHINE: &str = "unknown";

/// Environment variables consulted for an override, in priority order.
pub const MACHINE_NAME_ENV_VARS: [&str; 2] = ["PAD_MACHINE_NAME", "PAD_BACKUP_MACHINE_NAME"];

/// Sanitized machine name: only ASCII letters, digits, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineName(String);

/// Strip everything except ASCII letters, digits, `-` and `_`.
pub fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

impl MachineName {
    /// Sanitize `raw`, falling back to `"unknown"` if nothing is left.
    pub fn new(raw: &str) -> Self {
        Self::try_new(raw).unwrap_or_else(|| Self(UNKNOWN_MACHINE.to_string()))
    }

    fn try_new(raw: &str) -> Option<Self> {
        let name = sanitize(raw);
        (!name.is_empty()).then_some(Self(name))
    }

    /// First override that survives sanitization, else the host name.
    pub fn from_sources<I>(overrides: I, hostname: Option<String>) -> Self
    where
        I: IntoIterator<Item = Option<String>>,
    {
        overrides
            .into_iter()
            .flatten()
            .find_map(|raw| Self::try_new(&raw))
            .or_else(|| hostname.and_then(|h| Self::try_new(&h)))
            .unwrap_or_else(|| Self(UNKNOWN_MACHINE.to_string()))
    }

    /// Resolve from an explicit override (CLI flag), then the
    /// `PAD_MACHINE_NAME` / `PAD_BACKUP_MACHINE_NAME` environment
    /// variables, then the host name.
    pub fn resolve(cli_override: Option<&str>) -> Self {
        let overrides = std::iter::once(cli_override.map(str::to_string))
            .chain(MACHINE_NAME_ENV_VARS.iter().map(|var| std::env::var(var).ok()));
        let hostname = whoami::fallible::hostname().ok();
        let name = Self::from_sources(overrides, hostname);
        tracing::debug!("Resolved machine name: {}", name);
        name
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MachineName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
