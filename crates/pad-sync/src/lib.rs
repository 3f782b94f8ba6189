//! pad-sync library: Exposes the command layer for testing.
//!
//! A thin layer over pad-core that binds it to the native filesystem and
//! environment configuration.

pub mod commands;
pub mod config;
pub mod native_fs;

// Re-export key types for convenience
pub use commands::{App, RecordArgs};
pub use config::{Config, ConfigError};
pub use native_fs::NativeFs;
