//! FileSystem trait abstraction for the event log and conflict ledger.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in pad-sync) - Uses tokio::fs with atomic replace
//!
//! Paths are `/`-separated strings relative to the implementation's root.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Directory entry
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// File or directory name (not full path)
    pub name: String,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Platform-independent filesystem abstraction.
///
/// `write` must replace the file as a whole: a reader never observes a
/// half-written log.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Replace file contents (creates parent directories if needed)
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// List directory contents
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// In-memory filesystem for testing
#[derive(Default)]
pub struct InMemoryFs {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    dirs: RwLock<BTreeSet<String>>,
    fail_writes: AtomicBool,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `write` fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of files currently stored.
    pub fn file_count(&self) -> usize {
        self.files.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn register_parents(&self, path: &str) {
        let mut dirs = self.dirs.write().unwrap_or_else(|e| e.into_inner());
        let mut current = path;
        while let Some(pos) = current.rfind('/') {
            current = &current[..pos];
            dirs.insert(current.to_string());
        }
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(&path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FsError::Io(format!("write refused: {path}")));
        }
        let path = Self::normalize_path(path);
        self.register_parents(&path);
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path, content.to_vec());
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let path = Self::normalize_path(path);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };

        let dirs = self.dirs.read().unwrap_or_else(|e| e.into_inner());
        if !path.is_empty() && !dirs.contains(&path) {
            return Err(FsError::NotFound(path));
        }

        let mut entries = Vec::new();
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        for file_path in files.keys() {
            if let Some(rest) = file_path.strip_prefix(&prefix) {
                if !rest.contains('/') {
                    entries.push(FileEntry {
                        name: rest.to_string(),
                        is_dir: false,
                    });
                }
            }
        }
        for dir_path in dirs.iter() {
            if let Some(rest) = dir_path.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries.push(FileEntry {
                        name: rest.to_string(),
                        is_dir: true,
                    });
                }
            }
        }

        Ok(entries)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let dirs = self.dirs.read().unwrap_or_else(|e| e.into_inner());
        Ok(path.is_empty() || files.contains_key(&path) || dirs.contains(&path))
    }
}

// Lets callers keep a handle on the filesystem they hand to an EventLog.
#[async_trait]
impl<T: FileSystem + ?Sized> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        (**self).list(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_fs_basic_operations() {
        let fs = InMemoryFs::new();

        fs.write("log.json", b"{}").await.unwrap();
        assert_eq!(fs.read("log.json").await.unwrap(), b"{}");
        assert!(fs.exists("log.json").await.unwrap());
        assert!(matches!(
            fs.read("missing.json").await,
            Err(FsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_inmemory_fs_lists_nested_entries() {
        let fs = InMemoryFs::new();
        fs.write("backups/events-auto-a.json", b"1").await.unwrap();
        fs.write("backups/old/x.json", b"2").await.unwrap();

        let mut names: Vec<_> = fs
            .list("backups")
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.is_dir))
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                ("events-auto-a.json".to_string(), false),
                ("old".to_string(), true)
            ]
        );
        assert!(matches!(fs.list("nope").await, Err(FsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_inmemory_fs_fail_writes() {
        let fs = InMemoryFs::new();
        fs.set_fail_writes(true);
        assert!(matches!(fs.write("a", b"x").await, Err(FsError::Io(_))));
        assert_eq!(fs.file_count(), 0);
    }
}
