//! Key-value persistence boundary.
//!
//! The queue is stored as one string value under a fixed key. This module
//! defines the `KeyValueStore` trait that backs it and two implementations:
//!
//! - `MemoryKeyValueStore`: in-memory map, for tests and ephemeral sessions
//! - `FileKeyValueStore`: one JSON file per key inside a data directory
//!
//! # Atomicity
//!
//! `set` replaces the whole value. The file store writes to a temporary file
//! and renames it over the target, so a reader never observes a half-written
//! queue.

use crate::error::{SyncError, SyncResult};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Trait for local string storage backends.
///
/// Methods take `&self`; implementations use interior mutability so a store
/// can be shared behind an `Arc`.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, `None` if it was never written.
    fn get(&self, key: &str) -> SyncResult<Option<String>>;

    /// Overwrite the value stored under `key`.
    fn set(&self, key: &str, value: &str) -> SyncResult<()>;

    /// Delete the value stored under `key`. Missing keys are not an error.
    fn remove(&self, key: &str) -> SyncResult<()>;
}

/// In-memory implementation of `KeyValueStore`.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// File-based implementation of `KeyValueStore`.
///
/// ```text
/// data/
/// ├── offline_queue.json
/// └── offline_queue.json.tmp   # only while a write is in progress
/// ```
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    base_path: PathBuf,
}

impl FileKeyValueStore {
    /// Create a store rooted at `base_path`, creating the directory if needed.
    pub fn new(base_path: impl AsRef<Path>) -> SyncResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    /// Directory holding the value files.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn value_path(&self, key: &str) -> SyncResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(SyncError::Storage(format!("invalid storage key: {key:?}")));
        }
        Ok(self.base_path.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let path = self.value_path(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        let path = self.value_path(key)?;
        let tmp_path = path.with_extension("json.tmp");

        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        let path = self.value_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
