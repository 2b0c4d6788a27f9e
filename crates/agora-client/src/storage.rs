//! Durable key/value storage backing the token store.
//!
//! Mirrors the browser's local storage: string keys, string values, and
//! batch writes that a single caller observes atomically.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

/// Default token file name within the agora config directory.
pub const TOKEN_FILE: &str = "tokens.json";

/// Storage error.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Corrupt storage file: {0}")]
    Corrupt(String),
}

/// Key/value storage for credentials and session snapshots.
pub trait TokenStorage: Send + Sync + std::fmt::Debug {
    /// Read a single value.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write several values in one step.
    fn set_entries(&self, entries: &[(&str, &str)]) -> Result<(), StorageError>;

    /// Remove several keys in one step. Missing keys are ignored.
    fn remove_entries(&self, keys: &[&str]) -> Result<(), StorageError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryStorage
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory storage for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl TokenStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set_entries(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let mut map = self.entries.lock();
        for (key, value) in entries {
            map.insert((*key).to_string(), (*value).to_string());
        }
        Ok(())
    }

    fn remove_entries(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut map = self.entries.lock();
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FileStorage
// ─────────────────────────────────────────────────────────────────────────────

/// File-based storage: one JSON object, rewritten through a temp file and
/// renamed into place so readers never see a half-written file.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Create storage at `<dir>/tokens.json`.
    pub fn new(dir: &Path) -> Self {
        Self::with_path(dir.join(TOKEN_FILE))
    }

    /// Create storage at a custom path.
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Get the storage file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            StorageError::Io(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            StorageError::Corrupt(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Io(format!("Failed to create token directory: {}", e))
            })?;
        }

        let json = serde_json::to_string_pretty(map)
            .map_err(|e| StorageError::Corrupt(format!("Failed to serialize tokens: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| StorageError::Io(format!("Failed to write token file: {}", e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| StorageError::Io(format!("Failed to replace token file: {}", e)))?;
        Ok(())
    }
}

impl TokenStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_map()?.remove(key))
    }

    fn set_entries(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_map()?;
        for (key, value) in entries {
            map.insert((*key).to_string(), (*value).to_string());
        }
        self.write_map(&map)
    }

    fn remove_entries(&self, keys: &[&str]) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_map()?;
        let before = map.len();
        for key in keys {
            map.remove(*key);
        }
        if map.len() == before && !self.path.exists() {
            return Ok(());
        }
        self.write_map(&map)
    }
}
