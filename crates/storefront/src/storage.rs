//! Durable client-side key-value storage.
//!
//! Holds the small amount of state a storefront client keeps between runs:
//! the anonymous session identifier, the advisory cart snapshot, and the
//! signed-in user's credential.
//!
//! [`FileStore`] keeps one file per key in the data directory. Every write
//! lands in a temporary file first, so readers never observe a half-written
//! value. [`KeyValueStore::set_if_absent`] is the atomic check-and-set used to
//! create the session identifier exactly once.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Well-known storage keys.
pub mod keys {
    /// Anonymous session identifier.
    pub const SESSION_ID: &str = "sessionId";

    /// Advisory snapshot of the cart line items.
    pub const CART_SNAPSHOT: &str = "cart_items";

    /// Signed-in user and bearer credential.
    pub const AUTH_USER: &str = "user";
}

/// Errors that can occur when reading or writing client storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying filesystem operation failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// Key contains characters that cannot be used as a file name.
    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    /// Stored value could not be decoded.
    #[error("corrupt value under {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Durable string key-value storage.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Store `value` only if `key` holds nothing, as one atomic step.
    ///
    /// Returns the value held under `key` afterwards: `value` when this call
    /// created the entry, the existing value otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be read or written.
    fn set_if_absent(&self, key: &str, value: &str) -> Result<String, StorageError>;

    /// Delete a value. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// =============================================================================
// FileStore
// =============================================================================

/// File-backed store: one file per key under a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory this store writes to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.value")))
    }

    /// Write `value` to a fresh temporary file next to the target.
    fn write_temp(&self, key: &str, value: &str) -> Result<PathBuf, StorageError> {
        let tmp = self.dir.join(format!(".{key}.{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, value)?;
        Ok(tmp)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let tmp = self.write_temp(key, value)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str) -> Result<String, StorageError> {
        let path = self.path_for(key)?;
        let tmp = self.write_temp(key, value)?;

        // A hard link fails if the target exists, so exactly one writer wins
        // and the winner's file is complete before it becomes visible.
        let linked = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);

        match linked {
            Ok(()) => Ok(value.to_string()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(key, "value already present, keeping existing entry");
                Ok(fs::read_to_string(&path)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

/// Process-local store, for tests and for clients that must not touch disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str) -> Result<String, StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .entry(key.to_string())
            .or_insert_with(|| value.to_string())
            .clone())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}
