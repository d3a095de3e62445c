//! Persistent key-value storage for state snapshots
//!
//! Components persist their full state as one JSON blob per namespaced key.
//! The [`StateStore`] trait is the injection seam: production code uses a
//! [`FileStore`], tests and ephemeral setups a [`MemoryStore`]. Store
//! failures are never fatal to callers; they log and carry on with the
//! in-memory state.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

// ----------------------------------------------------------------------------
// Errors
// ----------------------------------------------------------------------------

/// Storage failures surfaced by [`StateStore`] implementations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage key: {key}")]
    InvalidKey { key: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ----------------------------------------------------------------------------
// State Store Trait
// ----------------------------------------------------------------------------

/// String-keyed text blob storage
///
/// Writes replace the whole blob for a key; there is no append or
/// cross-key transaction. Corruption is detected by the caller when the
/// blob fails to deserialize, not by the store.
pub trait StateStore {
    /// Read the blob stored under `key`, `None` when absent
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// Replace the blob stored under `key`
    fn save(&self, key: &str, value: &str) -> Result<()>;

    /// Delete the blob stored under `key`, if any
    fn remove(&self, key: &str) -> Result<()>;
}

impl<S: StateStore + ?Sized> StateStore for &S {
    fn load(&self, key: &str) -> Result<Option<String>> {
        (**self).load(key)
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        (**self).save(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

impl<S: StateStore + ?Sized> StateStore for std::sync::Arc<S> {
    fn load(&self, key: &str) -> Result<Option<String>> {
        (**self).load(key)
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        (**self).save(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

// ----------------------------------------------------------------------------
// Memory Store
// ----------------------------------------------------------------------------

/// In-memory [`StateStore`] used by tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.blobs().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.blobs().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.blobs().remove(key);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// File Store
// ----------------------------------------------------------------------------

/// Directory-backed [`StateStore`], one `<key>.json` file per blob
///
/// Writes go through a temporary file in the same directory followed by a
/// rename, so a blob is either the old or the new version, never a torn
/// write.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        // Keys become file names; reject anything that could escape the dir.
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(StoreError::InvalidKey {
                key: key.to_owned(),
            });
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl StateStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.blob_path(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let path = self.blob_path(key)?;
        let tmp_path = path.with_extension("json.tmp");

        let mut tmp = fs::File::create(&tmp_path)?;
        tmp.write_all(value.as_bytes())?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.blob_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
