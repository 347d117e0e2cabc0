// File-backed key-value storage with JSON-encoded values
// One file per key, written atomically via a temp file

use crate::{Result, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Durable key-value store backed by a flat directory of JSON files.
///
/// Every value is serialized with serde_json and written to `<key>.json`
/// under the store's root directory. Writes go through a temp file and a
/// rename so a crash mid-write never leaves a half-written value behind.
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Open a store rooted at the given directory, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        info!("Storage opened at {}", root.display());
        Ok(Self { root })
    }

    /// Root directory this store writes under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serialize and persist a value under the given key.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path_for(key)?;
        let bytes = serde_json::to_vec(value)?;

        // Write-then-rename keeps the previous value intact on failure
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Stored {} ({} bytes)", key, bytes.len());
        Ok(())
    }

    /// Load and deserialize the value under the given key.
    ///
    /// Returns `Ok(None)` when the key has never been written.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key)?;

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let value = serde_json::from_slice(&bytes)?;
        Ok(Some(value))
    }

    /// Convenience wrapper for string values.
    pub async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.set(key, &value).await
    }

    /// Convenience wrapper for string values.
    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.get(key).await
    }

    /// Delete the value under the given key. Deleting a missing key is a no-op.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Check whether a key currently holds a value.
    pub async fn contains(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{}.json", key)))
    }
}
