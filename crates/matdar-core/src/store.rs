//! Durable key/value stores backing the local cache.
//!
//! The reconciler only needs `get` and `set` over opaque byte values. Two
//! implementations are provided:
//!
//! - [`MemoryCacheStore`]: process-local, for tests and ephemeral hosts
//! - [`FileCacheStore`]: one file per key in a data directory, surviving
//!   restarts
//!
//! Values are opaque here; typed access lives in [`crate::persistence`].

use crate::error::{MatdarError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Durable key/value persistence.
///
/// Implementations must be `Send + Sync`: the reconciler writes from the
/// scheduler thread while hosts may read from others.
pub trait CacheStore: Send + Sync {
    /// Read a value, `None` when absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a value. Deleting an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Delete every value owned by this store.
    fn clear(&self) -> Result<()>;

    /// Put back the value `key` held before its last write.
    ///
    /// Returns false when the store keeps no previous values or has none
    /// for `key`.
    fn restore_backup(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }
}

/// In-memory cache store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    values: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.values.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.values.write().clear();
        Ok(())
    }
}

/// File-backed cache store.
///
/// Each key maps to `<base_dir>/<key>.bin`. Writes go to a temp file that is
/// then renamed over the target, so a crash mid-write leaves the previous
/// value intact. The previous value is kept as `<key>.bin.bak`.
///
/// ## Example
///
/// ```rust,ignore
/// use matdar_core::store::{CacheStore, FileCacheStore};
///
/// let store = FileCacheStore::new("./data");
/// store.set("last_sync", b"2024-01-01T00:00:00Z")?;
/// assert!(store.get("last_sync")?.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    base_dir: PathBuf,
}

impl FileCacheStore {
    /// Create a store rooted at `base_dir`.
    ///
    /// The directory is created on first write.
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        FileCacheStore {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// Directory holding the values
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the file holding `key`
    pub fn value_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.base_dir.join(format!("{key}.bin")))
    }

    fn backup_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.bin.bak"))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.bin.tmp"))
    }

    /// Whether a value exists for `key`
    pub fn exists(&self, key: &str) -> bool {
        self.value_path(key).map(|p| p.exists()).unwrap_or(false)
    }

}

/// Keys become file names, so keep them to a safe alphabet
fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !key.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(MatdarError::Internal(format!("invalid cache key {key:?}")))
    }
}

impl CacheStore for FileCacheStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.value_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.value_path(key)?;
        fs::create_dir_all(&self.base_dir)?;

        let temp_path = self.temp_path(key);
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(value)?;
            file.sync_all()?;
        }

        // Keep the previous value around
        if path.exists() {
            let backup = self.backup_path(key);
            match fs::remove_file(&backup) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(key, error = %e, "Cannot remove stale cache backup"),
            }
            if let Err(e) = fs::rename(&path, &backup) {
                warn!(key, error = %e, "Cannot keep previous value as backup");
            }
        }

        fs::rename(&temp_path, &path)?;
        debug!(key, bytes = value.len(), "Cache value written");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.value_path(key)?;
        for p in [path, self.backup_path(key)] {
            match fs::remove_file(&p) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn restore_backup(&self, key: &str) -> Result<bool> {
        let path = self.value_path(key)?;
        let backup = self.backup_path(key);
        if !backup.exists() {
            return Ok(false);
        }
        fs::copy(&backup, &path)?;
        info!(key, "Restored previous value from backup");
        Ok(true)
    }

    fn clear(&self) -> Result<()> {
        if !self.base_dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            let owned = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".bin") || n.ends_with(".bin.bak") || n.ends_with(".bin.tmp"))
                .unwrap_or(false);
            if owned && path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store() {
        let store = MemoryCacheStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", b"v1").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v1".to_vec()));

        store.set("k", b"v2").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v2".to_vec()));

        store.remove("k").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCacheStore::new(temp_dir.path().join("cache"));

        assert_eq!(store.get("records").unwrap(), None);
        store.set("records", b"hello").unwrap();
        assert!(store.exists("records"));

        // A second instance over the same directory sees the value
        let reopened = FileCacheStore::new(temp_dir.path().join("cache"));
        assert_eq!(reopened.get("records").unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn test_file_store_backup() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCacheStore::new(temp_dir.path());

        store.set("records", b"first").unwrap();
        store.set("records", b"second").unwrap();
        assert_eq!(store.get("records").unwrap(), Some(b"second".to_vec()));

        assert!(store.restore_backup("records").unwrap());
        assert_eq!(store.get("records").unwrap(), Some(b"first".to_vec()));
        assert!(!store.restore_backup("other").unwrap());
        assert!(!MemoryCacheStore::new().restore_backup("records").unwrap());
    }

    #[test]
    fn test_backup_slot_occupied_by_directory() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let temp_dir = TempDir::new().unwrap();
        let store = FileCacheStore::new(temp_dir.path());
        store.set("records", b"first").unwrap();

        // Neither removable as a file nor a rename target
        let blocker = temp_dir.path().join("records.bin.bak");
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), b"x").unwrap();

        store.set("records", b"second").unwrap();
        assert_eq!(store.get("records").unwrap(), Some(b"second".to_vec()));
        assert!(blocker.join("keep").exists());
    }

    #[test]
    fn test_file_store_clear_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCacheStore::new(temp_dir.path());
        fs::write(temp_dir.path().join("unrelated.txt"), b"keep").unwrap();

        store.set("a", b"1").unwrap();
        store.set("b", b"2").unwrap();
        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert!(!store.exists("a"));

        store.clear().unwrap();
        assert!(!store.exists("b"));
        assert!(temp_dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_invalid_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCacheStore::new(temp_dir.path());
        assert!(store.set("../escape", b"x").is_err());
        assert!(store.set("", b"x").is_err());
        assert!(store.get(".hidden").is_err());
    }
}
