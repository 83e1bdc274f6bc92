//! Local durable key-value store
//!
//! String-keyed get/set of JSON blobs. The perception components never talk
//! to a global store; they are handed an `Arc<dyn KeyValueStore>` so tests can
//! swap in [`MemoryStore`] while the binary uses [`FileStore`].

use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Well-known keys used by the perception engine.
pub mod keys {
    /// Named face embedding clusters.
    pub const FACES: &str = "lookout.faces";
    /// Label counts and novelty history.
    pub const MEMORY: &str = "lookout.memory";
    /// Persisted user settings.
    pub const SETTINGS: &str = "lookout.settings";
}

const MAX_KEY_LEN: usize = 128;

/// Synchronous string-keyed blob store.
///
/// Read-modify-write sequences built on top of this trait are not atomic
/// across concurrent writers.
pub trait KeyValueStore: Send + Sync {
    /// Fetch the raw value for `key`, `None` when absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Validate a store key. Keys double as file names for [`FileStore`], so
/// only `[A-Za-z0-9._-]` is accepted and `..` is rejected outright.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(Error::InvalidKey(format!(
            "key length must be 1..={} (got {})",
            MAX_KEY_LEN,
            key.len()
        )));
    }
    if key.contains("..") {
        return Err(Error::InvalidKey(key.to_string()));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    {
        return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Load a JSON value from the store.
///
/// A missing key yields `T::default()`. So does an unparsable blob: a corrupt
/// store degrades to empty state instead of failing the caller.
pub fn load_json<T>(store: &dyn KeyValueStore, key: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let raw = match store.get(key)? {
        Some(raw) => raw,
        None => return Ok(T::default()),
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("Stored value for '{}' is corrupted ({}), starting empty", key, e);
            Ok(T::default())
        }
    }
}

/// Serialize `value` as JSON and store it under `key`.
pub fn save_json<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let raw = serde_json::to_string(value)
        .map_err(|e| Error::Serialization(format!("Failed to encode '{}': {}", key, e)))?;
    store.set(key, &raw)
}

/// In-memory store for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Directory-backed store: one `<key>.json` file per key.
pub struct FileStore {
    root: PathBuf,
    // Serializes writers inside this process; other processes are not coordinated.
    write_lock: parking_lot::Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            Error::Storage(format!("Failed to create store directory {:?}: {}", root, e))
        })?;
        debug!("Opened file store at {:?}", root);
        Ok(Self {
            root,
            write_lock: parking_lot::Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("Failed to read {:?}: {}", path, e))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let temp_path = path.with_extension("json.tmp");
        let _guard = self.write_lock.lock();

        // Write to temp file, sync, then rename over the old value.
        {
            let mut file = fs::File::create(&temp_path)
                .map_err(|e| Error::Storage(format!("Failed to create temp file: {}", e)))?;
            file.write_all(value.as_bytes()).map_err(|e| {
                let _ = fs::remove_file(&temp_path);
                Error::Storage(format!("Failed to write '{}': {}", key, e))
            })?;
            file.sync_all().map_err(|e| {
                let _ = fs::remove_file(&temp_path);
                Error::Storage(format!("Failed to sync '{}': {}", key, e))
            })?;
        }

        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::Storage(format!("Failed to rename temp file for '{}': {}", key, e))
        })?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("Failed to remove {:?}: {}", path, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        count: u32,
        names: Vec<String>,
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key(keys::FACES).is_ok());
        assert!(validate_key("a-b_c.1").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../secrets").is_err());
        assert!(validate_key("dir/file").is_err());
        assert!(validate_key("with space").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap(), Some("1".to_string()));
        assert_eq!(store.len(), 1);

        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_load_json_missing_key_is_default() {
        let store = MemoryStore::new();
        let loaded: Sample = load_json(&store, "sample").unwrap();
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn test_load_json_corrupted_is_default() {
        let store = MemoryStore::new();
        store.set("sample", "{not json").unwrap();
        let loaded: Sample = load_json(&store, "sample").unwrap();
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn test_save_then_load_json() {
        let store = MemoryStore::new();
        let value = Sample {
            count: 3,
            names: vec!["ada".to_string()],
        };
        save_json(&store, "sample", &value).unwrap();
        let loaded: Sample = load_json(&store, "sample").unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert_eq!(store.get(keys::MEMORY).unwrap(), None);
        store.set(keys::MEMORY, "{\"counts\":{}}").unwrap();
        assert_eq!(
            store.get(keys::MEMORY).unwrap().as_deref(),
            Some("{\"counts\":{}}")
        );
        assert!(dir.path().join("lookout.memory.json").exists());
        assert!(!dir.path().join("lookout.memory.json.tmp").exists());

        store.remove(keys::MEMORY).unwrap();
        assert_eq!(store.get(keys::MEMORY).unwrap(), None);
    }

    #[test]
    fn test_file_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(store.set("../escape", "x"), Err(Error::InvalidKey(_))));
        assert!(matches!(store.get("a/b"), Err(Error::InvalidKey(_))));
    }
}
