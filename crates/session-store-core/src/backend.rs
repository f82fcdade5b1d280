//! Storage backend trait and built-in implementations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::StorageResult;

/// Storage key under which the serialized session lives.
pub const SESSION_KEY: &str = "latchkeySession";

/// Minimal capability set for durable session storage.
///
/// Hosts plug in whatever they have — memory, a file, a cookie jar, a
/// platform keychain. No schema beyond "string in, string out".
pub trait SessionStorageBackend: Send + Sync {
    /// Retrieve a value. `Ok(None)` when the key is absent.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Store a value.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete a value. Deleting an absent key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;
}

/// Volatile in-memory backend. The default when the host provides nothing
/// durable; sessions do not survive the process.
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.values.lock().expect("lock poisoned").get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.values
            .lock()
            .expect("lock poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.values.lock().expect("lock poisoned").remove(key);
        Ok(())
    }
}

/// File-backed backend: a single JSON object mapping keys to values.
///
/// The Rust host analogue of browser local storage. Writes go through a
/// temp file plus rename so a crash mid-write cannot leave a truncated
/// session on disk.
pub struct FileStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles across threads of this process.
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_map(&self) -> StorageResult<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_map(&self, map: &HashMap<String, String>) -> StorageResult<()> {
        let raw = serde_json::to_string(map)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SessionStorageBackend for FileStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let _guard = self.lock.lock().expect("lock poisoned");
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = self.lock.lock().expect("lock poisoned");
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let _guard = self.lock.lock().expect("lock poisoned");
        let mut map = self.read_map()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}
