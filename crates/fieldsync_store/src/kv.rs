//! Durable key-value storage for sync state.

use crate::dir::StoreDir;
use crate::error::StoreResult;
use crate::map::RecordMap;
use fieldsync_storage::{InMemoryBackend, StorageBackend};
use parking_lot::Mutex;
use std::sync::Arc;

/// String key-value storage shared by the progress cache and the sync
/// operation repositories.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value for a key.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Inserts or replaces a value.
    fn put(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Removes a key.
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Returns every entry whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>>;

    /// Removes every key starting with `prefix`. Returns how many were removed.
    fn remove_prefix(&self, prefix: &str) -> StoreResult<usize>;

    /// Atomically replaces the value of a key with `f(current)`.
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<&str>) -> String,
    ) -> StoreResult<String>;
}

/// A [`KeyValueStore`] on a single record map.
pub struct RecordKeyValueStore<B: StorageBackend> {
    map: Mutex<RecordMap<B>>,
    _dir: Option<Arc<StoreDir>>,
}

impl<B: StorageBackend> std::fmt::Debug for RecordKeyValueStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordKeyValueStore")
            .field("entries", &self.map.lock().len())
            .finish()
    }
}

impl<B: StorageBackend> RecordKeyValueStore<B> {
    /// Opens a store over a backend.
    pub fn open(backend: B, sync_on_write: bool) -> StoreResult<Self> {
        Ok(Self {
            map: Mutex::new(RecordMap::open(backend, sync_on_write)?),
            _dir: None,
        })
    }
}

impl RecordKeyValueStore<InMemoryBackend> {
    /// Creates an empty in-memory store.
    pub fn in_memory() -> StoreResult<Self> {
        Self::open(InMemoryBackend::new(), false)
    }
}

impl RecordKeyValueStore<fieldsync_storage::FileBackend> {
    /// Opens the sync state file of a locked directory.
    pub fn open_dir(dir: Arc<StoreDir>, sync_on_write: bool) -> StoreResult<Self> {
        let mut store = Self::open(dir.sync_backend()?, sync_on_write)?;
        store._dir = Some(dir);
        Ok(store)
    }
}

impl<B: StorageBackend> KeyValueStore for RecordKeyValueStore<B> {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.map.lock().get(key).map(str::to_string))
    }

    fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        self.map.lock().put(key, value)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.map.lock().remove(key)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>> {
        Ok(self
            .map
            .lock()
            .iter_prefix(prefix)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect())
    }

    fn remove_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let mut map = self.map.lock();
        let keys: Vec<String> = map.iter_prefix(prefix).map(|(k, _)| k.to_string()).collect();
        map.remove_many(keys.iter().map(String::as_str))
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<&str>) -> String,
    ) -> StoreResult<String> {
        let mut map = self.map.lock();
        let value = f(map.get(key));
        map.put(key, &value)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_operations() {
        let kv = RecordKeyValueStore::in_memory().unwrap();
        kv.put("progress/a", "1").unwrap();
        kv.put("progress/b", "2").unwrap();
        kv.put("down/x", "{}").unwrap();

        assert_eq!(kv.scan_prefix("progress/").unwrap().len(), 2);
        assert_eq!(kv.remove_prefix("progress/").unwrap(), 2);
        assert!(kv.get("progress/a").unwrap().is_none());
        assert_eq!(kv.get("down/x").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn update_sees_current_value() {
        let kv = RecordKeyValueStore::in_memory().unwrap();
        let mut bump = |current: Option<&str>| {
            let n: u64 = current.and_then(|v| v.parse().ok()).unwrap_or(0);
            (n + 1).to_string()
        };
        kv.update("n", &mut bump).unwrap();
        assert_eq!(kv.update("n", &mut bump).unwrap(), "2");
    }
}
