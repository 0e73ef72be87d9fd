//! A durable string map replayed from a record log.

use crate::error::StoreResult;
use fieldsync_storage::{RecordLog, StorageBackend};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Superseded records tolerated before the log is rewritten.
const COMPACT_MIN_STALE: usize = 256;

#[derive(Serialize)]
struct MapRecordRef<'a> {
    k: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    v: Option<&'a str>,
}

#[derive(Deserialize)]
struct MapRecord {
    k: String,
    #[serde(default)]
    v: Option<String>,
}

/// A key-value map where every mutation is appended to a [`RecordLog`].
///
/// A record with no value is a tombstone. The log is rewritten once
/// superseded records outnumber live ones.
#[derive(Debug)]
pub struct RecordMap<B: StorageBackend> {
    log: RecordLog<B>,
    entries: BTreeMap<String, String>,
    stale: usize,
    sync_on_write: bool,
}

impl<B: StorageBackend> RecordMap<B> {
    /// Opens a map by replaying its log.
    ///
    /// Records that cannot be decoded are skipped.
    pub fn open(backend: B, sync_on_write: bool) -> StoreResult<Self> {
        let (log, records) = RecordLog::open(backend)?;
        let mut entries = BTreeMap::new();
        let mut stale = 0;
        for (index, record) in records.iter().enumerate() {
            let Ok(record) = serde_json::from_slice::<MapRecord>(record) else {
                warn!(index, "skipping undecodable map record");
                stale += 1;
                continue;
            };
            let replaced = match record.v {
                Some(value) => entries.insert(record.k, value),
                None => {
                    stale += 1;
                    entries.remove(&record.k)
                }
            };
            if replaced.is_some() {
                stale += 1;
            }
        }
        Ok(Self {
            log,
            entries,
            stale,
            sync_on_write,
        })
    }

    /// Returns the value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns true if the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or replaces a value.
    pub fn put(&mut self, key: &str, value: &str) -> StoreResult<()> {
        let record = serde_json::to_vec(&MapRecordRef {
            k: key,
            v: Some(value),
        })?;
        self.log.append(&record)?;
        if self
            .entries
            .insert(key.to_string(), value.to_string())
            .is_some()
        {
            self.stale += 1;
        }
        self.after_write()
    }

    /// Removes keys, writing all tombstones in one append.
    ///
    /// Returns how many keys were present.
    pub fn remove_many<'k, I>(&mut self, keys: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = &'k str>,
    {
        let present: Vec<&str> = keys
            .into_iter()
            .filter(|k| self.entries.contains_key(*k))
            .collect();
        if present.is_empty() {
            return Ok(0);
        }
        let records = present
            .iter()
            .map(|&k| serde_json::to_vec(&MapRecordRef { k, v: None }))
            .collect::<Result<Vec<_>, _>>()?;
        self.log.append_batch(records.iter().map(Vec::as_slice))?;
        for key in &present {
            self.entries.remove(*key);
        }
        self.stale += present.len() * 2;
        let removed = present.len();
        self.after_write()?;
        Ok(removed)
    }

    /// Removes one key. Returns true if it was present.
    pub fn remove(&mut self, key: &str) -> StoreResult<bool> {
        Ok(self.remove_many([key])? == 1)
    }

    /// Removes every key.
    pub fn clear(&mut self) -> StoreResult<()> {
        self.entries.clear();
        self.stale = 0;
        self.log.rewrite(std::iter::empty())?;
        Ok(())
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterates over entries whose key starts with `prefix`.
    pub fn iter_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrites the log with only the live entries.
    pub fn compact(&mut self) -> StoreResult<()> {
        let records = self
            .entries
            .iter()
            .map(|(k, v)| {
                serde_json::to_vec(&MapRecordRef {
                    k,
                    v: Some(v.as_str()),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.log.rewrite(records.iter().map(Vec::as_slice))?;
        self.stale = 0;
        Ok(())
    }

    fn after_write(&mut self) -> StoreResult<()> {
        if self.stale >= COMPACT_MIN_STALE && self.stale > self.entries.len() {
            self.compact()?;
        } else if self.sync_on_write {
            self.log.sync()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_storage::{encode_frame, InMemoryBackend};

    fn reopen(map: RecordMap<InMemoryBackend>) -> RecordMap<InMemoryBackend> {
        let data = map.log.read_all().unwrap();
        let mut bytes = Vec::new();
        for record in data {
            bytes.extend_from_slice(&encode_frame(&record).unwrap());
        }
        RecordMap::open(InMemoryBackend::with_data(bytes), false).unwrap()
    }

    #[test]
    fn put_get_remove_survive_reopen() {
        let mut map = RecordMap::open(InMemoryBackend::new(), false).unwrap();
        map.put("a", "1").unwrap();
        map.put("b", "2").unwrap();
        map.put("a", "3").unwrap();
        assert!(map.remove("b").unwrap());
        assert!(!map.remove("b").unwrap());

        let map = reopen(map);
        assert_eq!(map.get("a"), Some("3"));
        assert_eq!(map.get("b"), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn prefix_iteration() {
        let mut map = RecordMap::open(InMemoryBackend::new(), false).unwrap();
        map.put("s1/e1", "x").unwrap();
        map.put("s1/e2", "y").unwrap();
        map.put("s2/e3", "z").unwrap();
        let keys: Vec<&str> = map.iter_prefix("s1/").map(|(k, _)| k).collect();
        assert_eq!(keys, ["s1/e1", "s1/e2"]);
    }

    #[test]
    fn skips_undecodable_records() {
        let mut bytes = encode_frame(b"not json").unwrap();
        bytes.extend_from_slice(&encode_frame(br#"{"k":"a","v":"1"}"#).unwrap());
        let map = RecordMap::open(InMemoryBackend::with_data(bytes), false).unwrap();
        assert_eq!(map.get("a"), Some("1"));
    }

    #[test]
    fn compaction_keeps_live_entries() {
        let mut map = RecordMap::open(InMemoryBackend::new(), false).unwrap();
        for i in 0..(COMPACT_MIN_STALE + 10) {
            map.put("k", &i.to_string()).unwrap();
        }
        assert!(map.log.read_all().unwrap().len() < COMPACT_MIN_STALE);
        let map = reopen(map);
        assert_eq!(map.get("k"), Some((COMPACT_MIN_STALE + 9).to_string().as_str()));
    }

    #[test]
    fn clear_empties_log() {
        let mut map = RecordMap::open(InMemoryBackend::new(), false).unwrap();
        map.put("a", "1").unwrap();
        map.clear().unwrap();
        assert!(map.is_empty());
        assert!(map.log.read_all().unwrap().is_empty());
    }
}
