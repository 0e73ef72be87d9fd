//! Event data source on top of record files.

use crate::dir::StoreDir;
use crate::error::{StoreError, StoreResult};
use crate::map::RecordMap;
use crate::source::{EventFilter, EventLocalDataSource};
use fieldsync_events::{Event, EventScope, EventScopeType};
use fieldsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// [`RecordEventStore`] kept in memory.
pub type MemoryEventStore = RecordEventStore<InMemoryBackend>;

/// [`RecordEventStore`] persisted in a [`StoreDir`].
pub type FileEventStore = RecordEventStore<FileBackend>;

struct Inner<B: StorageBackend> {
    scopes: RecordMap<B>,
    /// Keyed by `"{scope_id}/{event_id}"`, values are raw event JSON.
    events: RecordMap<B>,
    /// Event id to owning scope id.
    event_scopes: HashMap<String, String>,
}

fn event_key(scope_id: &str, event_id: &str) -> String {
    format!("{scope_id}/{event_id}")
}

fn scope_prefix(scope_id: &str) -> String {
    format!("{scope_id}/")
}

impl<B: StorageBackend> Inner<B> {
    fn decoded_scopes(&self) -> Vec<EventScope> {
        let mut scopes: Vec<EventScope> = self
            .scopes
            .iter()
            .filter_map(|(id, json)| match EventScope::from_json(json) {
                Ok(scope) => Some(scope),
                Err(err) => {
                    warn!(scope_id = %id, error = %err, "skipping undecodable scope");
                    None
                }
            })
            .collect();
        scopes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        scopes
    }

    fn event_keys_of(&self, scope_id: &str) -> Vec<String> {
        let prefix = scope_prefix(scope_id);
        self.events
            .iter_prefix(&prefix)
            .map(|(k, _)| k.to_string())
            .collect()
    }
}

/// An [`EventLocalDataSource`] storing scopes and events in two record
/// maps, one per file.
pub struct RecordEventStore<B: StorageBackend> {
    inner: RwLock<Inner<B>>,
    _dir: Option<Arc<StoreDir>>,
}

impl<B: StorageBackend> std::fmt::Debug for RecordEventStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("RecordEventStore")
            .field("scopes", &inner.scopes.len())
            .field("events", &inner.events.len())
            .finish()
    }
}

impl<B: StorageBackend> RecordEventStore<B> {
    /// Opens a store over two backends, replaying both.
    pub fn open(scopes: B, events: B, sync_on_write: bool) -> StoreResult<Self> {
        let scopes = RecordMap::open(scopes, sync_on_write)?;
        let events = RecordMap::open(events, sync_on_write)?;
        let event_scopes = events
            .iter()
            .filter_map(|(key, _)| key.rsplit_once('/'))
            .map(|(scope_id, event_id)| (event_id.to_string(), scope_id.to_string()))
            .collect();
        debug!(
            scopes = scopes.len(),
            events = events.len(),
            "event store opened"
        );
        Ok(Self {
            inner: RwLock::new(Inner {
                scopes,
                events,
                event_scopes,
            }),
            _dir: None,
        })
    }

    /// Stores raw JSON as an event of `scope_id`, without decoding it.
    ///
    /// Used by importers and tests to reproduce records written by older
    /// app versions.
    pub fn insert_raw_event(&self, scope_id: &str, event_id: &str, json: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.events.put(&event_key(scope_id, event_id), json)?;
        inner
            .event_scopes
            .insert(event_id.to_string(), scope_id.to_string());
        Ok(())
    }

    /// Compacts both record files.
    pub fn compact(&self) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.scopes.compact()?;
        inner.events.compact()
    }
}

impl MemoryEventStore {
    /// Creates an empty in-memory store.
    pub fn in_memory() -> StoreResult<Self> {
        Self::open(InMemoryBackend::new(), InMemoryBackend::new(), false)
    }
}

impl FileEventStore {
    /// Opens the store files of a locked directory.
    pub fn open_dir(dir: Arc<StoreDir>, sync_on_write: bool) -> StoreResult<Self> {
        let mut store = Self::open(dir.scopes_backend()?, dir.events_backend()?, sync_on_write)?;
        store._dir = Some(dir);
        Ok(store)
    }
}

impl<B: StorageBackend> EventLocalDataSource for RecordEventStore<B> {
    fn insert_or_update_scope(&self, scope: &EventScope) -> StoreResult<()> {
        let json = scope.to_json()?;
        self.inner.write().scopes.put(&scope.id, &json)
    }

    fn load_scope(&self, id: &str) -> StoreResult<Option<EventScope>> {
        let inner = self.inner.read();
        match inner.scopes.get(id) {
            Some(json) => Ok(Some(EventScope::from_json(json)?)),
            None => Ok(None),
        }
    }

    fn load_open_scopes(&self, scope_type: EventScopeType) -> StoreResult<Vec<EventScope>> {
        let inner = self.inner.read();
        Ok(inner
            .decoded_scopes()
            .into_iter()
            .filter(|s| s.scope_type == scope_type && !s.closed)
            .collect())
    }

    fn load_closed_scopes(
        &self,
        scope_type: EventScopeType,
        limit: usize,
    ) -> StoreResult<Vec<EventScope>> {
        let inner = self.inner.read();
        Ok(inner
            .decoded_scopes()
            .into_iter()
            .filter(|s| s.scope_type == scope_type && s.closed)
            .take(limit)
            .collect())
    }

    fn count_scopes(&self, scope_type: EventScopeType) -> StoreResult<usize> {
        let inner = self.inner.read();
        Ok(inner
            .decoded_scopes()
            .iter()
            .filter(|s| s.scope_type == scope_type)
            .count())
    }

    fn count_closed_scopes(&self, scope_type: EventScopeType) -> StoreResult<usize> {
        let inner = self.inner.read();
        Ok(inner
            .decoded_scopes()
            .iter()
            .filter(|s| s.scope_type == scope_type && s.closed)
            .count())
    }

    fn delete_scope(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let keys = inner.event_keys_of(id);
        inner.events.remove_many(keys.iter().map(String::as_str))?;
        for key in &keys {
            if let Some((_, event_id)) = key.rsplit_once('/') {
                inner.event_scopes.remove(event_id);
            }
        }
        inner.scopes.remove(id)?;
        debug!(scope_id = %id, events = keys.len(), "scope deleted");
        Ok(())
    }

    fn insert_or_update_event(&self, event: &Event) -> StoreResult<()> {
        let scope_id = event
            .labels
            .scope_id
            .clone()
            .ok_or_else(|| StoreError::MissingScope {
                id: event.id.clone(),
            })?;
        let json = event.to_json()?;
        let mut inner = self.inner.write();
        if let Some(previous) = inner.event_scopes.get(&event.id).cloned() {
            if previous != scope_id {
                inner.events.remove(&event_key(&previous, &event.id))?;
            }
        }
        inner.events.put(&event_key(&scope_id, &event.id), &json)?;
        inner.event_scopes.insert(event.id.clone(), scope_id);
        Ok(())
    }

    fn load_event_jsons_from_scope(&self, scope_id: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.read();
        let prefix = scope_prefix(scope_id);
        Ok(inner
            .events
            .iter_prefix(&prefix)
            .map(|(_, json)| json.to_string())
            .collect())
    }

    fn delete_events(&self, ids: &[String]) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let keys: Vec<String> = ids
            .iter()
            .filter_map(|id| {
                inner
                    .event_scopes
                    .get(id)
                    .map(|scope_id| event_key(scope_id, id))
            })
            .collect();
        inner.events.remove_many(keys.iter().map(String::as_str))?;
        for id in ids {
            inner.event_scopes.remove(id);
        }
        Ok(())
    }

    fn count_events(&self, filter: &EventFilter) -> StoreResult<usize> {
        let inner = self.inner.read();
        let prefix = filter.scope_id.as_deref().map(scope_prefix);
        let jsons: Vec<&str> = match &prefix {
            Some(prefix) => inner.events.iter_prefix(prefix).map(|(_, v)| v).collect(),
            None => inner.events.iter().map(|(_, v)| v).collect(),
        };
        if filter.project_id.is_none() && filter.event_type.is_none() {
            return Ok(jsons.len());
        }
        Ok(jsons
            .into_iter()
            .filter_map(|json| Event::from_json(json).ok())
            .filter(|event| filter.matches(event))
            .count())
    }

    fn delete_all(&self) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.events.clear()?;
        inner.scopes.clear()?;
        inner.event_scopes.clear();
        Ok(())
    }
}
