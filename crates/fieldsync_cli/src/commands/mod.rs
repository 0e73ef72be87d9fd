//! CLI command implementations.

pub mod close_session;
pub mod compact;
pub mod dump_scope;
pub mod inspect;
pub mod progress;

use fieldsync_store::{
    EventRepository, FileEventStore, KeyValueStore, RecordKeyValueStore, StaticLogin,
    StoreConfig, StoreDir, StoreResult, SystemClock,
};
use std::path::Path;
use std::sync::Arc;

/// Device id stamped on scopes the CLI creates.
const CLI_DEVICE_ID: &str = "fieldsync-cli";

/// A store directory opened for maintenance.
///
/// Holds the directory lock until dropped, so a running app cannot write
/// concurrently.
pub struct OpenedStore {
    /// Repository over the store, signed out.
    pub repo: EventRepository,
    /// The event files.
    pub events: Arc<FileEventStore>,
    /// Sync state.
    pub kv: Arc<dyn KeyValueStore>,
}

/// Opens an existing store directory.
pub fn open(path: &Path) -> StoreResult<OpenedStore> {
    open_dir(path, false)
}

#[cfg(test)]
pub(crate) fn open_or_create(path: &Path) -> StoreResult<OpenedStore> {
    open_dir(path, true)
}

fn open_dir(path: &Path, create_if_missing: bool) -> StoreResult<OpenedStore> {
    let dir = Arc::new(StoreDir::open(path, create_if_missing)?);
    let events = Arc::new(FileEventStore::open_dir(dir.clone(), true)?);
    let kv: Arc<dyn KeyValueStore> = Arc::new(RecordKeyValueStore::open_dir(dir, true)?);
    let repo = EventRepository::new(
        StoreConfig::new(CLI_DEVICE_ID),
        events.clone(),
        Arc::new(StaticLogin::signed_out()),
        Arc::new(SystemClock),
    );
    Ok(OpenedStore { repo, events, kv })
}
