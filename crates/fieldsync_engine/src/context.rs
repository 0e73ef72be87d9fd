//! Services shared by the sync tasks.

use crate::config::SyncConfig;
use crate::project::ConfigProvider;
use crate::subjects::SubjectRepository;
use crate::transport::EventRemoteDataSource;
use fieldsync_events::Timestamp;
use fieldsync_store::{
    DownSyncOperationRepository, EventRepository, KeyValueStore, LoginInfo, SyncProgressCache,
    UpSyncOperationRepository,
};
use std::fmt;
use std::sync::Arc;

/// Everything a sync run reads from or writes to.
///
/// Cheap to clone: every field is shared.
#[derive(Clone)]
pub struct SyncContext {
    /// Local events.
    pub events: Arc<EventRepository>,
    /// Remote events API.
    pub remote: Arc<dyn EventRemoteDataSource>,
    /// Local subjects.
    pub subjects: Arc<dyn SubjectRepository>,
    /// Signed-in identity.
    pub login: Arc<dyn LoginInfo>,
    /// Project settings.
    pub config_provider: Arc<dyn ConfigProvider>,
    /// Progress counters.
    pub progress: SyncProgressCache,
    /// Download cursors.
    pub down_operations: DownSyncOperationRepository,
    /// Upload progress.
    pub up_operations: UpSyncOperationRepository,
    /// Engine settings.
    pub config: Arc<SyncConfig>,
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    /// Creates a context. Sync state (progress and cursors) lives in `kv`.
    pub fn new(
        events: Arc<EventRepository>,
        remote: Arc<dyn EventRemoteDataSource>,
        subjects: Arc<dyn SubjectRepository>,
        login: Arc<dyn LoginInfo>,
        config_provider: Arc<dyn ConfigProvider>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            events,
            remote,
            subjects,
            login,
            config_provider,
            progress: SyncProgressCache::new(kv.clone()),
            down_operations: DownSyncOperationRepository::new(kv.clone()),
            up_operations: UpSyncOperationRepository::new(kv),
            config: Arc::new(SyncConfig::default()),
        }
    }

    /// Sets the engine settings.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Returns the current time of the event store clock.
    pub fn now(&self) -> Timestamp {
        self.events.clock().now()
    }
}
