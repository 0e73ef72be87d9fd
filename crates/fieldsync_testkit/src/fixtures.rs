//! Test fixtures and store helpers.
//!
//! Provides event stores with a manual clock, builders for common events
//! and remote records, and a harness wiring the whole sync engine onto a
//! [`FakeBackend`].

use crate::backend::FakeBackend;
use fieldsync_engine::{
    BackoffPolicy, ManualNetwork, MemorySubjectRepository, ProjectConfiguration,
    StaticConfigProvider, StaticSecurity, SyncConfig, SyncContext, SyncOrchestrator, SyncState,
    SyncSummary, TokioScheduler,
};
use fieldsync_events::{
    ConsentPayload, ConsentResult, EnrolmentPayload, EnrolmentRecordEvent,
    EnrolmentRecordPayload, Event, EventPayload, EventScope, GuidSelectionPayload, Timestamp,
};
use fieldsync_store::{
    EventLocalDataSource, EventRepository, FileEventStore, KeyValueStore, ManualClock,
    MemoryEventStore, RecordKeyValueStore, StaticLogin, StoreConfig, StoreDir,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Project the fixtures sign in to.
pub const TEST_PROJECT: &str = "project-1";
/// User the fixtures sign in as.
pub const TEST_USER: &str = "user-1";
/// Module used by the event builders.
pub const TEST_MODULE: &str = "module-1";
/// Device id stamped on fixture scopes.
pub const TEST_DEVICE: &str = "device-1";

/// An event store with automatic cleanup.
pub struct TestStore {
    /// The repository, the only writer of the store.
    pub repo: Arc<EventRepository>,
    /// Key-value store for sync state.
    pub kv: Arc<dyn KeyValueStore>,
    /// Clock of the repository, starting at 1000ms.
    pub clock: Arc<ManualClock>,
    /// Signed-in identity.
    pub login: Arc<StaticLogin>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl std::fmt::Debug for TestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestStore")
            .field("path", &self.path())
            .finish_non_exhaustive()
    }
}

impl TestStore {
    /// Creates an in-memory store signed in to [`TEST_PROJECT`].
    pub fn memory() -> Self {
        let events = MemoryEventStore::in_memory().expect("Failed to open in-memory event store");
        let kv = RecordKeyValueStore::in_memory().expect("Failed to open in-memory sync state");
        Self::assemble(Arc::new(events), Arc::new(kv), None)
    }

    /// Creates a file-based store in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = Arc::new(
            StoreDir::open(temp_dir.path(), true).expect("Failed to open store directory"),
        );
        let events =
            FileEventStore::open_dir(dir.clone(), false).expect("Failed to open event store");
        let kv = RecordKeyValueStore::open_dir(dir, false).expect("Failed to open sync state");
        Self::assemble(Arc::new(events), Arc::new(kv), Some(temp_dir))
    }

    fn assemble(
        events: Arc<dyn EventLocalDataSource>,
        kv: Arc<dyn KeyValueStore>,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(1_000));
        let login = Arc::new(StaticLogin::signed_in(TEST_PROJECT, TEST_USER));
        let repo = Arc::new(EventRepository::new(
            StoreConfig::new(TEST_DEVICE),
            events,
            login.clone(),
            clock.clone(),
        ));
        Self {
            repo,
            kv,
            clock,
            login,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Records `events` in a new session and closes it.
    pub fn closed_session(&self, events: Vec<Event>) -> EventScope {
        let session = self.repo.create_session().expect("Failed to create session");
        for event in events {
            self.repo
                .add_or_update_event(event)
                .expect("Failed to add event");
        }
        self.repo
            .close_current_session(None)
            .expect("Failed to close session");
        self.repo
            .get_event_scope(&session.id)
            .expect("Failed to load session")
            .expect("Session vanished")
    }
}

impl std::ops::Deref for TestStore {
    type Target = EventRepository;

    fn deref(&self) -> &Self::Target {
        &self.repo
    }
}

/// Builds an accepted consent event created at `at` millis.
pub fn consent_event(at: u64) -> Event {
    Event::new(EventPayload::Consent(ConsentPayload {
        created_at: Timestamp(at),
        ended_at: Timestamp(at + 1),
        result: ConsentResult::Accepted,
    }))
}

/// Builds the enrolment of `subject_id` into [`TEST_MODULE`] by [`TEST_USER`].
pub fn enrolment_event(subject_id: &str, at: u64) -> Event {
    Event::new(EventPayload::Enrolment(EnrolmentPayload {
        created_at: Timestamp(at),
        subject_id: subject_id.to_string(),
        project_id: TEST_PROJECT.to_string(),
        module_id: TEST_MODULE.to_string(),
        attendant_id: TEST_USER.to_string(),
        person_creation_id: format!("creation-{subject_id}"),
    }))
}

/// Builds the selection of `selected_id` after an identification.
pub fn guid_selection_event(selected_id: &str, at: u64) -> Event {
    Event::new(EventPayload::GuidSelection(GuidSelectionPayload {
        created_at: Timestamp(at),
        selected_id: selected_id.to_string(),
    }))
}

/// Builds a remote creation of `subject_id` in [`TEST_PROJECT`].
pub fn creation_record(id: &str, subject_id: &str, module_id: &str) -> EnrolmentRecordEvent {
    EnrolmentRecordEvent {
        id: id.to_string(),
        payload: EnrolmentRecordPayload::EnrolmentRecordCreation {
            subject_id: subject_id.to_string(),
            project_id: TEST_PROJECT.to_string(),
            module_id: module_id.to_string(),
            attendant_id: TEST_USER.to_string(),
            biometric_references: Vec::new(),
        },
    }
}

/// Builds a remote deletion of `subject_id` in [`TEST_PROJECT`].
pub fn deletion_record(id: &str, subject_id: &str, module_id: &str) -> EnrolmentRecordEvent {
    EnrolmentRecordEvent {
        id: id.to_string(),
        payload: EnrolmentRecordPayload::EnrolmentRecordDeletion {
            subject_id: subject_id.to_string(),
            project_id: TEST_PROJECT.to_string(),
            module_id: module_id.to_string(),
            attendant_id: TEST_USER.to_string(),
        },
    }
}

/// The sync engine wired onto a [`FakeBackend`] and an in-memory store.
///
/// Retries back off 1ms at most twice so failure paths settle quickly.
pub struct SyncHarness {
    /// Local store.
    pub store: TestStore,
    /// Remote.
    pub backend: Arc<FakeBackend>,
    /// Local subjects written by down-sync.
    pub subjects: Arc<MemorySubjectRepository>,
    /// Project settings.
    pub provider: Arc<StaticConfigProvider>,
    /// Root check answer.
    pub security: Arc<StaticSecurity>,
    /// Connectivity seen by the scheduler.
    pub network: Arc<ManualNetwork>,
    /// Services shared by the tasks.
    pub ctx: SyncContext,
    /// The orchestrator under test.
    pub orchestrator: SyncOrchestrator,
}

impl std::fmt::Debug for SyncHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHarness")
            .field("store", &self.store)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl Default for SyncHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncHarness {
    /// Creates a harness syncing the whole of [`TEST_PROJECT`].
    pub fn new() -> Self {
        Self::with_configuration(ProjectConfiguration::new(TEST_PROJECT))
    }

    /// Creates a harness with custom project settings.
    pub fn with_configuration(configuration: ProjectConfiguration) -> Self {
        Self::build(TestStore::memory(), configuration, Self::fast_config())
    }

    /// Creates a harness with custom engine settings.
    pub fn with_sync_config(configuration: ProjectConfiguration, config: SyncConfig) -> Self {
        Self::build(TestStore::memory(), configuration, config)
    }

    fn fast_config() -> SyncConfig {
        SyncConfig::default().with_backoff(BackoffPolicy::linear(Duration::from_millis(1), 2))
    }

    fn build(store: TestStore, configuration: ProjectConfiguration, config: SyncConfig) -> Self {
        let backend = Arc::new(FakeBackend::new());
        let subjects = Arc::new(MemorySubjectRepository::new());
        let provider = Arc::new(StaticConfigProvider::new(configuration));
        let security = Arc::new(StaticSecurity::new());
        let network = Arc::new(ManualNetwork::new(true));
        let ctx = SyncContext::new(
            store.repo.clone(),
            backend.clone(),
            subjects.clone(),
            store.login.clone(),
            provider.clone(),
            store.kv.clone(),
        )
        .with_config(config);
        let orchestrator = SyncOrchestrator::new(
            ctx.clone(),
            Arc::new(TokioScheduler::new(network.clone())),
            security.clone(),
        );
        Self {
            store,
            backend,
            subjects,
            provider,
            security,
            network,
            ctx,
            orchestrator,
        }
    }

    /// Starts a sync and waits until it is no longer pending.
    pub async fn run_sync(&self) -> SyncSummary {
        self.orchestrator.sync().await.expect("Failed to start sync");
        self.settle().await
    }

    /// Waits until the last sync is no longer pending.
    pub async fn settle(&self) -> SyncSummary {
        for _ in 0..5_000 {
            let summary = self
                .orchestrator
                .last_sync_state()
                .expect("Failed to read sync state");
            if !matches!(summary.state, SyncState::Running | SyncState::Enqueued) {
                return summary;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("sync did not settle");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_events::EventScopeType;

    #[test]
    fn memory_store_has_no_path() {
        let store = TestStore::memory();
        assert!(store.path().is_none());
        assert_eq!(store.current_project(), TEST_PROJECT);
    }

    #[test]
    fn closed_session_holds_its_events() {
        let store = TestStore::file();
        assert!(store.path().is_some());
        let scope = store.closed_session(vec![consent_event(5), enrolment_event("s1", 6)]);
        assert!(scope.closed);
        assert_eq!(store.get_events_from_scope(&scope.id).unwrap().len(), 2);
        assert_eq!(
            store
                .get_closed_event_scope_count(EventScopeType::Session)
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn harness_syncs_an_empty_project() {
        let harness = SyncHarness::new();
        let summary = harness.run_sync().await;
        assert_eq!(summary.state, SyncState::Complete);
        assert!(harness.backend.uploads().is_empty());
    }
}
