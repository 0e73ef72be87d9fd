//! Integration tests for the file-backed store.

use fieldsync_events::{
    ArtificialTerminationReason, ConsentPayload, ConsentResult, Event, EventPayload,
    EventScopeType, Timestamp,
};
use fieldsync_store::{
    EventFilter, EventLocalDataSource, EventRepository, FileEventStore, ManualClock,
    RecordKeyValueStore, StaticLogin, StoreConfig, StoreDir, SyncProgressCache,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn consent() -> Event {
    Event::new(EventPayload::Consent(ConsentPayload {
        created_at: Timestamp(1),
        ended_at: Timestamp(2),
        result: ConsentResult::Accepted,
    }))
}

struct Opened {
    repo: EventRepository,
    store: Arc<FileEventStore>,
    progress: SyncProgressCache,
}

fn open(path: &Path) -> Opened {
    let dir = Arc::new(StoreDir::open(path, true).unwrap());
    let store = Arc::new(FileEventStore::open_dir(dir.clone(), true).unwrap());
    let kv = Arc::new(RecordKeyValueStore::open_dir(dir, true).unwrap());
    let repo = EventRepository::new(
        StoreConfig::new("device-1"),
        store.clone(),
        Arc::new(StaticLogin::signed_in("p1", "u1")),
        Arc::new(ManualClock::new(10)),
    );
    Opened {
        repo,
        store,
        progress: SyncProgressCache::new(kv),
    }
}

#[test]
fn open_session_is_resumed_after_restart() {
    let root = tempdir().unwrap();
    let first_scope = {
        let opened = open(root.path());
        let event = opened.repo.add_or_update_event(consent()).unwrap();
        opened.progress.save_progress("stage-1", 7).unwrap();
        event.labels.scope_id.unwrap()
    };

    let opened = open(root.path());
    let event = opened.repo.add_or_update_event(consent()).unwrap();
    assert_eq!(event.labels.scope_id.as_deref(), Some(first_scope.as_str()));
    assert_eq!(
        opened
            .repo
            .local_count(&EventFilter::all().with_scope(first_scope.clone()))
            .unwrap(),
        2
    );
    assert_eq!(opened.progress.read_progress("stage-1").unwrap(), 7);
}

#[test]
fn closed_sessions_wait_for_upload_across_restarts() {
    let root = tempdir().unwrap();
    {
        let opened = open(root.path());
        opened.repo.add_or_update_event(consent()).unwrap();
        opened
            .repo
            .close_current_session(Some(ArtificialTerminationReason::TimedOut))
            .unwrap();
    }

    let opened = open(root.path());
    let closed = opened
        .repo
        .get_closed_event_scopes(EventScopeType::Session, 10)
        .unwrap();
    assert_eq!(closed.len(), 1);
    let events = opened.repo.get_events_from_scope(&closed[0].id).unwrap();
    assert_eq!(events.len(), 2);

    opened.repo.delete_event_scope(&closed[0].id).unwrap();
    assert_eq!(
        opened
            .store
            .count_closed_scopes(EventScopeType::Session)
            .unwrap(),
        0
    );
}

#[test]
fn directory_is_exclusive() {
    let root = tempdir().unwrap();
    let _opened = open(root.path());
    assert!(StoreDir::open(root.path(), true).is_err());
}
