//! A stateful fake of the remote events API.
//!
//! Unlike the scripted `MockRemote` of the engine, the fake keeps a remote
//! enrolment log: every uploaded enrolment becomes a creation record that
//! later downloads serve, so a device can sync with itself.

use async_trait::async_trait;
use fieldsync_engine::{
    EventRemoteDataSource, EventStream, SyncError, SyncResult, UploadResult,
};
use fieldsync_events::{
    EnrolmentRecordEvent, EnrolmentRecordEventType, EnrolmentRecordPayload, EventCount,
    EventPayload, RemoteEventQuery, UploadEventsBody,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

type ErrorFactory = Box<dyn Fn() -> SyncError + Send + Sync>;

#[derive(Default)]
struct BackendState {
    offline: bool,
    log: Vec<EnrolmentRecordEvent>,
    uploads: Vec<UploadEventsBody>,
    dumps: Vec<Vec<String>>,
    post_error: Option<ErrorFactory>,
    download_error: Option<ErrorFactory>,
    next_record: u64,
}

impl BackendState {
    fn append(&mut self, payload: EnrolmentRecordPayload) -> String {
        self.next_record += 1;
        let id = format!("rec-{}", self.next_record);
        self.log.push(EnrolmentRecordEvent {
            id: id.clone(),
            payload,
        });
        id
    }

    fn serve(&self, query: &RemoteEventQuery) -> Vec<EnrolmentRecordEvent> {
        let start = query
            .last_event_id
            .as_deref()
            .and_then(|cursor| self.log.iter().position(|r| r.id == cursor))
            .map_or(0, |i| i + 1);
        self.log[start..]
            .iter()
            .filter(|r| matches_query(&r.payload, query))
            .cloned()
            .collect()
    }
}

fn matches_query(payload: &EnrolmentRecordPayload, query: &RemoteEventQuery) -> bool {
    match payload {
        EnrolmentRecordPayload::EnrolmentRecordCreation {
            project_id,
            module_id,
            attendant_id,
            ..
        }
        | EnrolmentRecordPayload::EnrolmentRecordDeletion {
            project_id,
            module_id,
            attendant_id,
            ..
        } => {
            *project_id == query.project_id
                && query.module_id.as_ref().is_none_or(|m| m == module_id)
                && query.user_id.as_ref().is_none_or(|u| u == attendant_id)
        }
        EnrolmentRecordPayload::EnrolmentRecordMove { deletion, creation } => deletion
            .iter()
            .chain(creation.iter())
            .any(|side| matches_query(side, query)),
    }
}

/// An in-memory backend holding the remote enrolment log.
///
/// Going offline makes every call fail with a network error.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl std::fmt::Debug for FakeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FakeBackend")
            .field("offline", &state.offline)
            .field("log", &state.log.len())
            .field("uploads", &state.uploads.len())
            .finish_non_exhaustive()
    }
}

impl FakeBackend {
    /// Creates an online backend with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles connectivity.
    pub fn set_online(&self, online: bool) {
        self.state.lock().offline = !online;
    }

    /// Appends records written by other devices. Ids are kept as given.
    pub fn publish(&self, records: Vec<EnrolmentRecordEvent>) {
        self.state.lock().log.extend(records);
    }

    /// Appends a record and returns its generated id.
    pub fn append(&self, payload: EnrolmentRecordPayload) -> String {
        self.state.lock().append(payload)
    }

    /// Makes uploads fail until [`heal`](Self::heal).
    pub fn fail_posts(&self, error: impl Fn() -> SyncError + Send + Sync + 'static) {
        self.state.lock().post_error = Some(Box::new(error));
    }

    /// Makes downloads fail up front until [`heal`](Self::heal).
    pub fn fail_downloads(&self, error: impl Fn() -> SyncError + Send + Sync + 'static) {
        self.state.lock().download_error = Some(Box::new(error));
    }

    /// Clears every configured failure.
    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.post_error = None;
        state.download_error = None;
    }

    /// Returns the remote log.
    pub fn records(&self) -> Vec<EnrolmentRecordEvent> {
        self.state.lock().log.clone()
    }

    /// Returns the accepted upload bodies.
    pub fn uploads(&self) -> Vec<UploadEventsBody> {
        self.state.lock().uploads.clone()
    }

    /// Returns the ids of every accepted scope, in upload order.
    pub fn uploaded_scope_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .uploads
            .iter()
            .flat_map(UploadEventsBody::scope_ids)
            .collect()
    }

    /// Returns the accepted quarantine uploads.
    pub fn dumps(&self) -> Vec<Vec<String>> {
        self.state.lock().dumps.clone()
    }

    fn check_online(state: &BackendState) -> SyncResult<()> {
        if state.offline {
            return Err(SyncError::network("backend unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl EventRemoteDataSource for FakeBackend {
    async fn count(&self, query: &RemoteEventQuery) -> SyncResult<Vec<EventCount>> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        let records = state.serve(query);
        Ok([
            EnrolmentRecordEventType::EnrolmentRecordCreation,
            EnrolmentRecordEventType::EnrolmentRecordDeletion,
            EnrolmentRecordEventType::EnrolmentRecordMove,
        ]
        .into_iter()
        .map(|event_type| EventCount {
            event_type,
            count: u32::try_from(
                records
                    .iter()
                    .filter(|r| r.payload.event_type() == event_type)
                    .count(),
            )
            .unwrap_or(u32::MAX),
        })
        .collect())
    }

    async fn get_events(&self, query: &RemoteEventQuery) -> SyncResult<EventStream> {
        let records = {
            let state = self.state.lock();
            Self::check_online(&state)?;
            if let Some(factory) = &state.download_error {
                return Err(factory());
            }
            state.serve(query)
        };
        let (tx, rx) = mpsc::channel(records.len().max(1));
        let total = records.len() as u64;
        for record in records {
            let _ = tx.try_send(Ok(record));
        }
        Ok(EventStream {
            receiver: rx,
            total_count: Some(total),
            is_lower_bound: false,
            request_id: None,
        })
    }

    async fn post(
        &self,
        project_id: &str,
        body: &UploadEventsBody,
        _accept_invalid_events: bool,
    ) -> SyncResult<UploadResult> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        if let Some(factory) = &state.post_error {
            return Err(factory());
        }
        for upload in &body.sessions {
            for event in &upload.events {
                if let EventPayload::Enrolment(enrolment) = &event.payload {
                    state.append(EnrolmentRecordPayload::EnrolmentRecordCreation {
                        subject_id: enrolment.subject_id.clone(),
                        project_id: project_id.to_string(),
                        module_id: enrolment.module_id.clone(),
                        attendant_id: enrolment.attendant_id.clone(),
                        biometric_references: Vec::new(),
                    });
                }
            }
        }
        state.uploads.push(body.clone());
        Ok(UploadResult {
            status: 201,
            request_id: Some(format!("fake-upload-{}", state.uploads.len())),
        })
    }

    async fn dump_invalid_events(&self, _project_id: &str, events: Vec<String>) -> SyncResult<()> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        state.dumps.push(events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{creation_record, enrolment_event, TEST_MODULE, TEST_PROJECT};
    use fieldsync_events::{EventScope, EventScopePayload, EventScopeType, ScopeUpload, Timestamp};

    fn query(module_id: Option<&str>, last_event_id: Option<&str>) -> RemoteEventQuery {
        RemoteEventQuery {
            project_id: TEST_PROJECT.into(),
            user_id: None,
            module_id: module_id.map(String::from),
            subject_id: None,
            modes: Vec::new(),
            last_event_id: last_event_id.map(String::from),
        }
    }

    #[tokio::test]
    async fn uploaded_enrolments_become_records() {
        let backend = FakeBackend::new();
        let scope = EventScope::new(
            "s1",
            TEST_PROJECT,
            EventScopeType::Session,
            Timestamp(1),
            EventScopePayload::default(),
        );
        let body = UploadEventsBody::for_scope_type(
            EventScopeType::Session,
            vec![ScopeUpload {
                scope,
                events: vec![enrolment_event("subject-a", 2)],
            }],
        );
        backend.post(TEST_PROJECT, &body, true).await.unwrap();

        assert_eq!(backend.uploaded_scope_ids(), vec!["s1".to_string()]);
        let records = backend.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "rec-1");
        let subject = records[0].payload.to_subject().unwrap();
        assert_eq!(subject.subject_id, "subject-a");
    }

    #[tokio::test]
    async fn serves_after_cursor_and_filters_module() {
        let backend = FakeBackend::new();
        backend.publish(vec![
            creation_record("r1", "a", TEST_MODULE),
            creation_record("r2", "b", "other-module"),
            creation_record("r3", "c", TEST_MODULE),
        ]);

        let mut stream = backend
            .get_events(&query(Some(TEST_MODULE), Some("r1")))
            .await
            .unwrap();
        assert_eq!(stream.total_count, Some(1));
        let first = stream.receiver.recv().await.unwrap().unwrap();
        assert_eq!(first.id, "r3");
        assert!(stream.receiver.recv().await.is_none());

        let counts = backend.count(&query(None, None)).await.unwrap();
        assert_eq!(counts[0].count, 3);
    }

    #[tokio::test]
    async fn offline_backend_fails_with_network_errors() {
        let backend = FakeBackend::new();
        backend.set_online(false);
        let err = backend.count(&query(None, None)).await.unwrap_err();
        assert!(err.is_retryable());
        backend.set_online(true);
        assert!(backend.count(&query(None, None)).await.is_ok());
    }
}
