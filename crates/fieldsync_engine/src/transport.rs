//! Remote events API abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use fieldsync_events::{
    EnrolmentRecordEvent, EnrolmentRecordEventType, EventCount, RemoteEventQuery, UploadEventsBody,
};
use parking_lot::Mutex;
use std::fmt;
use tokio::sync::mpsc;

/// An open download.
#[derive(Debug)]
pub struct EventStream {
    /// Decoded records in server order. A structural error is the last item.
    pub receiver: mpsc::Receiver<SyncResult<EnrolmentRecordEvent>>,
    /// Record count announced by the server.
    pub total_count: Option<u64>,
    /// Whether `total_count` is only a lower bound.
    pub is_lower_bound: bool,
    /// Server request id, for audit.
    pub request_id: Option<String>,
}

/// Outcome of an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    /// HTTP status.
    pub status: u16,
    /// Server request id, for audit.
    pub request_id: Option<String>,
}

/// The remote events API.
///
/// Implementations map backend failures onto [`SyncError`] so the tasks
/// can classify them.
#[async_trait]
pub trait EventRemoteDataSource: Send + Sync {
    /// Counts the records a query would download.
    async fn count(&self, query: &RemoteEventQuery) -> SyncResult<Vec<EventCount>>;

    /// Opens a streamed download.
    async fn get_events(&self, query: &RemoteEventQuery) -> SyncResult<EventStream>;

    /// Uploads scopes and their events.
    async fn post(
        &self,
        project_id: &str,
        body: &UploadEventsBody,
        accept_invalid_events: bool,
    ) -> SyncResult<UploadResult>;

    /// Uploads raw JSON of scopes that no longer decode.
    async fn dump_invalid_events(&self, project_id: &str, events: Vec<String>) -> SyncResult<()>;
}

type ErrorFactory = Box<dyn Fn() -> SyncError + Send + Sync>;

#[derive(Default)]
struct MockState {
    records: Vec<EnrolmentRecordEvent>,
    counts: Vec<EventCount>,
    stream_error_after: Option<(usize, ErrorFactory)>,
    post_error: Option<ErrorFactory>,
    dump_error: Option<ErrorFactory>,
    posts: Vec<UploadEventsBody>,
    dumps: Vec<Vec<String>>,
    queries: Vec<RemoteEventQuery>,
}

/// A scripted remote for testing.
///
/// Downloads serve the configured records after the query cursor. Calls
/// are recorded for assertions.
#[derive(Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl fmt::Debug for MockRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockRemote")
            .field("records", &state.records.len())
            .field("posts", &state.posts.len())
            .field("dumps", &state.dumps.len())
            .finish()
    }
}

impl MockRemote {
    /// Creates a mock with nothing to download.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the records served by downloads.
    pub fn set_records(&self, records: Vec<EnrolmentRecordEvent>) {
        self.state.lock().records = records;
    }

    /// Sets the answer to count requests. Derived from the records if unset.
    pub fn set_counts(&self, counts: Vec<EventCount>) {
        self.state.lock().counts = counts;
    }

    /// Ends every download with an error after `records` records.
    pub fn fail_stream_after(
        &self,
        records: usize,
        error: impl Fn() -> SyncError + Send + Sync + 'static,
    ) {
        self.state.lock().stream_error_after = Some((records, Box::new(error)));
    }

    /// Makes uploads fail.
    pub fn fail_posts(&self, error: impl Fn() -> SyncError + Send + Sync + 'static) {
        self.state.lock().post_error = Some(Box::new(error));
    }

    /// Makes quarantine uploads fail.
    pub fn fail_dumps(&self, error: impl Fn() -> SyncError + Send + Sync + 'static) {
        self.state.lock().dump_error = Some(Box::new(error));
    }

    /// Clears every configured failure.
    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.stream_error_after = None;
        state.post_error = None;
        state.dump_error = None;
    }

    /// Returns the accepted upload bodies.
    pub fn posts(&self) -> Vec<UploadEventsBody> {
        self.state.lock().posts.clone()
    }

    /// Returns the accepted quarantine uploads.
    pub fn dumps(&self) -> Vec<Vec<String>> {
        self.state.lock().dumps.clone()
    }

    /// Returns the download queries received.
    pub fn queries(&self) -> Vec<RemoteEventQuery> {
        self.state.lock().queries.clone()
    }

    fn records_after(state: &MockState, cursor: Option<&str>) -> Vec<EnrolmentRecordEvent> {
        let start = cursor
            .and_then(|id| state.records.iter().position(|r| r.id == id))
            .map_or(0, |i| i + 1);
        state.records[start..].to_vec()
    }
}

#[async_trait]
impl EventRemoteDataSource for MockRemote {
    async fn count(&self, query: &RemoteEventQuery) -> SyncResult<Vec<EventCount>> {
        let state = self.state.lock();
        if !state.counts.is_empty() {
            return Ok(state.counts.clone());
        }
        let records = Self::records_after(&state, query.last_event_id.as_deref());
        let count_of = |event_type: EnrolmentRecordEventType| EventCount {
            event_type,
            count: u32::try_from(
                records
                    .iter()
                    .filter(|r| r.payload.event_type() == event_type)
                    .count(),
            )
            .unwrap_or(u32::MAX),
        };
        Ok(vec![
            count_of(EnrolmentRecordEventType::EnrolmentRecordCreation),
            count_of(EnrolmentRecordEventType::EnrolmentRecordDeletion),
            count_of(EnrolmentRecordEventType::EnrolmentRecordMove),
        ])
    }

    async fn get_events(&self, query: &RemoteEventQuery) -> SyncResult<EventStream> {
        let (records, error) = {
            let mut state = self.state.lock();
            state.queries.push(query.clone());
            let mut records = Self::records_after(&state, query.last_event_id.as_deref());
            let error = match &state.stream_error_after {
                Some((after, factory)) if *after < records.len() => {
                    records.truncate(*after);
                    Some(factory())
                }
                _ => None,
            };
            (records, error)
        };
        let total = records.len() as u64;
        let (tx, rx) = mpsc::channel(records.len() + 1);
        for record in records {
            let _ = tx.try_send(Ok(record));
        }
        if let Some(error) = error {
            let _ = tx.try_send(Err(error));
        }
        Ok(EventStream {
            receiver: rx,
            total_count: Some(total),
            is_lower_bound: false,
            request_id: Some(format!("mock-download-{}", self.state.lock().queries.len())),
        })
    }

    async fn post(
        &self,
        _project_id: &str,
        body: &UploadEventsBody,
        _accept_invalid_events: bool,
    ) -> SyncResult<UploadResult> {
        let mut state = self.state.lock();
        if let Some(factory) = &state.post_error {
            return Err(factory());
        }
        state.posts.push(body.clone());
        Ok(UploadResult {
            status: 201,
            request_id: Some(format!("mock-upload-{}", state.posts.len())),
        })
    }

    async fn dump_invalid_events(&self, _project_id: &str, events: Vec<String>) -> SyncResult<()> {
        let mut state = self.state.lock();
        if let Some(factory) = &state.dump_error {
            return Err(factory());
        }
        state.dumps.push(events);
        Ok(())
    }
}
