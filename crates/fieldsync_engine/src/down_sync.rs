//! Download of remote enrolment records.

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::subjects::SubjectAction;
use crate::SYNC_LOG_TARGET;
use async_stream::{stream, try_stream};
use fieldsync_events::{
    DownSyncOperation, DownSyncPartition, DownSyncRequestPayload, EnrolmentRecordEvent,
    EnrolmentRecordPayload, Event, EventPayload, EventScope, RemoteEventQuery, Subject,
    SyncOperationState,
};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One applied batch of a download run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownSyncProgress {
    /// Operation after the batch, already persisted.
    pub operation: DownSyncOperation,
    /// Records read so far.
    pub progress: u64,
    /// Records the server announced, if known.
    pub max_progress: Option<u64>,
    /// Subjects created so far.
    pub created: u64,
    /// Subjects deleted so far.
    pub deleted: u64,
}

enum DownSyncStep {
    Opened { request_id: Option<String> },
    Batch(DownSyncProgress),
}

/// Streams one partition of the remote log into the subject repository.
///
/// The cursor is persisted after each applied batch, so a failed run
/// resumes after the last record it applied.
#[derive(Debug, Clone)]
pub struct EventDownSyncTask {
    ctx: SyncContext,
}

impl EventDownSyncTask {
    /// Creates a task.
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Runs a download.
    ///
    /// Yields one item per applied batch and a final item whose operation
    /// is `Complete`. On failure the operation is stored as `Failed` with
    /// the cursor of the last applied batch and the stream ends with the
    /// error. Either way an `EventDownSyncRequest` event is recorded in the
    /// tracking scope.
    pub fn down_sync(
        &self,
        operation: DownSyncOperation,
        tracking_scope: Option<EventScope>,
    ) -> BoxStream<'static, SyncResult<DownSyncProgress>> {
        let task = self.clone();
        Box::pin(stream! {
            let started = task.ctx.now();
            let query = operation.query();
            let mut op = operation;
            op.state = SyncOperationState::Running;
            if let Err(err) = task.ctx.down_operations.save(&op) {
                yield Err(SyncError::from(err));
                return;
            }

            let mut request_id = None;
            let mut last: Option<DownSyncProgress> = None;
            let mut failure = None;
            let mut inner = Box::pin(task.clone().apply_records(op.clone()));
            while let Some(step) = inner.next().await {
                match step {
                    Ok(DownSyncStep::Opened { request_id: id }) => request_id = id,
                    Ok(DownSyncStep::Batch(progress)) => {
                        op = progress.operation.clone();
                        last = Some(progress.clone());
                        yield Ok(progress);
                    }
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            let ended = task.ctx.now();
            op.state = if failure.is_some() {
                SyncOperationState::Failed
            } else {
                SyncOperationState::Complete
            };
            op.last_sync_time = Some(ended);
            if let Err(err) = task.ctx.down_operations.save(&op) {
                yield Err(SyncError::from(err));
                return;
            }

            let read = last.as_ref().map_or(0, |p| p.progress);
            task.audit(
                tracking_scope.as_ref(),
                DownSyncRequestPayload {
                    created_at: started,
                    ended_at: ended,
                    request_id: request_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                    query: query_string(&query),
                    event_read: read,
                    response_status: failure.as_ref().and_then(SyncError::status),
                    error_type: failure.as_ref().map(|e| e.kind().to_string()),
                },
            );

            match failure {
                None => {
                    info!(target: SYNC_LOG_TARGET, partition = %op.key(), read, "down-sync finished");
                    yield Ok(DownSyncProgress {
                        operation: op,
                        progress: read,
                        max_progress: last.as_ref().and_then(|p| p.max_progress),
                        created: last.as_ref().map_or(0, |p| p.created),
                        deleted: last.as_ref().map_or(0, |p| p.deleted),
                    });
                }
                Some(err) => {
                    warn!(target: SYNC_LOG_TARGET, partition = %op.key(), read, error = %err, "down-sync failed");
                    yield Err(err);
                }
            }
        })
    }

    fn apply_records(
        self,
        mut op: DownSyncOperation,
    ) -> impl Stream<Item = SyncResult<DownSyncStep>> + Send + 'static {
        try_stream! {
            let query = op.query();
            let estimate = match self.ctx.remote.count(&query).await {
                Ok(counts) => Some(counts.iter().map(|c| u64::from(c.count)).sum::<u64>()),
                Err(err) if err.is_fatal() => Err::<Option<u64>, SyncError>(err)?,
                Err(err) => {
                    debug!(target: SYNC_LOG_TARGET, error = %err, "count failed, downloading without estimate");
                    None
                }
            };

            let stream = self.ctx.remote.get_events(&query).await?;
            let max_progress = stream.total_count.or(estimate);
            yield DownSyncStep::Opened { request_id: stream.request_id.clone() };

            let batch_size = self.ctx.config.down_sync_batch_size;
            let mut receiver = stream.receiver;
            let mut batch = Vec::with_capacity(batch_size);
            let mut progress = DownSyncProgress {
                operation: op.clone(),
                progress: 0,
                max_progress,
                created: 0,
                deleted: 0,
            };
            while let Some(record) = receiver.recv().await {
                batch.push(record?);
                if batch.len() >= batch_size {
                    self.apply_batch(&mut op, &mut progress, std::mem::take(&mut batch))?;
                    yield DownSyncStep::Batch(progress.clone());
                }
            }
            if !batch.is_empty() {
                self.apply_batch(&mut op, &mut progress, batch)?;
                yield DownSyncStep::Batch(progress.clone());
            }
        }
    }

    fn apply_batch(
        &self,
        op: &mut DownSyncOperation,
        progress: &mut DownSyncProgress,
        records: Vec<EnrolmentRecordEvent>,
    ) -> SyncResult<()> {
        let Some(last_id) = records.last().map(|r| r.id.clone()) else {
            return Ok(());
        };
        let actions: Vec<SubjectAction> = records
            .iter()
            .flat_map(|record| actions_for(&op.partition, &record.payload))
            .collect();
        self.ctx.subjects.perform_actions(&actions)?;

        op.last_event_id = Some(last_id);
        op.last_sync_time = Some(self.ctx.now());
        self.ctx.down_operations.save(op)?;

        progress.progress += records.len() as u64;
        for action in &actions {
            match action {
                SubjectAction::Creation(_) => progress.created += 1,
                SubjectAction::Deletion(_) => progress.deleted += 1,
            }
        }
        progress.operation = op.clone();
        debug!(
            target: SYNC_LOG_TARGET,
            partition = %op.key(),
            applied = records.len(),
            "down-sync batch applied"
        );
        Ok(())
    }

    fn audit(&self, tracking_scope: Option<&EventScope>, payload: DownSyncRequestPayload) {
        let Some(scope) = tracking_scope else {
            return;
        };
        let event = Event::new(EventPayload::EventDownSyncRequest(payload));
        if let Err(err) = self.ctx.events.add_or_update_event_in_scope(scope, event) {
            warn!(target: SYNC_LOG_TARGET, scope_id = %scope.id, error = %err, "could not record download request");
        }
    }
}

/// Returns the subject changes a record makes within a partition.
///
/// A move always deletes its source. Its destination is created only if it
/// still falls within the partition being downloaded.
pub fn actions_for(
    partition: &DownSyncPartition,
    payload: &EnrolmentRecordPayload,
) -> Vec<SubjectAction> {
    match payload {
        EnrolmentRecordPayload::EnrolmentRecordCreation { .. } => {
            payload.to_subject().map(SubjectAction::Creation).into_iter().collect()
        }
        EnrolmentRecordPayload::EnrolmentRecordDeletion { subject_id, .. } => {
            vec![SubjectAction::Deletion(subject_id.clone())]
        }
        EnrolmentRecordPayload::EnrolmentRecordMove { deletion, creation } => {
            let mut actions = Vec::new();
            if let Some(EnrolmentRecordPayload::EnrolmentRecordDeletion { subject_id, .. }) =
                deletion.as_deref()
            {
                actions.push(SubjectAction::Deletion(subject_id.clone()));
            }
            if let Some(creation) = creation.as_deref() {
                if let Some(subject) = creation.to_subject() {
                    if in_partition(partition, &subject) {
                        actions.push(SubjectAction::Creation(subject));
                    }
                }
            }
            actions
        }
    }
}

fn in_partition(partition: &DownSyncPartition, subject: &Subject) -> bool {
    subject.project_id == partition.project_id
        && partition
            .module_id
            .as_ref()
            .map_or(true, |m| *m == subject.module_id)
        && partition
            .user_id
            .as_ref()
            .map_or(true, |u| *u == subject.attendant_id)
}

fn query_string(query: &RemoteEventQuery) -> String {
    let pairs: Vec<String> = query
        .query_pairs()
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    format!("projectId={}&{}", query.project_id, pairs.join("&"))
        .trim_end_matches('&')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::project::{ProjectConfiguration, StaticConfigProvider};
    use crate::subjects::{MemorySubjectRepository, SubjectRepository};
    use crate::transport::MockRemote;
    use fieldsync_events::{EventScopeType, EventType};
    use fieldsync_store::{
        EventFilter, EventRepository, ManualClock, MemoryEventStore, RecordKeyValueStore,
        StaticLogin, StoreConfig,
    };
    use std::sync::Arc;

    struct Fixture {
        task: EventDownSyncTask,
        ctx: SyncContext,
        remote: Arc<MockRemote>,
        subjects: Arc<MemorySubjectRepository>,
    }

    fn fixture(batch_size: usize) -> Fixture {
        let login = Arc::new(StaticLogin::signed_in("p1", "u1"));
        let repo = Arc::new(EventRepository::new(
            StoreConfig::new("device-1"),
            Arc::new(MemoryEventStore::in_memory().unwrap()),
            login.clone(),
            Arc::new(ManualClock::new(100)),
        ));
        let remote = Arc::new(MockRemote::new());
        let subjects = Arc::new(MemorySubjectRepository::new());
        let ctx = SyncContext::new(
            repo,
            remote.clone(),
            subjects.clone(),
            login,
            Arc::new(StaticConfigProvider::new(ProjectConfiguration::new("p1"))),
            Arc::new(RecordKeyValueStore::in_memory().unwrap()),
        )
        .with_config(SyncConfig::default().with_down_sync_batch_size(batch_size));
        Fixture {
            task: EventDownSyncTask::new(ctx.clone()),
            ctx,
            remote,
            subjects,
        }
    }

    fn creation(subject: &str, module: &str) -> EnrolmentRecordPayload {
        EnrolmentRecordPayload::EnrolmentRecordCreation {
            subject_id: subject.into(),
            project_id: "p1".into(),
            module_id: module.into(),
            attendant_id: "u1".into(),
            biometric_references: vec![],
        }
    }

    fn created(id: &str) -> EnrolmentRecordEvent {
        EnrolmentRecordEvent {
            id: id.into(),
            payload: creation(&format!("subject-{id}"), "m1"),
        }
    }

    fn deleted(id: &str, subject: &str) -> EnrolmentRecordEvent {
        EnrolmentRecordEvent {
            id: id.into(),
            payload: EnrolmentRecordPayload::EnrolmentRecordDeletion {
                subject_id: subject.into(),
                project_id: "p1".into(),
                module_id: "m1".into(),
                attendant_id: "u1".into(),
            },
        }
    }

    fn operation() -> DownSyncOperation {
        DownSyncOperation::new(DownSyncPartition::project("p1", vec![]))
    }

    #[tokio::test]
    async fn applies_records_in_batches() {
        let f = fixture(2);
        f.remote.set_records(vec![
            created("e1"),
            created("e2"),
            created("e3"),
            deleted("e4", "subject-e1"),
        ]);

        let items: Vec<_> = f.task.down_sync(operation(), None).collect().await;
        let progress: Vec<u64> = items.iter().map(|i| i.as_ref().unwrap().progress).collect();
        assert_eq!(progress, vec![2, 4, 4]);

        let last = items.last().unwrap().as_ref().unwrap();
        assert_eq!(last.operation.state, SyncOperationState::Complete);
        assert_eq!(last.operation.last_event_id.as_deref(), Some("e4"));
        assert_eq!(last.created, 3);
        assert_eq!(last.deleted, 1);
        assert_eq!(last.max_progress, Some(4));
        assert_eq!(f.subjects.subject_ids(), vec!["subject-e2", "subject-e3"]);
    }

    #[tokio::test]
    async fn failure_keeps_cursor_of_last_batch() {
        let f = fixture(2);
        f.remote.set_records(vec![created("e1"), created("e2"), created("e3"), created("e4")]);
        f.remote.fail_stream_after(3, || SyncError::network("reset"));

        let items: Vec<_> = f.task.down_sync(operation(), None).collect().await;
        assert!(matches!(items.last().unwrap(), Err(SyncError::Network(_))));

        let stored = f
            .ctx
            .down_operations
            .load(&operation().partition)
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, SyncOperationState::Failed);
        assert_eq!(stored.last_event_id.as_deref(), Some("e2"));
        assert_eq!(f.subjects.count(None).unwrap(), 2);

        f.remote.heal();
        let items: Vec<_> = f.task.down_sync(stored, None).collect().await;
        assert!(items.iter().all(Result::is_ok));
        assert_eq!(
            f.remote.queries().last().unwrap().last_event_id.as_deref(),
            Some("e2")
        );
        assert_eq!(f.subjects.count(None).unwrap(), 4);
    }

    #[tokio::test]
    async fn request_is_audited_in_tracking_scope() {
        let f = fixture(10);
        f.remote.set_records(vec![created("e1")]);
        let scope = f
            .ctx
            .events
            .create_event_scope(EventScopeType::DownSync, None)
            .unwrap();

        let _: Vec<_> = f.task.down_sync(operation(), Some(scope.clone())).collect().await;
        let events = f.ctx.events.get_events_from_scope(&scope.id).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            EventPayload::EventDownSyncRequest(request) => {
                assert_eq!(request.event_read, 1);
                assert!(request.error_type.is_none());
                assert_eq!(request.query, "projectId=p1");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            f.ctx
                .events
                .local_count(&EventFilter::all().with_type(EventType::EventDownSyncRequest))
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn empty_download_completes() {
        let f = fixture(10);
        let items: Vec<_> = f.task.down_sync(operation(), None).collect().await;
        assert_eq!(items.len(), 1);
        let last = items[0].as_ref().unwrap();
        assert_eq!(last.operation.state, SyncOperationState::Complete);
        assert_eq!(last.progress, 0);
        assert!(last.operation.last_event_id.is_none());
    }

    #[test]
    fn move_creates_only_within_partition() {
        let partition = DownSyncPartition::module("p1", "m1", vec![]);
        let moved = |to_module: &str| EnrolmentRecordPayload::EnrolmentRecordMove {
            deletion: Some(Box::new(EnrolmentRecordPayload::EnrolmentRecordDeletion {
                subject_id: "s1".into(),
                project_id: "p1".into(),
                module_id: "m0".into(),
                attendant_id: "u1".into(),
            })),
            creation: Some(Box::new(creation("s1", to_module))),
        };

        let actions = actions_for(&partition, &moved("m1"));
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], SubjectAction::Deletion(_)));
        assert!(matches!(actions[1], SubjectAction::Creation(_)));

        let actions = actions_for(&partition, &moved("m9"));
        assert_eq!(actions, vec![SubjectAction::Deletion("s1".into())]);
    }

    #[test]
    fn query_string_lists_filters() {
        let mut op = DownSyncOperation::new(DownSyncPartition::module("p1", "m1", vec![]));
        op.last_event_id = Some("e7".into());
        assert_eq!(query_string(&op.query()), "projectId=p1&l_moduleId=m1&lastEventId=e7");
    }
}
