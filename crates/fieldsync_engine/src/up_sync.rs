//! Upload of closed scopes.

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::SYNC_LOG_TARGET;
use async_stream::{stream, try_stream};
use fieldsync_events::{
    Event, EventPayload, EventScope, EventScopeType, ScopeUpload, SyncOperationState,
    UpSyncKind, UpSyncOperation, UpSyncRequestContent, UpSyncRequestPayload, UploadEventsBody,
};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One step of an upload run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpSyncProgress {
    /// Operation state after the step, already persisted.
    pub operation: UpSyncOperation,
    /// Events handled by the step.
    pub progress: u64,
    /// Why the run failed, on the terminal `Failed` item.
    pub failure: Option<UpSyncFailure>,
}

/// Why an upload run ended `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpSyncFailure {
    /// The backend is down for maintenance.
    Maintenance {
        /// Announced outage length in seconds.
        estimated_outage_secs: Option<u64>,
    },
    /// The backend rejected the batch for good.
    CloudIntegration {
        /// HTTP status.
        status: u16,
    },
    /// Anything a later run may get past.
    Transient {
        /// Error kind, as recorded in audit events.
        kind: &'static str,
    },
}

impl From<&SyncError> for UpSyncFailure {
    fn from(err: &SyncError) -> Self {
        match err {
            SyncError::BackendMaintenance {
                estimated_outage_secs,
            } => UpSyncFailure::Maintenance {
                estimated_outage_secs: *estimated_outage_secs,
            },
            SyncError::CloudIntegration { status } => {
                UpSyncFailure::CloudIntegration { status: *status }
            }
            other => UpSyncFailure::Transient { kind: other.kind() },
        }
    }
}

enum BatchOutcome {
    Uploaded(usize),
    Failed(UpSyncFailure),
}

/// Drains closed scopes to the backend.
///
/// Scope types are uploaded in [`EventScopeType::UPLOAD_ORDER`]. A scope is
/// deleted only once the backend accepted it, or once its raw content was
/// quarantined if it no longer decodes.
#[derive(Debug, Clone)]
pub struct EventUpSyncTask {
    ctx: SyncContext,
}

impl EventUpSyncTask {
    /// Creates a task.
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Runs an upload.
    ///
    /// The stream yields one item per scope with its event count and ends
    /// with an item of progress 0 whose operation is `Complete`, or `Failed`
    /// if an upload failed or a non-fatal error stopped the run. Fatal
    /// errors end the stream with `Err`; a project mismatch does so before
    /// any I/O.
    pub fn up_sync(
        &self,
        operation: UpSyncOperation,
        tracking_scope: Option<EventScope>,
    ) -> BoxStream<'static, SyncResult<UpSyncProgress>> {
        let task = self.clone();
        Box::pin(stream! {
            match task.ctx.login.signed_in_project_id() {
                None => {
                    yield Err(SyncError::NotSignedIn);
                    return;
                }
                Some(expected) if expected != operation.project_id => {
                    yield Err(SyncError::ProjectMismatch {
                        expected,
                        actual: operation.project_id.clone(),
                    });
                    return;
                }
                Some(_) => {}
            }

            let mut last = operation.clone();
            let mut inner = Box::pin(task.clone().upload_all(operation, tracking_scope));
            while let Some(item) = inner.next().await {
                match item {
                    Ok(progress) => {
                        last = progress.operation.clone();
                        yield Ok(progress);
                    }
                    Err(err) if err.is_fatal() => {
                        yield Err(err);
                        return;
                    }
                    Err(err) => {
                        error!(target: SYNC_LOG_TARGET, error = %err, "up-sync failed");
                        last.mark(SyncOperationState::Failed, task.ctx.now());
                        if let Err(save) = task.ctx.up_operations.save(&last) {
                            yield Err(SyncError::from(save));
                            return;
                        }
                        yield Ok(UpSyncProgress {
                            operation: last,
                            progress: 0,
                            failure: Some(UpSyncFailure::from(&err)),
                        });
                        return;
                    }
                }
            }
        })
    }

    fn upload_all(
        self,
        mut op: UpSyncOperation,
        tracking_scope: Option<EventScope>,
    ) -> impl Stream<Item = SyncResult<UpSyncProgress>> + Send + 'static {
        try_stream! {
            let kind = self.ctx.config_provider.project_configuration().await?.up_sync_kind;
            let mut failure = None;
            let mut useful_upload = false;

            for scope_type in EventScopeType::UPLOAD_ORDER {
                let batch_size = self.ctx.config.batch_size(scope_type);
                loop {
                    if self.ctx.events.get_closed_event_scope_count(scope_type)? == 0 {
                        break;
                    }
                    if scope_type == EventScopeType::Session && !kind.allows_up_sync() {
                        debug!(target: SYNC_LOG_TARGET, "session upload disabled by project");
                        break;
                    }

                    let scopes = self.ctx.events.get_closed_event_scopes(scope_type, batch_size)?;
                    let mut uploads = Vec::with_capacity(scopes.len());
                    let mut corrupted = Vec::new();
                    for scope in scopes {
                        match self.ctx.events.get_events_from_scope(&scope.id) {
                            Ok(events) => {
                                self.persist(&mut op, SyncOperationState::Running)?;
                                yield UpSyncProgress {
                                    operation: op.clone(),
                                    progress: events.len() as u64,
                                    failure: None,
                                };
                                uploads.push((scope, events));
                            }
                            Err(err) if err.is_corrupted_data() => {
                                warn!(target: SYNC_LOG_TARGET, scope_id = %scope.id, error = %err, "scope no longer decodes");
                                corrupted.push(scope);
                            }
                            Err(err) => Err::<(), _>(SyncError::from(err))?,
                        }
                    }

                    let mut removed = 0usize;
                    for scope in corrupted {
                        let raw = self.ctx.events.get_events_json_from_scope(&scope.id)?;
                        self.persist(&mut op, SyncOperationState::Running)?;
                        yield UpSyncProgress {
                            operation: op.clone(),
                            progress: raw.len() as u64,
                            failure: None,
                        };
                        if self.quarantine(&op.project_id, &scope, raw).await? {
                            removed += 1;
                        }
                    }

                    if !uploads.is_empty() {
                        if scope_type != EventScopeType::UpSync {
                            useful_upload = true;
                        }
                        let content = request_content(scope_type, uploads.len(), useful_upload);
                        let uploaded = self
                            .upload(&op.project_id, scope_type, kind, uploads, content, tracking_scope.as_ref())
                            .await?;
                        match uploaded {
                            BatchOutcome::Uploaded(count) => removed += count,
                            BatchOutcome::Failed(reason) => {
                                failure = Some(reason);
                                break;
                            }
                        }
                    }

                    if removed == 0 {
                        break;
                    }
                }
            }

            let state = if failure.is_some() {
                SyncOperationState::Failed
            } else {
                SyncOperationState::Complete
            };
            self.persist(&mut op, state)?;
            info!(target: SYNC_LOG_TARGET, project_id = %op.project_id, state = ?state, "up-sync finished");
            yield UpSyncProgress { operation: op, progress: 0, failure };
        }
    }

    fn persist(&self, op: &mut UpSyncOperation, state: SyncOperationState) -> SyncResult<()> {
        op.mark(state, self.ctx.now());
        self.ctx.up_operations.save(op)?;
        Ok(())
    }

    /// Uploads raw scope content and deletes the scope once accepted.
    ///
    /// Returns whether the scope was deleted.
    async fn quarantine(
        &self,
        project_id: &str,
        scope: &EventScope,
        raw_events: Vec<String>,
    ) -> SyncResult<bool> {
        let mut payload = Vec::with_capacity(raw_events.len() + 1);
        payload.push(serde_json::to_string(scope)?);
        payload.extend(raw_events);

        match self.ctx.remote.dump_invalid_events(project_id, payload).await {
            Ok(()) => {
                self.ctx.events.delete_event_scope(&scope.id)?;
                warn!(target: SYNC_LOG_TARGET, scope_id = %scope.id, "corrupted scope quarantined");
                Ok(true)
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(target: SYNC_LOG_TARGET, scope_id = %scope.id, error = %err, "quarantine failed, keeping scope");
                Ok(false)
            }
        }
    }

    /// Posts one batch of scopes and deletes them once accepted. A batch the
    /// backend could not be reached for or refused is kept.
    async fn upload(
        &self,
        project_id: &str,
        scope_type: EventScopeType,
        kind: UpSyncKind,
        uploads: Vec<(EventScope, Vec<Event>)>,
        content: UpSyncRequestContent,
        tracking_scope: Option<&EventScope>,
    ) -> SyncResult<BatchOutcome> {
        let started = self.ctx.now();
        let scope_ids: Vec<String> = uploads.iter().map(|(scope, _)| scope.id.clone()).collect();
        let scopes: Vec<ScopeUpload> = uploads
            .into_iter()
            .map(|(scope, events)| {
                let events = if scope_type == EventScopeType::Session {
                    kind.filter(events)
                } else {
                    events
                };
                ScopeUpload { scope, events }
            })
            .collect();
        let body = UploadEventsBody::for_scope_type(scope_type, scopes);

        match self.ctx.remote.post(project_id, &body, true).await {
            Ok(result) => {
                if content.is_useful() {
                    self.audit(
                        tracking_scope,
                        UpSyncRequestPayload {
                            created_at: started,
                            ended_at: self.ctx.now(),
                            request_id: result
                                .request_id
                                .unwrap_or_else(|| Uuid::new_v4().to_string()),
                            content,
                            response_status: Some(result.status),
                            error_type: None,
                        },
                    );
                }
                self.ctx.events.delete_event_scopes(&scope_ids)?;
                info!(
                    target: SYNC_LOG_TARGET,
                    scope_type = %scope_type,
                    count = scope_ids.len(),
                    "scopes uploaded"
                );
                Ok(BatchOutcome::Uploaded(scope_ids.len()))
            }
            Err(err) if err.is_remote() => {
                warn!(target: SYNC_LOG_TARGET, scope_type = %scope_type, error = %err, "upload failed");
                self.audit(
                    tracking_scope,
                    UpSyncRequestPayload {
                        created_at: started,
                        ended_at: self.ctx.now(),
                        request_id: Uuid::new_v4().to_string(),
                        content,
                        response_status: err.status(),
                        error_type: Some(err.kind().to_string()),
                    },
                );
                Ok(BatchOutcome::Failed(UpSyncFailure::from(&err)))
            }
            Err(err) => Err(err),
        }
    }

    fn audit(&self, tracking_scope: Option<&EventScope>, payload: UpSyncRequestPayload) {
        let Some(scope) = tracking_scope else {
            return;
        };
        let event = Event::new(EventPayload::EventUpSyncRequest(payload));
        if let Err(err) = self.ctx.events.add_or_update_event_in_scope(scope, event) {
            warn!(target: SYNC_LOG_TARGET, scope_id = %scope.id, error = %err, "could not record upload request");
        }
    }
}

/// Counts what an upload carried.
///
/// Up-sync scopes only describe earlier uploads, so they are counted only
/// when the same run already posted sessions or down-sync scopes.
fn request_content(
    scope_type: EventScopeType,
    count: usize,
    useful_upload: bool,
) -> UpSyncRequestContent {
    let count = u32::try_from(count).unwrap_or(u32::MAX);
    let mut content = UpSyncRequestContent::default();
    match scope_type {
        EventScopeType::Session => content.session_count = count,
        EventScopeType::DownSync => content.event_down_sync_count = count,
        EventScopeType::UpSync if useful_upload => content.event_up_sync_count = count,
        EventScopeType::UpSync => {}
    }
    content
}
