//! Sync orchestration.
//!
//! A sync is one chain of stages: a start stage, then the up-sync stage and
//! one down-sync stage per partition running side by side, then an end
//! stage. Every stage carries [`MASTER_SYNC_TAG`] and the tag of its sync
//! id, which is how an in-flight sync is found again.

use crate::context::SyncContext;
use crate::down_sync::EventDownSyncTask;
use crate::error::{SyncError, SyncResult};
use crate::project::{ProjectConfiguration, ProjectState, SecurityManager, SyncFrequency};
use crate::scheduler::{
    ChainSpec, FailureReason, JobScheduler, StageContext, StageFailure, StageInfo, StageJob,
    StageOutcome, StageSpec, StageState,
};
use crate::up_sync::{EventUpSyncTask, UpSyncFailure};
use crate::SYNC_LOG_TARGET;
use async_trait::async_trait;
use fieldsync_events::{
    DownSyncOperation, DownSyncPartition, EnrolmentRecordEventType, EventScope,
    EventScopeType, SyncOperationState, Timestamp, UpSyncOperation,
};
use fieldsync_store::Partitioning;
use futures::StreamExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tag carried by every stage of every sync.
pub const MASTER_SYNC_TAG: &str = "MASTER_SYNC_SCHEDULERS";

/// Prefix of the tag naming the sync a stage belongs to.
pub const SYNC_ID_TAG_PREFIX: &str = "sync_id_";

/// Unique id sync chains are submitted under.
pub const SYNC_CHAIN_ID: &str = "fieldsync.events.sync";

/// Tag of start stages.
pub const START_SYNC_TAG: &str = "START_SYNC";

/// Tag of up-sync stages.
pub const UP_SYNC_TAG: &str = "UP_SYNC";

/// Tag of down-sync stages.
pub const DOWN_SYNC_TAG: &str = "DOWN_SYNC";

/// Tag of end stages.
pub const END_SYNC_TAG: &str = "END_SYNC";

const MAX_PROGRESS_SUFFIX: &str = ".max";

/// What one sync will do.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    /// Id of the sync.
    pub sync_id: String,
    /// Partitions to download, with their stored cursors.
    pub down_operations: Vec<DownSyncOperation>,
    /// Upload to run, if any.
    pub up_operation: Option<UpSyncOperation>,
    /// Scope collecting the download audit events.
    pub tracking_scope: Option<EventScope>,
}

/// Turns a plan into a chain of stages.
pub trait SyncChainBuilder: Send + Sync {
    /// Builds the chain of a sync.
    fn build(&self, plan: &SyncPlan) -> SyncResult<ChainSpec>;
}

/// Builds `start → (up ∥ down...) → end`.
#[derive(Debug, Clone)]
pub struct DefaultChainBuilder {
    ctx: SyncContext,
}

impl DefaultChainBuilder {
    /// Creates a builder whose stages run against `ctx`.
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }
}

impl SyncChainBuilder for DefaultChainBuilder {
    fn build(&self, plan: &SyncPlan) -> SyncResult<ChainSpec> {
        let sync_tag = sync_tag(&plan.sync_id);
        let backoff = self.ctx.config.backoff;
        let stage = |id: String, job: Arc<dyn StageJob>| {
            StageSpec::new(id, job)
                .with_tag(MASTER_SYNC_TAG)
                .with_tag(sync_tag.clone())
                .with_network(true)
                .with_backoff(backoff)
        };

        let mut chain = ChainSpec::new();
        let start_id = format!("{}.start", plan.sync_id);
        chain.push(
            stage(
                start_id.clone(),
                Arc::new(StartJob {
                    sync_id: plan.sync_id.clone(),
                }),
            )
            .with_tag(START_SYNC_TAG),
        );

        let mut workers = Vec::new();
        if let Some(op) = &plan.up_operation {
            let id = format!("{}.up", plan.sync_id);
            chain.push(
                stage(
                    id.clone(),
                    Arc::new(UpSyncJob {
                        ctx: self.ctx.clone(),
                        project_id: op.project_id.clone(),
                    }),
                )
                .with_tag(UP_SYNC_TAG)
                .after(&start_id),
            );
            workers.push(id);
        }
        for (index, op) in plan.down_operations.iter().enumerate() {
            let id = format!("{}.down.{index}", plan.sync_id);
            chain.push(
                stage(
                    id.clone(),
                    Arc::new(DownSyncJob {
                        ctx: self.ctx.clone(),
                        partition: op.partition.clone(),
                        tracking_scope: plan.tracking_scope.clone(),
                    }),
                )
                .with_tag(DOWN_SYNC_TAG)
                .after(&start_id),
            );
            workers.push(id);
        }

        let mut end = stage(
            format!("{}.end", plan.sync_id),
            Arc::new(EndJob {
                ctx: self.ctx.clone(),
                tracking_scope: plan.tracking_scope.as_ref().map(|s| s.id.clone()),
            }),
        )
        .with_tag(END_SYNC_TAG);
        if workers.is_empty() {
            end = end.after(&start_id);
        }
        for id in workers {
            end = end.after(id);
        }
        chain.push(end);
        Ok(chain)
    }
}

/// Maps an error to the outcome of the stage it ended.
pub fn outcome_for_error(err: &SyncError) -> StageOutcome {
    match err {
        SyncError::BackendMaintenance {
            estimated_outage_secs,
        } => StageOutcome::Failure(StageFailure::new(
            FailureReason::Maintenance {
                estimated_outage_secs: *estimated_outage_secs,
            },
            err.to_string(),
        )),
        SyncError::CloudIntegration { .. } => StageOutcome::Failure(StageFailure::new(
            FailureReason::CloudIntegration,
            err.to_string(),
        )),
        err if err.is_fatal() => {
            StageOutcome::Failure(StageFailure::new(FailureReason::Fatal, err.to_string()))
        }
        err => StageOutcome::Retry(err.to_string()),
    }
}

struct StartJob {
    sync_id: String,
}

#[async_trait]
impl StageJob for StartJob {
    async fn run(&self, _ctx: StageContext) -> StageOutcome {
        info!(target: SYNC_LOG_TARGET, sync_id = %self.sync_id, "sync started");
        StageOutcome::Success
    }
}

struct UpSyncJob {
    ctx: SyncContext,
    project_id: String,
}

impl UpSyncJob {
    async fn upload(&self, stage: &StageContext) -> SyncResult<StageOutcome> {
        let tracking = self
            .ctx
            .events
            .create_event_scope(EventScopeType::UpSync, None)?;
        let op = self.ctx.up_operations.load(&self.project_id)?;
        let mut progress =
            EventUpSyncTask::new(self.ctx.clone()).up_sync(op, Some(tracking.clone()));

        let mut outcome = StageOutcome::Success;
        while let Some(item) = progress.next().await {
            match item {
                Ok(step) => {
                    self.ctx.progress.add_progress(&stage.stage_id, step.progress)?;
                    if step.operation.last_state == Some(SyncOperationState::Failed) {
                        outcome = failed_upload_outcome(step.failure.as_ref());
                    }
                }
                Err(err) => {
                    outcome = outcome_for_error(&err);
                    break;
                }
            }
        }

        if self.ctx.events.get_events_json_from_scope(&tracking.id)?.is_empty() {
            self.ctx.events.delete_event_scope(&tracking.id)?;
        } else {
            self.ctx.events.close_event_scope(&tracking.id, None)?;
        }
        Ok(outcome)
    }
}

fn failed_upload_outcome(failure: Option<&UpSyncFailure>) -> StageOutcome {
    match failure {
        Some(UpSyncFailure::Maintenance {
            estimated_outage_secs,
        }) => StageOutcome::Failure(StageFailure::new(
            FailureReason::Maintenance {
                estimated_outage_secs: *estimated_outage_secs,
            },
            "backend under maintenance",
        )),
        Some(UpSyncFailure::CloudIntegration { status }) => StageOutcome::Failure(
            StageFailure::new(
                FailureReason::CloudIntegration,
                format!("upload rejected by backend (HTTP {status})"),
            ),
        ),
        Some(UpSyncFailure::Transient { kind }) => {
            StageOutcome::Retry(format!("upload failed: {kind}"))
        }
        None => StageOutcome::Retry("upload failed".to_string()),
    }
}

#[async_trait]
impl StageJob for UpSyncJob {
    async fn run(&self, ctx: StageContext) -> StageOutcome {
        self.upload(&ctx)
            .await
            .unwrap_or_else(|err| outcome_for_error(&err))
    }
}

struct DownSyncJob {
    ctx: SyncContext,
    partition: DownSyncPartition,
    tracking_scope: Option<EventScope>,
}

impl DownSyncJob {
    async fn download(&self, stage: &StageContext) -> SyncResult<()> {
        let op = self
            .ctx
            .down_operations
            .load(&self.partition)?
            .unwrap_or_else(|| DownSyncOperation::new(self.partition.clone()));
        let base = self.ctx.progress.read_progress(&stage.stage_id)?;
        let max_key = format!("{}{MAX_PROGRESS_SUFFIX}", stage.stage_id);

        let mut reported = 0;
        let mut progress =
            EventDownSyncTask::new(self.ctx.clone()).down_sync(op, self.tracking_scope.clone());
        while let Some(item) = progress.next().await {
            let step = item?;
            self.ctx
                .progress
                .add_progress(&stage.stage_id, step.progress.saturating_sub(reported))?;
            reported = step.progress;
            if let Some(max) = step.max_progress {
                self.ctx.progress.save_progress(&max_key, base + max)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StageJob for DownSyncJob {
    async fn run(&self, ctx: StageContext) -> StageOutcome {
        match self.download(&ctx).await {
            Ok(()) => StageOutcome::Success,
            Err(err) => outcome_for_error(&err),
        }
    }
}

struct EndJob {
    ctx: SyncContext,
    tracking_scope: Option<String>,
}

impl EndJob {
    fn finish(&self) -> SyncResult<()> {
        self.ctx
            .progress
            .store_last_successful_sync_time(self.ctx.now())?;
        if let Some(scope_id) = &self.tracking_scope {
            self.ctx.events.close_event_scope(scope_id, None)?;
        }
        Ok(())
    }
}

#[async_trait]
impl StageJob for EndJob {
    async fn run(&self, _ctx: StageContext) -> StageOutcome {
        match self.finish() {
            Ok(()) => {
                info!(target: SYNC_LOG_TARGET, "sync finished");
                StageOutcome::Success
            }
            Err(err) => outcome_for_error(&err),
        }
    }
}

/// Overall state of the last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No sync was scheduled.
    Idle,
    /// Stages are waiting for dependencies, network or a retry.
    Enqueued,
    /// A stage is running.
    Running,
    /// Every stage succeeded.
    Complete,
    /// A stage failed.
    Failed,
    /// The sync was cancelled.
    Cancelled,
}

/// User-facing summary of the last sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    /// Id of the last sync.
    pub sync_id: Option<String>,
    /// Overall state.
    pub state: SyncState,
    /// Records transferred so far.
    pub progress: u64,
    /// Records expected, when the backend announced them.
    pub total: Option<u64>,
    /// End of the last successful sync.
    pub last_sync_time: Option<Timestamp>,
    /// The sync failed because the backend is down for maintenance.
    pub failed_because_maintenance: bool,
    /// Announced outage, in seconds.
    pub estimated_outage: Option<u64>,
    /// The backend rejected a request for good.
    pub failed_because_cloud_integration: bool,
}

/// Counts of records waiting to be downloaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteCounts {
    /// Subjects to create.
    pub creations: u64,
    /// Subjects to delete.
    pub deletions: u64,
    /// Subjects to move.
    pub moves: u64,
}

/// Starts syncs and reports on them.
pub struct SyncOrchestrator {
    ctx: SyncContext,
    scheduler: Arc<dyn JobScheduler>,
    builder: Arc<dyn SyncChainBuilder>,
    security: Arc<dyn SecurityManager>,
    trigger: Mutex<()>,
}

impl fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    /// Creates an orchestrator using the [`DefaultChainBuilder`].
    pub fn new(
        ctx: SyncContext,
        scheduler: Arc<dyn JobScheduler>,
        security: Arc<dyn SecurityManager>,
    ) -> Self {
        Self {
            builder: Arc::new(DefaultChainBuilder::new(ctx.clone())),
            ctx,
            scheduler,
            security,
            trigger: Mutex::new(()),
        }
    }

    /// Replaces the chain builder.
    pub fn with_chain_builder(mut self, builder: Arc<dyn SyncChainBuilder>) -> Self {
        self.builder = builder;
        self
    }

    /// Starts a sync.
    ///
    /// Returns `Ok(None)` if the project allows neither upload nor download,
    /// the id of the sync already in flight if there is one, or the id of
    /// the newly scheduled sync.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::RootedDevice` on a rooted device and
    /// `SyncError::NotSignedIn` when nobody is signed in.
    pub async fn sync(&self) -> SyncResult<Option<String>> {
        self.security.check_if_device_is_rooted()?;
        let project_id = self
            .ctx
            .login
            .signed_in_project_id()
            .ok_or(SyncError::NotSignedIn)?;
        let user_id = self.ctx.login.signed_in_user_id().unwrap_or_default();

        let config = self.ctx.config_provider.project_configuration().await?;
        let state = self.ctx.config_provider.project_state().await?;
        let can_down_sync = config.frequency != SyncFrequency::OnlyPeriodicallyUpSync
            && state == ProjectState::Running;
        let can_up_sync = config.up_sync_kind.allows_up_sync();
        if !can_down_sync && !can_up_sync {
            info!(target: SYNC_LOG_TARGET, project_id = %project_id, "nothing to sync");
            return Ok(None);
        }

        self.schedule(&project_id, user_id, &config, can_down_sync, can_up_sync)
    }

    /// Plans and submits a sync unless one is in flight. Triggers are
    /// serialised from the in-flight check through the submit.
    fn schedule(
        &self,
        project_id: &str,
        user_id: String,
        config: &ProjectConfiguration,
        can_down_sync: bool,
        can_up_sync: bool,
    ) -> SyncResult<Option<String>> {
        let _trigger = self.trigger.lock();
        if let Some(sync_id) = self.in_flight_sync_id() {
            debug!(target: SYNC_LOG_TARGET, sync_id = %sync_id, "sync already in flight");
            return Ok(Some(sync_id));
        }

        self.ctx.progress.clear_progresses()?;
        if config.partitioning == Partitioning::Module {
            self.forget_unselected_modules(project_id, &config.module_ids)?;
        }
        for scope in self
            .ctx
            .events
            .source()
            .load_open_scopes(EventScopeType::DownSync)?
        {
            self.ctx.events.close_event_scope(&scope.id, None)?;
        }

        let (down_operations, tracking_scope) = if can_down_sync {
            let scope = config.down_sync_scope(user_id);
            (
                self.ctx.down_operations.operations_for(&scope)?,
                Some(
                    self.ctx
                        .events
                        .create_event_scope(EventScopeType::DownSync, None)?,
                ),
            )
        } else {
            (Vec::new(), None)
        };
        let up_operation = if can_up_sync {
            Some(self.ctx.up_operations.load(project_id)?)
        } else {
            None
        };

        let plan = SyncPlan {
            sync_id: Uuid::new_v4().to_string(),
            down_operations,
            up_operation,
            tracking_scope,
        };
        let chain = self.builder.build(&plan)?;
        let handle = self.scheduler.submit(SYNC_CHAIN_ID, chain)?;
        if handle.reused {
            return Ok(self.in_flight_sync_id().or(Some(plan.sync_id)));
        }
        info!(
            target: SYNC_LOG_TARGET,
            sync_id = %plan.sync_id,
            down = plan.down_operations.len(),
            up = plan.up_operation.is_some(),
            "sync scheduled"
        );
        Ok(Some(plan.sync_id))
    }

    /// Cancels the sync in flight. Returns how many stages were cancelled.
    pub fn cancel(&self) -> usize {
        self.scheduler.cancel_by_tag(MASTER_SYNC_TAG)
    }

    /// Summarises the last sync.
    pub fn last_sync_state(&self) -> SyncResult<SyncSummary> {
        let stages = self.scheduler.stages_by_tag(MASTER_SYNC_TAG);
        let last_sync_time = self.ctx.progress.read_last_successful_sync_time()?;
        let Some(sync_id) = stages.iter().find_map(sync_id_of) else {
            return Ok(SyncSummary {
                sync_id: None,
                state: SyncState::Idle,
                progress: 0,
                total: None,
                last_sync_time,
                failed_because_maintenance: false,
                estimated_outage: None,
                failed_because_cloud_integration: false,
            });
        };
        let stages: Vec<&StageInfo> = stages
            .iter()
            .filter(|s| s.has_tag(&sync_tag(&sync_id)))
            .collect();

        let mut progress = 0;
        let mut total = None;
        for stage in &stages {
            if stage.has_tag(UP_SYNC_TAG) || stage.has_tag(DOWN_SYNC_TAG) {
                progress += self.ctx.progress.read_progress(&stage.id)?;
            }
            if stage.has_tag(DOWN_SYNC_TAG) {
                let max = self
                    .ctx
                    .progress
                    .read_progress(&format!("{}{MAX_PROGRESS_SUFFIX}", stage.id))?;
                total = Some(total.unwrap_or(0) + max);
            }
        }

        let mut failed_because_maintenance = false;
        let mut estimated_outage = None;
        let mut failed_because_cloud_integration = false;
        for failure in stages.iter().filter_map(|s| s.failure.as_ref()) {
            match failure.reason {
                FailureReason::Maintenance {
                    estimated_outage_secs,
                } => {
                    failed_because_maintenance = true;
                    estimated_outage = estimated_outage.or(estimated_outage_secs);
                }
                FailureReason::CloudIntegration => failed_because_cloud_integration = true,
                FailureReason::Fatal | FailureReason::Exhausted => {}
            }
        }

        Ok(SyncSummary {
            sync_id: Some(sync_id),
            state: summarise(&stages),
            progress,
            total,
            last_sync_time,
            failed_because_maintenance,
            estimated_outage,
            failed_because_cloud_integration,
        })
    }

    /// Forgets every cursor, counter and the last sync time.
    pub fn delete_sync_info(&self) -> SyncResult<()> {
        self.cancel();
        self.ctx.down_operations.delete_all()?;
        self.ctx.up_operations.delete_all()?;
        self.ctx.progress.clear_progresses()?;
        self.ctx.progress.clear_last_successful_sync_time()?;
        info!(target: SYNC_LOG_TARGET, "sync info deleted");
        Ok(())
    }

    /// Asks the backend how many records each partition has left to
    /// download.
    pub async fn count_events_to_download(&self) -> SyncResult<RemoteCounts> {
        let user_id = self.ctx.login.signed_in_user_id().unwrap_or_default();
        let config = self.ctx.config_provider.project_configuration().await?;
        let scope = config.down_sync_scope(user_id);

        let mut counts = RemoteCounts::default();
        for op in self.ctx.down_operations.operations_for(&scope)? {
            for count in self.ctx.remote.count(&op.query()).await? {
                let value = u64::from(count.count);
                match count.event_type {
                    EnrolmentRecordEventType::EnrolmentRecordCreation => counts.creations += value,
                    EnrolmentRecordEventType::EnrolmentRecordDeletion => counts.deletions += value,
                    EnrolmentRecordEventType::EnrolmentRecordMove => counts.moves += value,
                }
            }
        }
        Ok(counts)
    }

    fn in_flight_sync_id(&self) -> Option<String> {
        self.scheduler
            .stages_by_tag(MASTER_SYNC_TAG)
            .iter()
            .filter(|s| !s.state.is_finished())
            .find_map(sync_id_of)
    }

    fn forget_unselected_modules(&self, project_id: &str, selected: &[String]) -> SyncResult<()> {
        let unselected: Vec<String> = self
            .ctx
            .down_operations
            .load_all()?
            .into_iter()
            .filter(|op| op.partition.project_id == project_id)
            .filter_map(|op| op.partition.module_id)
            .filter(|module| !selected.contains(module))
            .collect();
        if !unselected.is_empty() {
            let removed = self
                .ctx
                .down_operations
                .delete_operations(project_id, &unselected)?;
            warn!(target: SYNC_LOG_TARGET, removed, "forgot cursors of unselected modules");
        }
        Ok(())
    }
}

fn sync_tag(sync_id: &str) -> String {
    format!("{SYNC_ID_TAG_PREFIX}{sync_id}")
}

fn sync_id_of(stage: &StageInfo) -> Option<String> {
    stage
        .tags
        .iter()
        .find_map(|tag| tag.strip_prefix(SYNC_ID_TAG_PREFIX))
        .map(str::to_string)
}

fn summarise(stages: &[&StageInfo]) -> SyncState {
    let any = |state: StageState| stages.iter().any(|s| s.state == state);
    if any(StageState::Running) {
        SyncState::Running
    } else if any(StageState::Enqueued) || any(StageState::Blocked) {
        SyncState::Enqueued
    } else if any(StageState::Failed) {
        SyncState::Failed
    } else if any(StageState::Cancelled) {
        SyncState::Cancelled
    } else {
        SyncState::Complete
    }
}
