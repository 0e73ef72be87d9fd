//! Task-graph scheduling of sync stages.
//!
//! A chain is a list of stages with dependencies on earlier stages. The
//! [`TokioScheduler`] runs each ready stage as a tokio task, retries stages
//! that ask for it and records the state of every stage so callers can
//! query it by tag.

use crate::config::BackoffPolicy;
use crate::error::{SyncError, SyncResult};
use crate::SYNC_LOG_TARGET;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Lifecycle of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageState {
    /// Ready to run, waiting for the network or a backoff delay.
    Enqueued,
    /// Waiting for its dependencies.
    Blocked,
    /// Running an attempt.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with a failure.
    Failed,
    /// Cancelled, or skipped because a dependency did not succeed.
    Cancelled,
}

impl StageState {
    /// Returns true once the stage will not change anymore.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            StageState::Succeeded | StageState::Failed | StageState::Cancelled
        )
    }
}

/// Why a stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The backend is down for maintenance.
    Maintenance {
        /// Announced outage, in seconds.
        estimated_outage_secs: Option<u64>,
    },
    /// The backend rejected the request for good.
    CloudIntegration,
    /// An error that retrying cannot fix.
    Fatal,
    /// Every attempt asked for a retry.
    Exhausted,
}

/// A terminal stage failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    /// Classification.
    pub reason: FailureReason,
    /// Human-readable cause.
    pub message: String,
}

impl StageFailure {
    /// Creates a failure.
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Result of one attempt of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage is done.
    Success,
    /// Run again after the backoff delay.
    Retry(String),
    /// Give up.
    Failure(StageFailure),
}

/// Snapshot of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInfo {
    /// Stage id.
    pub id: String,
    /// Tags the stage was submitted with.
    pub tags: Vec<String>,
    /// Current state.
    pub state: StageState,
    /// Attempts started so far.
    pub attempts: u32,
    /// Set when the stage failed.
    pub failure: Option<StageFailure>,
}

impl StageInfo {
    /// Returns true if the stage carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// What a stage knows about its current attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageContext {
    /// Stage id.
    pub stage_id: String,
    /// Attempt number, starting at 1.
    pub attempt: u32,
}

/// The work done by a stage.
#[async_trait]
pub trait StageJob: Send + Sync {
    /// Runs one attempt.
    async fn run(&self, ctx: StageContext) -> StageOutcome;
}

/// A stage of a chain.
pub struct StageSpec {
    id: String,
    tags: Vec<String>,
    depends_on: Vec<String>,
    requires_network: bool,
    backoff: BackoffPolicy,
    job: Arc<dyn StageJob>,
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpec")
            .field("id", &self.id)
            .field("tags", &self.tags)
            .field("depends_on", &self.depends_on)
            .field("requires_network", &self.requires_network)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl StageSpec {
    /// Creates a stage with no dependencies and a single attempt.
    pub fn new(id: impl Into<String>, job: Arc<dyn StageJob>) -> Self {
        Self {
            id: id.into(),
            tags: Vec::new(),
            depends_on: Vec::new(),
            requires_network: false,
            backoff: BackoffPolicy::no_retry(),
            job,
        }
    }

    /// Adds a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Runs this stage only after `stage_id` succeeded.
    pub fn after(mut self, stage_id: impl Into<String>) -> Self {
        self.depends_on.push(stage_id.into());
        self
    }

    /// Makes each attempt wait for the network.
    pub fn with_network(mut self, required: bool) -> Self {
        self.requires_network = required;
        self
    }

    /// Sets the retry policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the stage id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the tags.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the ids this stage waits for.
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    /// Returns true if attempts wait for the network.
    pub fn requires_network(&self) -> bool {
        self.requires_network
    }

    /// Returns the retry policy.
    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }
}

/// An ordered list of stages.
#[derive(Debug, Default)]
pub struct ChainSpec {
    stages: Vec<StageSpec>,
}

impl ChainSpec {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    pub fn push(&mut self, stage: StageSpec) {
        self.stages.push(stage);
    }

    /// Appends a stage, builder style.
    pub fn with_stage(mut self, stage: StageSpec) -> Self {
        self.push(stage);
        self
    }

    /// Returns the stages in submission order.
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Consumes the chain, returning its stages.
    pub fn into_stages(self) -> Vec<StageSpec> {
        self.stages
    }

    /// Returns the number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the chain has no stage.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Checks that ids are unique and that stages only depend on stages
    /// declared before them.
    pub fn validate(&self) -> SyncResult<()> {
        let mut seen = HashSet::new();
        for stage in &self.stages {
            for dependency in &stage.depends_on {
                if !seen.contains(dependency.as_str()) {
                    return Err(SyncError::Scheduler(format!(
                        "stage {} depends on unknown stage {dependency}",
                        stage.id
                    )));
                }
            }
            if !seen.insert(stage.id.as_str()) {
                return Err(SyncError::Scheduler(format!(
                    "duplicate stage id {}",
                    stage.id
                )));
            }
        }
        Ok(())
    }
}

/// A submitted chain.
#[derive(Debug, Clone)]
pub struct ChainHandle {
    /// Unique id the chain was submitted under.
    pub unique_id: String,
    /// Stage ids of the chain.
    pub stage_ids: Vec<String>,
    /// True if an unfinished chain already held the unique id and was kept.
    pub reused: bool,
    done: watch::Receiver<bool>,
}

impl ChainHandle {
    /// Returns true once every stage finished.
    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Waits until every stage finished.
    pub async fn wait(&self) {
        let mut done = self.done.clone();
        loop {
            if *done.borrow_and_update() {
                return;
            }
            if done.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Runs chains of stages.
pub trait JobScheduler: Send + Sync {
    /// Submits a chain under a unique id.
    ///
    /// If an unfinished chain holds the id it is kept and its handle is
    /// returned with `reused` set. A finished chain is replaced.
    fn submit(&self, unique_id: &str, chain: ChainSpec) -> SyncResult<ChainHandle>;

    /// Returns every known stage carrying `tag`.
    fn stages_by_tag(&self, tag: &str) -> Vec<StageInfo>;

    /// Cancels every unfinished stage carrying `tag`. Returns how many.
    fn cancel_by_tag(&self, tag: &str) -> usize;
}

/// Network availability.
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Returns true if the network is usable now.
    fn is_online(&self) -> bool;

    /// Waits until the network is usable.
    async fn wait_online(&self);
}

/// A network that is always usable.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

#[async_trait]
impl NetworkMonitor for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }

    async fn wait_online(&self) {}
}

/// A network switched on and off by hand.
#[derive(Debug)]
pub struct ManualNetwork {
    online: watch::Sender<bool>,
}

impl ManualNetwork {
    /// Creates a monitor in the given state.
    pub fn new(online: bool) -> Self {
        Self {
            online: watch::channel(online).0,
        }
    }

    /// Changes the state, waking waiters when going online.
    pub fn set_online(&self, online: bool) {
        self.online.send_replace(online);
    }
}

#[async_trait]
impl NetworkMonitor for ManualNetwork {
    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    async fn wait_online(&self) {
        let mut online = self.online.subscribe();
        loop {
            if *online.borrow_and_update() {
                return;
            }
            if online.changed().await.is_err() {
                return;
            }
        }
    }
}

struct StageRecord {
    info: StageInfo,
    cancel: watch::Sender<bool>,
}

struct ChainRecord {
    stage_ids: Vec<String>,
    done: watch::Receiver<bool>,
}

#[derive(Default)]
struct Registry {
    stages: BTreeMap<String, StageRecord>,
    chains: HashMap<String, ChainRecord>,
}

type SharedRegistry = Arc<Mutex<Registry>>;

/// A [`JobScheduler`] running stages on the current tokio runtime.
///
/// Stage records live in memory until the chain holding them is replaced.
pub struct TokioScheduler {
    registry: SharedRegistry,
    network: Arc<dyn NetworkMonitor>,
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("TokioScheduler")
            .field("chains", &registry.chains.len())
            .field("stages", &registry.stages.len())
            .finish()
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new(Arc::new(AlwaysOnline))
    }
}

impl TokioScheduler {
    /// Creates a scheduler gated on `network`.
    pub fn new(network: Arc<dyn NetworkMonitor>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            network,
        }
    }

    /// Returns a stage by id.
    pub fn stage(&self, stage_id: &str) -> Option<StageInfo> {
        self.registry
            .lock()
            .stages
            .get(stage_id)
            .map(|record| record.info.clone())
    }
}

impl JobScheduler for TokioScheduler {
    fn submit(&self, unique_id: &str, chain: ChainSpec) -> SyncResult<ChainHandle> {
        chain.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::Scheduler(e.to_string()))?;

        let mut registry = self.registry.lock();
        if let Some(existing) = registry.chains.get(unique_id) {
            if !*existing.done.borrow() {
                debug!(target: SYNC_LOG_TARGET, unique_id, "chain still running, keeping it");
                return Ok(ChainHandle {
                    unique_id: unique_id.to_string(),
                    stage_ids: existing.stage_ids.clone(),
                    reused: true,
                    done: existing.done.clone(),
                });
            }
        }
        if let Some(old) = registry.chains.remove(unique_id) {
            for id in &old.stage_ids {
                registry.stages.remove(id);
            }
        }
        if let Some(stage) = chain
            .stages
            .iter()
            .find(|s| registry.stages.contains_key(&s.id))
        {
            return Err(SyncError::Scheduler(format!(
                "stage id {} is already scheduled",
                stage.id
            )));
        }

        let mut stages = Vec::with_capacity(chain.len());
        for spec in chain.stages {
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let state = if spec.depends_on.is_empty() {
                StageState::Enqueued
            } else {
                StageState::Blocked
            };
            registry.stages.insert(
                spec.id.clone(),
                StageRecord {
                    info: StageInfo {
                        id: spec.id.clone(),
                        tags: spec.tags.clone(),
                        state,
                        attempts: 0,
                        failure: None,
                    },
                    cancel: cancel_tx,
                },
            );
            stages.push((spec, cancel_rx));
        }
        let stage_ids: Vec<String> = stages.iter().map(|(s, _)| s.id.clone()).collect();
        let (done_tx, done_rx) = watch::channel(stages.is_empty());
        registry.chains.insert(
            unique_id.to_string(),
            ChainRecord {
                stage_ids: stage_ids.clone(),
                done: done_rx.clone(),
            },
        );
        drop(registry);

        info!(target: SYNC_LOG_TARGET, unique_id, stages = stage_ids.len(), "chain submitted");
        runtime.spawn(drive_chain(
            self.registry.clone(),
            self.network.clone(),
            unique_id.to_string(),
            stages,
            done_tx,
        ));
        Ok(ChainHandle {
            unique_id: unique_id.to_string(),
            stage_ids,
            reused: false,
            done: done_rx,
        })
    }

    fn stages_by_tag(&self, tag: &str) -> Vec<StageInfo> {
        self.registry
            .lock()
            .stages
            .values()
            .filter(|record| record.info.has_tag(tag))
            .map(|record| record.info.clone())
            .collect()
    }

    fn cancel_by_tag(&self, tag: &str) -> usize {
        let mut registry = self.registry.lock();
        let mut cancelled = 0;
        for record in registry.stages.values_mut() {
            if record.info.has_tag(tag) && !record.info.state.is_finished() {
                record.info.state = StageState::Cancelled;
                record.cancel.send_replace(true);
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(target: SYNC_LOG_TARGET, tag, cancelled, "stages cancelled");
        }
        cancelled
    }
}

enum Readiness {
    Ready,
    Waiting,
    Skip,
}

fn readiness(registry: &SharedRegistry, spec: &StageSpec) -> Readiness {
    let registry = registry.lock();
    match registry.stages.get(&spec.id) {
        Some(record) if record.info.state != StageState::Cancelled => {}
        _ => return Readiness::Skip,
    }
    for dependency in &spec.depends_on {
        match registry.stages.get(dependency).map(|r| r.info.state) {
            Some(StageState::Succeeded) => {}
            Some(StageState::Failed | StageState::Cancelled) | None => return Readiness::Skip,
            Some(_) => return Readiness::Waiting,
        }
    }
    Readiness::Ready
}

fn update(registry: &SharedRegistry, stage_id: &str, f: impl FnOnce(&mut StageInfo)) {
    if let Some(record) = registry.lock().stages.get_mut(stage_id) {
        if record.info.state != StageState::Cancelled {
            f(&mut record.info);
        }
    }
}

fn finish(
    registry: &SharedRegistry,
    stage_id: &str,
    state: StageState,
    failure: Option<StageFailure>,
) {
    update(registry, stage_id, |info| {
        info.state = state;
        info.failure = failure;
    });
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn drive_chain(
    registry: SharedRegistry,
    network: Arc<dyn NetworkMonitor>,
    unique_id: String,
    stages: Vec<(StageSpec, watch::Receiver<bool>)>,
    done: watch::Sender<bool>,
) {
    let mut pending = stages;
    let mut running = JoinSet::new();
    loop {
        let mut waiting = Vec::with_capacity(pending.len());
        for (spec, cancel) in pending {
            match readiness(&registry, &spec) {
                Readiness::Ready => {
                    running.spawn(run_stage(registry.clone(), network.clone(), spec, cancel));
                }
                Readiness::Waiting => waiting.push((spec, cancel)),
                Readiness::Skip => {
                    debug!(target: SYNC_LOG_TARGET, stage_id = %spec.id, "stage skipped");
                    finish(&registry, &spec.id, StageState::Cancelled, None);
                }
            }
        }
        pending = waiting;

        if running.join_next().await.is_none() {
            for (spec, _) in pending.drain(..) {
                finish(&registry, &spec.id, StageState::Cancelled, None);
            }
            break;
        }
    }
    info!(target: SYNC_LOG_TARGET, unique_id = %unique_id, "chain finished");
    done.send_replace(true);
}

async fn run_stage(
    registry: SharedRegistry,
    network: Arc<dyn NetworkMonitor>,
    spec: StageSpec,
    mut cancel: watch::Receiver<bool>,
) {
    let mut attempt = 0;
    loop {
        if *cancel.borrow() {
            finish(&registry, &spec.id, StageState::Cancelled, None);
            return;
        }
        attempt += 1;
        update(&registry, &spec.id, |info| info.state = StageState::Enqueued);
        if spec.requires_network && !network.is_online() {
            debug!(target: SYNC_LOG_TARGET, stage_id = %spec.id, "waiting for network");
            tokio::select! {
                _ = network.wait_online() => {}
                _ = cancelled(&mut cancel) => {
                    finish(&registry, &spec.id, StageState::Cancelled, None);
                    return;
                }
            }
        }

        update(&registry, &spec.id, |info| {
            info.state = StageState::Running;
            info.attempts = attempt;
        });
        let ctx = StageContext {
            stage_id: spec.id.clone(),
            attempt,
        };
        let outcome = tokio::select! {
            outcome = AssertUnwindSafe(spec.job.run(ctx)).catch_unwind() => {
                outcome.unwrap_or_else(|_| {
                    StageOutcome::Failure(StageFailure::new(FailureReason::Fatal, "stage panicked"))
                })
            }
            _ = cancelled(&mut cancel) => {
                finish(&registry, &spec.id, StageState::Cancelled, None);
                return;
            }
        };

        match outcome {
            StageOutcome::Success => {
                debug!(target: SYNC_LOG_TARGET, stage_id = %spec.id, attempt, "stage succeeded");
                finish(&registry, &spec.id, StageState::Succeeded, None);
                return;
            }
            StageOutcome::Failure(failure) => {
                warn!(target: SYNC_LOG_TARGET, stage_id = %spec.id, reason = ?failure.reason, message = %failure.message, "stage failed");
                finish(&registry, &spec.id, StageState::Failed, Some(failure));
                return;
            }
            StageOutcome::Retry(message) => {
                if attempt >= spec.backoff.max_attempts {
                    warn!(target: SYNC_LOG_TARGET, stage_id = %spec.id, attempt, %message, "stage out of attempts");
                    let failure = StageFailure::new(FailureReason::Exhausted, message);
                    finish(&registry, &spec.id, StageState::Failed, Some(failure));
                    return;
                }
                let delay = spec.backoff.delay_for_attempt(attempt);
                debug!(target: SYNC_LOG_TARGET, stage_id = %spec.id, attempt, ?delay, %message, "stage will retry");
                update(&registry, &spec.id, |info| info.state = StageState::Enqueued);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancelled(&mut cancel) => {
                        finish(&registry, &spec.id, StageState::Cancelled, None);
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Recording {
        log: Arc<Mutex<Vec<String>>>,
        outcome: StageOutcome,
    }

    #[async_trait]
    impl StageJob for Recording {
        async fn run(&self, ctx: StageContext) -> StageOutcome {
            self.log.lock().push(ctx.stage_id);
            self.outcome.clone()
        }
    }

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl StageJob for Flaky {
        async fn run(&self, _ctx: StageContext) -> StageOutcome {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                StageOutcome::Retry("not yet".into())
            } else {
                StageOutcome::Success
            }
        }
    }

    struct Gate(Arc<Notify>);

    #[async_trait]
    impl StageJob for Gate {
        async fn run(&self, _ctx: StageContext) -> StageOutcome {
            self.0.notified().await;
            StageOutcome::Success
        }
    }

    fn recording(log: &Arc<Mutex<Vec<String>>>, outcome: StageOutcome) -> Arc<dyn StageJob> {
        Arc::new(Recording {
            log: log.clone(),
            outcome,
        })
    }

    fn fast_retry(attempts: u32) -> BackoffPolicy {
        BackoffPolicy::linear(Duration::from_millis(1), attempts)
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..2000 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition not reached");
    }

    fn state(scheduler: &TokioScheduler, id: &str) -> StageState {
        scheduler.stage(id).unwrap().state
    }

    #[tokio::test]
    async fn stages_run_after_their_dependencies() {
        let scheduler = TokioScheduler::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ChainSpec::new()
            .with_stage(StageSpec::new("start", recording(&log, StageOutcome::Success)))
            .with_stage(StageSpec::new("a", recording(&log, StageOutcome::Success)).after("start"))
            .with_stage(StageSpec::new("b", recording(&log, StageOutcome::Success)).after("start"))
            .with_stage(
                StageSpec::new("end", recording(&log, StageOutcome::Success))
                    .after("a")
                    .after("b"),
            );

        let handle = scheduler.submit("sync", chain).unwrap();
        handle.wait().await;

        let log = log.lock().clone();
        assert_eq!(log.len(), 4);
        assert_eq!(log[0], "start");
        assert_eq!(log[3], "end");
        assert!(handle
            .stage_ids
            .iter()
            .all(|id| state(&scheduler, id) == StageState::Succeeded));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let scheduler = TokioScheduler::default();
        let job = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let chain =
            ChainSpec::new().with_stage(StageSpec::new("s", job).with_backoff(fast_retry(5)));

        scheduler.submit("sync", chain).unwrap().wait().await;
        let info = scheduler.stage("s").unwrap();
        assert_eq!(info.state, StageState::Succeeded);
        assert_eq!(info.attempts, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_and_skip_dependents() {
        let scheduler = TokioScheduler::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ChainSpec::new()
            .with_stage(
                StageSpec::new("s", recording(&log, StageOutcome::Retry("offline".into())))
                    .with_backoff(fast_retry(3)),
            )
            .with_stage(StageSpec::new("end", recording(&log, StageOutcome::Success)).after("s"));

        scheduler.submit("sync", chain).unwrap().wait().await;
        let info = scheduler.stage("s").unwrap();
        assert_eq!(info.state, StageState::Failed);
        assert_eq!(info.attempts, 3);
        assert_eq!(info.failure.unwrap().reason, FailureReason::Exhausted);
        assert_eq!(state(&scheduler, "end"), StageState::Cancelled);
        assert_eq!(log.lock().as_slice(), ["s", "s", "s"]);
    }

    #[tokio::test]
    async fn failure_is_not_retried() {
        let scheduler = TokioScheduler::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let failure = StageFailure::new(
            FailureReason::Maintenance {
                estimated_outage_secs: Some(60),
            },
            "maintenance",
        );
        let chain = ChainSpec::new().with_stage(
            StageSpec::new("s", recording(&log, StageOutcome::Failure(failure.clone())))
                .with_backoff(fast_retry(5)),
        );

        scheduler.submit("sync", chain).unwrap().wait().await;
        let info = scheduler.stage("s").unwrap();
        assert_eq!(info.failure, Some(failure));
        assert_eq!(info.attempts, 1);
    }

    #[tokio::test]
    async fn unfinished_chain_is_kept() {
        let scheduler = TokioScheduler::default();
        let gate = Arc::new(Notify::new());
        let first = ChainSpec::new()
            .with_stage(StageSpec::new("gate-1", Arc::new(Gate(gate.clone()))).with_tag("master"));
        let handle = scheduler.submit("sync", first).unwrap();
        assert!(!handle.reused);

        let second = ChainSpec::new()
            .with_stage(StageSpec::new("gate-2", Arc::new(Gate(gate.clone()))).with_tag("master"));
        let again = scheduler.submit("sync", second).unwrap();
        assert!(again.reused);
        assert_eq!(again.stage_ids, vec!["gate-1"]);
        assert!(scheduler.stage("gate-2").is_none());

        eventually(|| state(&scheduler, "gate-1") == StageState::Running).await;
        gate.notify_one();
        handle.wait().await;

        let log = Arc::new(Mutex::new(Vec::new()));
        let third = ChainSpec::new()
            .with_stage(StageSpec::new("next", recording(&log, StageOutcome::Success)));
        let replaced = scheduler.submit("sync", third).unwrap();
        assert!(!replaced.reused);
        replaced.wait().await;
        assert!(scheduler.stage("gate-1").is_none());
        assert_eq!(scheduler.stages_by_tag("master").len(), 0);
    }

    #[tokio::test]
    async fn cancel_by_tag_stops_running_and_pending_stages() {
        let scheduler = TokioScheduler::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ChainSpec::new()
            .with_stage(
                StageSpec::new("gate", Arc::new(Gate(Arc::new(Notify::new())))).with_tag("t"),
            )
            .with_stage(
                StageSpec::new("end", recording(&log, StageOutcome::Success))
                    .after("gate")
                    .with_tag("t"),
            );
        let handle = scheduler.submit("sync", chain).unwrap();
        eventually(|| state(&scheduler, "gate") == StageState::Running).await;

        assert_eq!(scheduler.cancel_by_tag("t"), 2);
        handle.wait().await;
        assert_eq!(state(&scheduler, "gate"), StageState::Cancelled);
        assert_eq!(state(&scheduler, "end"), StageState::Cancelled);
        assert!(log.lock().is_empty());
        assert_eq!(scheduler.cancel_by_tag("t"), 0);
    }

    #[tokio::test]
    async fn network_stages_wait_for_connectivity() {
        let network = Arc::new(ManualNetwork::new(false));
        let scheduler = TokioScheduler::new(network.clone());
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ChainSpec::new().with_stage(
            StageSpec::new("up", recording(&log, StageOutcome::Success)).with_network(true),
        );
        let handle = scheduler.submit("sync", chain).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(state(&scheduler, "up"), StageState::Enqueued);
        assert!(log.lock().is_empty());

        network.set_online(true);
        handle.wait().await;
        assert_eq!(state(&scheduler, "up"), StageState::Succeeded);
    }

    #[test]
    fn chain_validation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let forward = ChainSpec::new()
            .with_stage(StageSpec::new("a", recording(&log, StageOutcome::Success)).after("b"))
            .with_stage(StageSpec::new("b", recording(&log, StageOutcome::Success)));
        assert!(matches!(forward.validate(), Err(SyncError::Scheduler(_))));

        let duplicate = ChainSpec::new()
            .with_stage(StageSpec::new("a", recording(&log, StageOutcome::Success)))
            .with_stage(StageSpec::new("a", recording(&log, StageOutcome::Success)));
        assert!(duplicate.validate().is_err());
    }

    #[test]
    fn submit_needs_a_runtime() {
        let scheduler = TokioScheduler::default();
        let result = scheduler.submit("sync", ChainSpec::new());
        assert!(matches!(result, Err(SyncError::Scheduler(_))));
    }
}
