//! # FieldSync Engine
//!
//! Bidirectional sync between the local event store and the backend.
//!
//! This crate provides:
//! - Up-sync: drains closed scopes to the backend, quarantining scopes
//!   that no longer decode
//! - Down-sync: streams the remote enrolment log into the local subject
//!   database with a resumable per-partition cursor
//! - A task-graph job scheduler with retries and network gating
//! - The sync orchestrator that plans, deduplicates and reports syncs
//! - The remote events API over reqwest, plus a scripted mock
//!
//! ## Architecture
//!
//! A sync is one chain of stages:
//! 1. A start stage
//! 2. The up-sync stage and one down-sync stage per partition, in parallel
//! 3. An end stage that records the successful sync time
//!
//! ## Key Invariants
//!
//! - A scope is deleted only after the backend accepted it
//! - A down-sync cursor only moves past records applied locally
//! - At most one sync chain is in flight
//! - Sync runs leave audit events in their tracking scopes

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod down_sync;
mod error;
mod http;
mod orchestrator;
mod project;
mod scheduler;
mod stream;
mod subjects;
mod transport;
mod up_sync;

/// Tracing target of the sync pipelines.
pub const SYNC_LOG_TARGET: &str = "fieldsync::sync";

pub use config::{BackoffPolicy, IntegrationIssuePredicate, SyncConfig, DEFAULT_CHANNEL_CAPACITY};
pub use context::SyncContext;
pub use down_sync::{actions_for, DownSyncProgress, EventDownSyncTask};
pub use error::{SyncError, SyncResult};
pub use http::{
    classify_status, HttpClient, HttpEventRemote, HttpResponse, ReqwestClient,
    EVENT_COUNT_HEADER, EVENT_COUNT_LOWER_BOUND_HEADER, REQUEST_ID_HEADER,
};
pub use orchestrator::{
    outcome_for_error, DefaultChainBuilder, RemoteCounts, SyncChainBuilder, SyncOrchestrator,
    SyncPlan, SyncState, SyncSummary, DOWN_SYNC_TAG, END_SYNC_TAG, MASTER_SYNC_TAG,
    START_SYNC_TAG, SYNC_CHAIN_ID, SYNC_ID_TAG_PREFIX, UP_SYNC_TAG,
};
pub use project::{
    ConfigProvider, ProjectConfiguration, ProjectState, SecurityManager, StaticConfigProvider,
    StaticSecurity, SyncFrequency,
};
pub use scheduler::{
    AlwaysOnline, ChainHandle, ChainSpec, FailureReason, JobScheduler, ManualNetwork,
    NetworkMonitor, StageContext, StageFailure, StageInfo, StageJob, StageOutcome, StageSpec,
    StageState, TokioScheduler,
};
pub use stream::{spawn_record_stream, JsonArraySplitter};
pub use subjects::{MemorySubjectRepository, SubjectAction, SubjectRepository};
pub use transport::{EventRemoteDataSource, EventStream, MockRemote, UploadResult};
pub use up_sync::{EventUpSyncTask, UpSyncFailure, UpSyncProgress};
