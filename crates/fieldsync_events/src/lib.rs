//! # FieldSync Events
//!
//! Event, scope and sync operation types for FieldSync.
//!
//! This crate provides:
//! - [`Event`] with its closed [`EventPayload`] union keyed by a `"type"` tag
//! - [`EventScope`], the unit of upload (a field session or a sync run)
//! - [`DownSyncOperation`] / [`UpSyncOperation`] durable sync cursors
//! - Remote wire bodies ([`UploadEventsBody`], [`EnrolmentRecordEvent`], ...)
//! - The up-sync policy ([`UpSyncKind`]) used to filter what leaves a device
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod operation;
mod policy;
mod remote;
mod scope;
mod subject;
mod time;

pub use error::{EventError, EventResult};
pub use event::{
    ArtificialTerminationPayload, ArtificialTerminationReason, AuthenticationPayload,
    AuthenticationResult, BiometricsPayload, CallbackPayload, CalloutPayload, CapturePayload,
    CaptureResult, ConnectivitySnapshotPayload, ConsentPayload,
    ConsentResult, DownSyncRequestPayload, EnrolmentPayload, Event, EventLabels, EventPayload,
    EventType, GuidSelectionPayload, MatchEntry, MatchPayload, PersonCreationPayload,
    UpSyncRequestContent, UpSyncRequestPayload,
};
pub use operation::{
    DownSyncOperation, DownSyncPartition, RemoteEventQuery, SyncOperationState, UpSyncOperation,
};
pub use policy::UpSyncKind;
pub use remote::{
    EnrolmentRecordEvent, EnrolmentRecordEventType, EnrolmentRecordPayload, EventCount,
    ScopeUpload, UploadEventsBody,
};
pub use scope::{
    DatabaseInfo, Device, EventScope, EventScopeEndCause, EventScopePayload, EventScopeType,
    Modality,
};
pub use subject::{BiometricReference, Subject};
pub use time::Timestamp;

/// Project id stamped on scopes created while no project is signed in.
pub const PROJECT_ID_FOR_NOT_SIGNED_IN: &str = "NOT_SIGNED_IN";
