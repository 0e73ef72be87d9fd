//! Event scopes.

use crate::error::EventResult;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// What a scope groups together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventScopeType {
    /// A field session driven by the calling app.
    Session,
    /// A down-sync run.
    DownSync,
    /// An up-sync run.
    UpSync,
}

impl EventScopeType {
    /// The order in which scope types are drained by up-sync.
    pub const UPLOAD_ORDER: [EventScopeType; 3] = [
        EventScopeType::Session,
        EventScopeType::DownSync,
        EventScopeType::UpSync,
    ];

    /// Returns the stable name used in storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            EventScopeType::Session => "SESSION",
            EventScopeType::DownSync => "DOWN_SYNC",
            EventScopeType::UpSync => "UP_SYNC",
        }
    }
}

impl std::fmt::Display for EventScopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a scope was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventScopeEndCause {
    /// The workflow finished normally.
    WorkflowEnded,
    /// A new session replaced this one.
    NewSession,
}

/// Biometric modality enabled for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum Modality {
    Fingerprint,
    Face,
}

/// Device description stamped on each scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Device {
    pub device_id: String,
    #[serde(default)]
    pub android_sdk_version: String,
    #[serde(default)]
    pub device_model: String,
}

/// Snapshot of the local database when the scope was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInfo {
    /// Number of session scopes stored when this one was created.
    pub session_count: u32,
}

/// Metadata carried by a scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct EventScopePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_cause: Option<EventScopeEndCause>,
    #[serde(default)]
    pub modalities: Vec<Modality>,
    #[serde(default)]
    pub device: Device,
    #[serde(default)]
    pub database_info: DatabaseInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub app_version: String,
}

/// A group of events uploaded together.
///
/// At most one open [`EventScopeType::Session`] scope exists at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventScope {
    /// Unique scope id.
    pub id: String,
    /// Project the scope was recorded under.
    pub project_id: String,
    /// What the scope groups.
    #[serde(rename = "type")]
    pub scope_type: EventScopeType,
    /// Creation time.
    pub created_at: Timestamp,
    /// Close time, if closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
    /// Whether the scope is closed and ready for upload.
    #[serde(default)]
    pub closed: bool,
    /// Scope metadata.
    #[serde(default)]
    pub payload: EventScopePayload,
}

impl EventScope {
    /// Creates an open scope.
    pub fn new(
        id: impl Into<String>,
        project_id: impl Into<String>,
        scope_type: EventScopeType,
        created_at: Timestamp,
        payload: EventScopePayload,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            scope_type,
            created_at,
            ended_at: None,
            closed: false,
            payload,
        }
    }

    /// Marks the scope closed at `ended_at`.
    pub fn close(&mut self, ended_at: Timestamp, cause: Option<EventScopeEndCause>) {
        self.ended_at = Some(ended_at);
        self.closed = true;
        if cause.is_some() {
            self.payload.end_cause = cause;
        }
    }

    /// Encodes the scope to JSON.
    pub fn to_json(&self) -> EventResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a scope from JSON.
    pub fn from_json(json: &str) -> EventResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> EventScope {
        EventScope::new(
            "s1",
            "p1",
            EventScopeType::Session,
            Timestamp(100),
            EventScopePayload::default(),
        )
    }

    #[test]
    fn new_scope_is_open() {
        let s = scope();
        assert!(!s.closed);
        assert!(s.ended_at.is_none());
    }

    #[test]
    fn close_sets_end_fields() {
        let mut s = scope();
        s.close(Timestamp(200), Some(EventScopeEndCause::NewSession));
        assert!(s.closed);
        assert_eq!(s.ended_at, Some(Timestamp(200)));
        assert_eq!(s.payload.end_cause, Some(EventScopeEndCause::NewSession));
    }

    #[test]
    fn close_without_cause_keeps_existing_cause() {
        let mut s = scope();
        s.payload.end_cause = Some(EventScopeEndCause::WorkflowEnded);
        s.close(Timestamp(200), None);
        assert_eq!(s.payload.end_cause, Some(EventScopeEndCause::WorkflowEnded));
    }

    #[test]
    fn json_uses_type_field() {
        let json = scope().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "SESSION");
        assert_eq!(value["projectId"], "p1");
        assert_eq!(EventScope::from_json(&json).unwrap(), scope());
    }

    #[test]
    fn upload_order() {
        assert_eq!(
            EventScopeType::UPLOAD_ORDER.map(EventScopeType::as_str),
            ["SESSION", "DOWN_SYNC", "UP_SYNC"]
        );
    }
}
