//! Durable sync operations.
//!
//! A [`DownSyncOperation`] is a cursor over one partition of the remote
//! event log. An [`UpSyncOperation`] tracks how far local scopes have been
//! drained. Both are stored and updated in place between runs.

use crate::scope::Modality;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// State of a sync operation after its last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncOperationState {
    /// Never run.
    NotStarted,
    /// Currently running, or interrupted while running.
    Running,
    /// Last run finished.
    Complete,
    /// Last run failed.
    Failed,
}

impl SyncOperationState {
    /// Returns true for `Complete` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncOperationState::Complete | SyncOperationState::Failed)
    }
}

/// Identity of one slice of the remote log.
///
/// Two operations with the same partition share a cursor, whatever their
/// `last_event_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct DownSyncPartition {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub modes: Vec<Modality>,
}

impl DownSyncPartition {
    /// A partition covering the whole project.
    pub fn project(project_id: impl Into<String>, modes: Vec<Modality>) -> Self {
        Self {
            project_id: project_id.into(),
            user_id: None,
            module_id: None,
            subject_id: None,
            modes,
        }
    }

    /// A partition covering one attendant.
    pub fn user(
        project_id: impl Into<String>,
        user_id: impl Into<String>,
        modes: Vec<Modality>,
    ) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::project(project_id, modes)
        }
    }

    /// A partition covering one module.
    pub fn module(
        project_id: impl Into<String>,
        module_id: impl Into<String>,
        modes: Vec<Modality>,
    ) -> Self {
        Self {
            module_id: Some(module_id.into()),
            ..Self::project(project_id, modes)
        }
    }

    /// Returns a stable key suitable for storage.
    pub fn storage_key(&self) -> String {
        let modes: Vec<&str> = self
            .modes
            .iter()
            .map(|m| match m {
                Modality::Fingerprint => "FINGERPRINT",
                Modality::Face => "FACE",
            })
            .collect();
        format!(
            "{}|{}|{}|{}|{}",
            self.project_id,
            self.user_id.as_deref().unwrap_or(""),
            self.module_id.as_deref().unwrap_or(""),
            self.subject_id.as_deref().unwrap_or(""),
            modes.join(",")
        )
    }
}

/// A resumable cursor over one partition of the remote log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownSyncOperation {
    /// The slice of the remote log this cursor walks.
    pub partition: DownSyncPartition,
    /// Last event applied locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_id: Option<String>,
    /// Time the cursor was last advanced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<Timestamp>,
    /// State after the last run.
    #[serde(default = "not_started")]
    pub state: SyncOperationState,
}

fn not_started() -> SyncOperationState {
    SyncOperationState::NotStarted
}

impl DownSyncOperation {
    /// Creates a fresh operation for a partition.
    pub fn new(partition: DownSyncPartition) -> Self {
        Self {
            partition,
            last_event_id: None,
            last_sync_time: None,
            state: SyncOperationState::NotStarted,
        }
    }

    /// Returns the identity of the partition, ignoring the cursor.
    pub fn key(&self) -> String {
        self.partition.storage_key()
    }

    /// Returns the remote query that resumes from this cursor.
    pub fn query(&self) -> RemoteEventQuery {
        RemoteEventQuery {
            project_id: self.partition.project_id.clone(),
            user_id: self.partition.user_id.clone(),
            module_id: self.partition.module_id.clone(),
            subject_id: self.partition.subject_id.clone(),
            modes: self.partition.modes.clone(),
            last_event_id: self.last_event_id.clone(),
        }
    }
}

/// Query sent to the remote events endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct RemoteEventQuery {
    pub project_id: String,
    pub user_id: Option<String>,
    pub module_id: Option<String>,
    pub subject_id: Option<String>,
    pub modes: Vec<Modality>,
    pub last_event_id: Option<String>,
}

impl RemoteEventQuery {
    /// Returns the URL query parameters, in a stable order.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(module_id) = &self.module_id {
            pairs.push(("l_moduleId", module_id.clone()));
        }
        if let Some(user_id) = &self.user_id {
            pairs.push(("l_attendantId", user_id.clone()));
        }
        if let Some(subject_id) = &self.subject_id {
            pairs.push(("l_subjectId", subject_id.clone()));
        }
        for mode in &self.modes {
            let mode = match mode {
                Modality::Fingerprint => "FINGERPRINT",
                Modality::Face => "FACE",
            };
            pairs.push(("l_mode", mode.to_string()));
        }
        if let Some(last_event_id) = &self.last_event_id {
            pairs.push(("lastEventId", last_event_id.clone()));
        }
        pairs
    }
}

/// Progress of draining local scopes for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpSyncOperation {
    /// Project being drained.
    pub project_id: String,
    /// Time of the last state change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<Timestamp>,
    /// State after the last run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_state: Option<SyncOperationState>,
}

impl UpSyncOperation {
    /// Creates an operation that has never run.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            last_sync_time: None,
            last_state: None,
        }
    }

    /// Records a state change at `now`.
    pub fn mark(&mut self, state: SyncOperationState, now: Timestamp) {
        self.last_state = Some(state);
        self.last_sync_time = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_cursor() {
        let mut op = DownSyncOperation::new(DownSyncPartition::module("p1", "m1", vec![]));
        let before = op.key();
        op.last_event_id = Some("e9".into());
        op.state = SyncOperationState::Complete;
        assert_eq!(op.key(), before);
    }

    #[test]
    fn partitions_have_distinct_keys() {
        let a = DownSyncPartition::module("p1", "m1", vec![]);
        let b = DownSyncPartition::module("p1", "m2", vec![]);
        let c = DownSyncPartition::user("p1", "m1", vec![]);
        assert_ne!(a.storage_key(), b.storage_key());
        assert_ne!(a.storage_key(), c.storage_key());
    }

    #[test]
    fn query_resumes_from_cursor() {
        let mut op = DownSyncOperation::new(DownSyncPartition::user(
            "p1",
            "u1",
            vec![Modality::Fingerprint, Modality::Face],
        ));
        op.last_event_id = Some("e5".into());
        let pairs = op.query().query_pairs();
        assert_eq!(
            pairs,
            vec![
                ("l_attendantId", "u1".to_string()),
                ("l_mode", "FINGERPRINT".to_string()),
                ("l_mode", "FACE".to_string()),
                ("lastEventId", "e5".to_string()),
            ]
        );
    }

    #[test]
    fn missing_state_defaults_to_not_started() {
        let op: DownSyncOperation =
            serde_json::from_str(r#"{"partition":{"projectId":"p1"}}"#).unwrap();
        assert_eq!(op.state, SyncOperationState::NotStarted);
        assert!(op.partition.modes.is_empty());
    }

    #[test]
    fn up_sync_mark() {
        let mut op = UpSyncOperation::new("p1");
        op.mark(SyncOperationState::Running, Timestamp(7));
        assert_eq!(op.last_state, Some(SyncOperationState::Running));
        assert_eq!(op.last_sync_time, Some(Timestamp(7)));
        assert!(!SyncOperationState::Running.is_terminal());
        assert!(SyncOperationState::Failed.is_terminal());
    }
}
