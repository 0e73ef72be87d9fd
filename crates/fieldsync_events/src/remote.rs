//! Bodies exchanged with the remote events API.

use crate::event::Event;
use crate::scope::{EventScope, EventScopeType};
use crate::subject::{BiometricReference, Subject};
use serde::{Deserialize, Serialize};

/// Kinds of records in the remote enrolment log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum EnrolmentRecordEventType {
    EnrolmentRecordCreation,
    EnrolmentRecordDeletion,
    EnrolmentRecordMove,
}

/// Content of a remote enrolment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EnrolmentRecordPayload {
    /// A subject was enrolled.
    #[serde(rename_all = "camelCase")]
    EnrolmentRecordCreation {
        /// Subject id.
        subject_id: String,
        /// Project id.
        project_id: String,
        /// Module the subject belongs to.
        module_id: String,
        /// Attendant who enrolled the subject.
        attendant_id: String,
        /// Templates of the subject.
        #[serde(default)]
        biometric_references: Vec<BiometricReference>,
    },
    /// A subject was removed.
    #[serde(rename_all = "camelCase")]
    EnrolmentRecordDeletion {
        /// Subject id.
        subject_id: String,
        /// Project id.
        project_id: String,
        /// Module the subject belonged to.
        module_id: String,
        /// Attendant the subject belonged to.
        attendant_id: String,
    },
    /// A subject changed module or attendant.
    ///
    /// Applied as a deletion followed by a creation. Either side is absent
    /// when it falls outside the partition being synced.
    #[serde(rename_all = "camelCase")]
    EnrolmentRecordMove {
        /// Record to remove.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deletion: Option<Box<EnrolmentRecordPayload>>,
        /// Record to create.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        creation: Option<Box<EnrolmentRecordPayload>>,
    },
}

impl EnrolmentRecordPayload {
    /// Returns the discriminator of this payload.
    pub fn event_type(&self) -> EnrolmentRecordEventType {
        match self {
            EnrolmentRecordPayload::EnrolmentRecordCreation { .. } => {
                EnrolmentRecordEventType::EnrolmentRecordCreation
            }
            EnrolmentRecordPayload::EnrolmentRecordDeletion { .. } => {
                EnrolmentRecordEventType::EnrolmentRecordDeletion
            }
            EnrolmentRecordPayload::EnrolmentRecordMove { .. } => {
                EnrolmentRecordEventType::EnrolmentRecordMove
            }
        }
    }

    /// Builds the subject a creation record describes.
    pub fn to_subject(&self) -> Option<Subject> {
        match self {
            EnrolmentRecordPayload::EnrolmentRecordCreation {
                subject_id,
                project_id,
                module_id,
                attendant_id,
                biometric_references,
            } => Some(Subject {
                subject_id: subject_id.clone(),
                project_id: project_id.clone(),
                attendant_id: attendant_id.clone(),
                module_id: module_id.clone(),
                created_at: None,
                biometric_references: biometric_references.clone(),
            }),
            _ => None,
        }
    }
}

/// One record of the remote enrolment log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolmentRecordEvent {
    /// Record id, used as the down-sync cursor.
    pub id: String,
    /// Record content.
    pub payload: EnrolmentRecordPayload,
}

/// A per-type count returned by the count endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCount {
    /// Record type counted.
    #[serde(rename = "type")]
    pub event_type: EnrolmentRecordEventType,
    /// Number of records.
    pub count: u32,
}

/// A scope and its events as uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeUpload {
    /// The scope.
    #[serde(flatten)]
    pub scope: EventScope,
    /// Its events, already filtered by the up-sync policy.
    pub events: Vec<Event>,
}

/// Body of the upload endpoint, with scopes grouped by type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct UploadEventsBody {
    #[serde(default)]
    pub sessions: Vec<ScopeUpload>,
    #[serde(default)]
    pub event_down_syncs: Vec<ScopeUpload>,
    #[serde(default)]
    pub event_up_syncs: Vec<ScopeUpload>,
}

impl UploadEventsBody {
    /// Builds a body holding `scopes` under the group for `scope_type`.
    pub fn for_scope_type(scope_type: EventScopeType, scopes: Vec<ScopeUpload>) -> Self {
        let mut body = Self::default();
        match scope_type {
            EventScopeType::Session => body.sessions = scopes,
            EventScopeType::DownSync => body.event_down_syncs = scopes,
            EventScopeType::UpSync => body.event_up_syncs = scopes,
        }
        body
    }

    /// Returns true if the body carries no scopes.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.event_down_syncs.is_empty() && self.event_up_syncs.is_empty()
    }

    /// Ids of every scope in the body.
    pub fn scope_ids(&self) -> Vec<String> {
        self.sessions
            .iter()
            .chain(&self.event_down_syncs)
            .chain(&self.event_up_syncs)
            .map(|s| s.scope.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::EventScopePayload;
    use crate::time::Timestamp;

    #[test]
    fn decode_creation_record() {
        let json = r#"{
            "id": "r1",
            "payload": {
                "type": "EnrolmentRecordCreation",
                "subjectId": "s1",
                "projectId": "p1",
                "moduleId": "m1",
                "attendantId": "u1",
                "biometricReferences": []
            }
        }"#;
        let record: EnrolmentRecordEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            record.payload.event_type(),
            EnrolmentRecordEventType::EnrolmentRecordCreation
        );
        let subject = record.payload.to_subject().unwrap();
        assert_eq!(subject.subject_id, "s1");
    }

    #[test]
    fn decode_move_with_missing_side() {
        let json = r#"{
            "id": "r2",
            "payload": {
                "type": "EnrolmentRecordMove",
                "deletion": {
                    "type": "EnrolmentRecordDeletion",
                    "subjectId": "s1",
                    "projectId": "p1",
                    "moduleId": "m1",
                    "attendantId": "u1"
                }
            }
        }"#;
        let record: EnrolmentRecordEvent = serde_json::from_str(json).unwrap();
        match record.payload {
            EnrolmentRecordPayload::EnrolmentRecordMove { deletion, creation } => {
                assert!(deletion.is_some());
                assert!(creation.is_none());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn decode_counts() {
        let json = r#"[{"type":"EnrolmentRecordCreation","count":3},{"type":"EnrolmentRecordDeletion","count":1}]"#;
        let counts: Vec<EventCount> = serde_json::from_str(json).unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].count, 3);
    }

    #[test]
    fn body_groups_by_scope_type() {
        let scope = EventScope::new(
            "d1",
            "p1",
            EventScopeType::DownSync,
            Timestamp(1),
            EventScopePayload::default(),
        );
        let body = UploadEventsBody::for_scope_type(
            EventScopeType::DownSync,
            vec![ScopeUpload {
                scope,
                events: vec![],
            }],
        );
        assert!(body.sessions.is_empty());
        assert_eq!(body.scope_ids(), ["d1"]);

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["eventDownSyncs"][0]["id"], "d1");
        assert_eq!(value["eventDownSyncs"][0]["type"], "DOWN_SYNC");
        assert!(value["eventDownSyncs"][0]["events"].is_array());
    }
}
