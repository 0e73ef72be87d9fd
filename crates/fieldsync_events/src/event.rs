//! Events and their payloads.

use crate::error::EventResult;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Labels stamped on an event by the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLabels {
    /// Scope the event belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    /// Project of the owning scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Device that recorded the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Subject the event refers to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
}

/// A single domain occurrence recorded on the device.
///
/// Events are immutable once uploaded. Before that the repository may only
/// rewrite their [`EventLabels`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id.
    pub id: String,
    /// Labels assigned by the repository.
    #[serde(default)]
    pub labels: EventLabels,
    /// Kind-specific content, tagged with its [`EventType`].
    pub payload: EventPayload,
}

impl Event {
    /// Creates an event with a fresh id and empty labels.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            labels: EventLabels::default(),
            payload,
        }
    }

    /// Creates an event with a given id.
    pub fn with_id(id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: id.into(),
            labels: EventLabels::default(),
            payload,
        }
    }

    /// Returns the event type.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Encodes the event to JSON.
    pub fn to_json(&self) -> EventResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes an event from JSON.
    pub fn from_json(json: &str) -> EventResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// The discriminator of [`EventPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum EventType {
    EnrolmentCallout,
    IdentificationCallout,
    VerificationCallout,
    ConfirmationCallout,
    EnrolmentCallback,
    IdentificationCallback,
    RefusalCallback,
    Authentication,
    Consent,
    FingerprintCapture,
    FingerprintCaptureBiometrics,
    FaceCapture,
    FaceCaptureBiometrics,
    OneToOneMatch,
    OneToManyMatch,
    PersonCreation,
    Enrolment,
    GuidSelection,
    ArtificialTermination,
    ConnectivitySnapshot,
    EventUpSyncRequest,
    EventDownSyncRequest,
}

impl EventType {
    /// Events that carry or reference biometric templates.
    ///
    /// These are the only events sent under `UpSyncKind::OnlyBiometrics`.
    pub fn is_biometric(self) -> bool {
        matches!(
            self,
            EventType::Enrolment
                | EventType::PersonCreation
                | EventType::FingerprintCaptureBiometrics
                | EventType::FaceCaptureBiometrics
        )
    }

    /// Events holding raw biometric samples.
    pub fn is_raw_biometric_sample(self) -> bool {
        matches!(
            self,
            EventType::FingerprintCaptureBiometrics | EventType::FaceCaptureBiometrics
        )
    }
}

/// Kind-specific event content.
///
/// A closed union: adding a kind means adding a variant here and to
/// [`EventType`], and the compiler points at every match to update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum EventPayload {
    EnrolmentCallout(CalloutPayload),
    IdentificationCallout(CalloutPayload),
    VerificationCallout(CalloutPayload),
    ConfirmationCallout(CalloutPayload),
    EnrolmentCallback(CallbackPayload),
    IdentificationCallback(CallbackPayload),
    RefusalCallback(CallbackPayload),
    Authentication(AuthenticationPayload),
    Consent(ConsentPayload),
    FingerprintCapture(CapturePayload),
    FingerprintCaptureBiometrics(BiometricsPayload),
    FaceCapture(CapturePayload),
    FaceCaptureBiometrics(BiometricsPayload),
    OneToOneMatch(MatchPayload),
    OneToManyMatch(MatchPayload),
    PersonCreation(PersonCreationPayload),
    Enrolment(EnrolmentPayload),
    GuidSelection(GuidSelectionPayload),
    ArtificialTermination(ArtificialTerminationPayload),
    ConnectivitySnapshot(ConnectivitySnapshotPayload),
    EventUpSyncRequest(UpSyncRequestPayload),
    EventDownSyncRequest(DownSyncRequestPayload),
}

impl EventPayload {
    /// Returns the discriminator of this payload.
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::EnrolmentCallout(_) => EventType::EnrolmentCallout,
            EventPayload::IdentificationCallout(_) => EventType::IdentificationCallout,
            EventPayload::VerificationCallout(_) => EventType::VerificationCallout,
            EventPayload::ConfirmationCallout(_) => EventType::ConfirmationCallout,
            EventPayload::EnrolmentCallback(_) => EventType::EnrolmentCallback,
            EventPayload::IdentificationCallback(_) => EventType::IdentificationCallback,
            EventPayload::RefusalCallback(_) => EventType::RefusalCallback,
            EventPayload::Authentication(_) => EventType::Authentication,
            EventPayload::Consent(_) => EventType::Consent,
            EventPayload::FingerprintCapture(_) => EventType::FingerprintCapture,
            EventPayload::FingerprintCaptureBiometrics(_) => {
                EventType::FingerprintCaptureBiometrics
            }
            EventPayload::FaceCapture(_) => EventType::FaceCapture,
            EventPayload::FaceCaptureBiometrics(_) => EventType::FaceCaptureBiometrics,
            EventPayload::OneToOneMatch(_) => EventType::OneToOneMatch,
            EventPayload::OneToManyMatch(_) => EventType::OneToManyMatch,
            EventPayload::PersonCreation(_) => EventType::PersonCreation,
            EventPayload::Enrolment(_) => EventType::Enrolment,
            EventPayload::GuidSelection(_) => EventType::GuidSelection,
            EventPayload::ArtificialTermination(_) => EventType::ArtificialTermination,
            EventPayload::ConnectivitySnapshot(_) => EventType::ConnectivitySnapshot,
            EventPayload::EventUpSyncRequest(_) => EventType::EventUpSyncRequest,
            EventPayload::EventDownSyncRequest(_) => EventType::EventDownSyncRequest,
        }
    }

    /// Returns the creation time of the payload.
    pub fn created_at(&self) -> Timestamp {
        match self {
            EventPayload::EnrolmentCallout(p)
            | EventPayload::IdentificationCallout(p)
            | EventPayload::VerificationCallout(p)
            | EventPayload::ConfirmationCallout(p) => p.created_at,
            EventPayload::EnrolmentCallback(p)
            | EventPayload::IdentificationCallback(p)
            | EventPayload::RefusalCallback(p) => p.created_at,
            EventPayload::Authentication(p) => p.created_at,
            EventPayload::Consent(p) => p.created_at,
            EventPayload::FingerprintCapture(p) | EventPayload::FaceCapture(p) => p.created_at,
            EventPayload::FingerprintCaptureBiometrics(p)
            | EventPayload::FaceCaptureBiometrics(p) => p.created_at,
            EventPayload::OneToOneMatch(p) | EventPayload::OneToManyMatch(p) => p.created_at,
            EventPayload::PersonCreation(p) => p.created_at,
            EventPayload::Enrolment(p) => p.created_at,
            EventPayload::GuidSelection(p) => p.created_at,
            EventPayload::ArtificialTermination(p) => p.created_at,
            EventPayload::ConnectivitySnapshot(p) => p.created_at,
            EventPayload::EventUpSyncRequest(p) => p.created_at,
            EventPayload::EventDownSyncRequest(p) => p.created_at,
        }
    }
}

/// An intent received from the calling app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct CalloutPayload {
    pub created_at: Timestamp,
    pub project_id: String,
    pub user_id: String,
    pub module_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

/// A response returned to the calling app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct CallbackPayload {
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scores: Vec<MatchEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Outcome of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum AuthenticationResult {
    Authenticated,
    BadCredentials,
    Offline,
    BackendMaintenanceError,
    TechnicalFailure,
}

/// A login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct AuthenticationPayload {
    pub created_at: Timestamp,
    pub ended_at: Timestamp,
    pub project_id: String,
    pub user_id: String,
    pub result: AuthenticationResult,
}

/// Answer given on the consent screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ConsentResult {
    Accepted,
    Declined,
    NoResponse,
}

/// Consent screen result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ConsentPayload {
    pub created_at: Timestamp,
    pub ended_at: Timestamp,
    pub result: ConsentResult,
}

/// Quality outcome of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum CaptureResult {
    GoodScan,
    BadQuality,
    NoFingerDetected,
    Skipped,
    Failure,
}

/// Metadata of a fingerprint or face capture attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct CapturePayload {
    pub created_at: Timestamp,
    pub ended_at: Timestamp,
    pub attempt: u32,
    pub quality: i32,
    pub result: CaptureResult,
}

/// A captured sample, opaque to the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct BiometricsPayload {
    pub created_at: Timestamp,
    pub capture_id: String,
    pub format: String,
    pub template: serde_json::Value,
}

/// One candidate returned by a matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct MatchEntry {
    pub candidate_id: String,
    pub score: f32,
}

/// A 1:1 or 1:N matching run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct MatchPayload {
    pub created_at: Timestamp,
    pub ended_at: Timestamp,
    pub matcher: String,
    pub candidates: Vec<MatchEntry>,
}

/// Creation of a person from a set of captures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct PersonCreationPayload {
    pub created_at: Timestamp,
    pub capture_ids: Vec<String>,
}

/// Enrolment of a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct EnrolmentPayload {
    pub created_at: Timestamp,
    pub subject_id: String,
    pub project_id: String,
    pub module_id: String,
    pub attendant_id: String,
    pub person_creation_id: String,
}

/// Selection of a candidate after an identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct GuidSelectionPayload {
    pub created_at: Timestamp,
    pub selected_id: String,
}

/// Why a scope was closed by the system instead of by its workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtificialTerminationReason {
    /// The scope was left open past its time limit.
    TimedOut,
    /// A new session started while this one was open.
    NewSession,
}

/// Marks a scope that was closed artificially.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ArtificialTerminationPayload {
    pub created_at: Timestamp,
    pub reason: ArtificialTerminationReason,
}

/// Network state at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ConnectivitySnapshotPayload {
    pub created_at: Timestamp,
    pub connections: Vec<String>,
}

/// How many scopes of each type an upload carried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct UpSyncRequestContent {
    pub session_count: u32,
    pub event_down_sync_count: u32,
    pub event_up_sync_count: u32,
}

impl UpSyncRequestContent {
    /// Returns true if the request carried anything besides sync telemetry.
    pub fn is_useful(&self) -> bool {
        self.session_count > 0 || self.event_down_sync_count > 0 || self.event_up_sync_count > 0
    }
}

/// Audit record of one upload request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct UpSyncRequestPayload {
    pub created_at: Timestamp,
    pub ended_at: Timestamp,
    pub request_id: String,
    #[serde(default)]
    pub content: UpSyncRequestContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

/// Audit record of one download run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct DownSyncRequestPayload {
    pub created_at: Timestamp,
    pub ended_at: Timestamp,
    pub request_id: String,
    pub query: String,
    pub event_read: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guid_selection(id: &str) -> Event {
        Event::with_id(
            id,
            EventPayload::GuidSelection(GuidSelectionPayload {
                created_at: Timestamp(10),
                selected_id: "subject-1".into(),
            }),
        )
    }

    #[test]
    fn payload_is_tagged_with_type() {
        let json = guid_selection("e1").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["payload"]["type"], "GUID_SELECTION");
        assert_eq!(value["payload"]["selectedId"], "subject-1");
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let json = r#"{"id":"e1","labels":{},"payload":{"type":"TELEPORTATION","createdAt":1}}"#;
        assert!(Event::from_json(json).is_err());
    }

    #[test]
    fn labels_default_when_missing() {
        let json = r#"{"id":"e1","payload":{"type":"CONNECTIVITY_SNAPSHOT","createdAt":5,"connections":["WIFI"]}}"#;
        let event = Event::from_json(json).unwrap();
        assert_eq!(event.labels, EventLabels::default());
        assert_eq!(event.event_type(), EventType::ConnectivitySnapshot);
        assert_eq!(event.payload.created_at(), Timestamp(5));
    }

    #[test]
    fn biometric_classification() {
        assert!(EventType::Enrolment.is_biometric());
        assert!(EventType::FaceCaptureBiometrics.is_biometric());
        assert!(EventType::FaceCaptureBiometrics.is_raw_biometric_sample());
        assert!(!EventType::Enrolment.is_raw_biometric_sample());
        assert!(!EventType::Consent.is_biometric());
    }

    #[test]
    fn up_sync_content_usefulness() {
        assert!(!UpSyncRequestContent::default().is_useful());
        let content = UpSyncRequestContent {
            session_count: 2,
            ..Default::default()
        };
        assert!(content.is_useful());
    }
}
