//! Enrolled subjects, as written by down-sync.

use crate::scope::Modality;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// A set of templates for one modality. Templates are opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct BiometricReference {
    pub id: String,
    pub modality: Modality,
    pub format: String,
    #[serde(default)]
    pub templates: Vec<serde_json::Value>,
}

/// A person enrolled in a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Subject {
    pub subject_id: String,
    pub project_id: String,
    pub attendant_id: String,
    pub module_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub biometric_references: Vec<BiometricReference>,
}

impl Subject {
    /// Returns true if the subject has a reference for `modality`.
    pub fn has_modality(&self, modality: Modality) -> bool {
        self.biometric_references
            .iter()
            .any(|r| r.modality == modality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_modality() {
        let subject = Subject {
            subject_id: "s1".into(),
            project_id: "p1".into(),
            attendant_id: "u1".into(),
            module_id: "m1".into(),
            created_at: None,
            biometric_references: vec![BiometricReference {
                id: "r1".into(),
                modality: Modality::Face,
                format: "RANK_ONE".into(),
                templates: vec![],
            }],
        };
        assert!(subject.has_modality(Modality::Face));
        assert!(!subject.has_modality(Modality::Fingerprint));
    }
}
