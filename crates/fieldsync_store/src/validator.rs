//! Per-scope event validators.

use crate::error::{StoreError, StoreResult};
use fieldsync_events::{Event, EventType};

/// Checks an event against the events already in its scope.
pub trait EventValidator: Send + Sync {
    /// Returns an error if adding `event` to a scope holding `current`
    /// would break an invariant. `current` may contain a previous version
    /// of `event`.
    fn validate(&self, current: &[Event], event: &Event) -> StoreResult<()>;
}

fn reject_second_of_type(
    validator: &'static str,
    event_type: EventType,
    current: &[Event],
    event: &Event,
) -> StoreResult<()> {
    if event.event_type() != event_type {
        return Ok(());
    }
    let existing = current
        .iter()
        .any(|e| e.event_type() == event_type && e.id != event.id);
    if existing {
        return Err(StoreError::validation(
            validator,
            format!("scope already has a {event_type:?} event"),
        ));
    }
    Ok(())
}

/// A scope may hold at most one guid selection.
#[derive(Debug, Default, Clone, Copy)]
pub struct GuidSelectionValidator;

impl EventValidator for GuidSelectionValidator {
    fn validate(&self, current: &[Event], event: &Event) -> StoreResult<()> {
        reject_second_of_type(
            "GuidSelectionValidator",
            EventType::GuidSelection,
            current,
            event,
        )
    }
}

/// A scope may hold at most one enrolment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnrolmentValidator;

impl EventValidator for EnrolmentValidator {
    fn validate(&self, current: &[Event], event: &Event) -> StoreResult<()> {
        reject_second_of_type("EnrolmentValidator", EventType::Enrolment, current, event)
    }
}

/// Returns the validators registered on a new repository.
pub fn default_validators() -> Vec<Box<dyn EventValidator>> {
    vec![Box::new(GuidSelectionValidator), Box::new(EnrolmentValidator)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_events::{EnrolmentPayload, EventPayload, GuidSelectionPayload, Timestamp};

    fn selection(id: &str) -> Event {
        Event::with_id(
            id,
            EventPayload::GuidSelection(GuidSelectionPayload {
                created_at: Timestamp(1),
                selected_id: "s1".into(),
            }),
        )
    }

    fn enrolment(id: &str) -> Event {
        Event::with_id(
            id,
            EventPayload::Enrolment(EnrolmentPayload {
                created_at: Timestamp(1),
                subject_id: "s1".into(),
                project_id: "p1".into(),
                module_id: "m1".into(),
                attendant_id: "u1".into(),
                person_creation_id: "pc1".into(),
            }),
        )
    }

    #[test]
    fn second_selection_rejected() {
        let err = GuidSelectionValidator
            .validate(&[selection("a")], &selection("b"))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn updating_same_selection_allowed() {
        assert!(GuidSelectionValidator
            .validate(&[selection("a")], &selection("a"))
            .is_ok());
    }

    #[test]
    fn other_types_ignored() {
        assert!(GuidSelectionValidator
            .validate(&[selection("a")], &enrolment("b"))
            .is_ok());
        assert!(EnrolmentValidator
            .validate(&[selection("a")], &selection("b"))
            .is_ok());
    }

    #[test]
    fn second_enrolment_rejected() {
        assert!(EnrolmentValidator
            .validate(&[enrolment("a")], &enrolment("b"))
            .is_err());
    }
}
