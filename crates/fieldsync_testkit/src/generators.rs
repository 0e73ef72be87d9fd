//! Property-based test generators using proptest.
//!
//! Strategies produce events and remote records that the store validators
//! and the down-sync partition rules accept.

use crate::fixtures::{consent_event, creation_record, deletion_record, TEST_MODULE};
use fieldsync_events::{EnrolmentRecordEvent, Event, Modality, UpSyncKind};
use proptest::prelude::*;

/// Strategy for generating subject ids.
pub fn subject_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-f0-9]{8}").expect("Invalid regex")
}

/// Strategy for generating session events that never trip a validator.
///
/// Only consent events are produced, so any number fit in one session.
pub fn session_events_strategy(max: usize) -> impl Strategy<Value = Vec<Event>> {
    prop::collection::vec(1u64..1_000_000, 1..=max.max(1))
        .prop_map(|times| times.into_iter().map(consent_event).collect())
}

/// Strategy for generating the number of events in each of several scopes.
pub fn scope_sizes_strategy(
    max_scopes: usize,
    max_events: usize,
) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1..=max_events.max(1), 0..=max_scopes)
}

/// Strategy for generating a remote log of creations and deletions in
/// [`TEST_MODULE`] with ids `r1`, `r2`, ...
pub fn record_log_strategy(max: usize) -> impl Strategy<Value = Vec<EnrolmentRecordEvent>> {
    prop::collection::vec((any::<bool>(), 0u8..16), 0..=max).prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (create, subject))| {
                let id = format!("r{}", i + 1);
                let subject_id = format!("subject-{subject}");
                if create {
                    creation_record(&id, &subject_id, TEST_MODULE)
                } else {
                    deletion_record(&id, &subject_id, TEST_MODULE)
                }
            })
            .collect()
    })
}

/// Strategy for generating up-sync policies.
pub fn up_sync_kind_strategy() -> impl Strategy<Value = UpSyncKind> {
    prop_oneof![
        Just(UpSyncKind::All),
        Just(UpSyncKind::OnlyBiometrics),
        Just(UpSyncKind::OnlyAnalytics),
        Just(UpSyncKind::None),
    ]
}

/// Strategy for generating a non-empty set of modalities.
pub fn modes_strategy() -> impl Strategy<Value = Vec<Modality>> {
    prop_oneof![
        Just(vec![Modality::Fingerprint]),
        Just(vec![Modality::Face]),
        Just(vec![Modality::Fingerprint, Modality::Face]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn record_ids_are_sequential(log in record_log_strategy(20)) {
            for (i, record) in log.iter().enumerate() {
                prop_assert_eq!(&record.id, &format!("r{}", i + 1));
            }
        }

        #[test]
        fn session_events_are_never_empty(events in session_events_strategy(5)) {
            prop_assert!(!events.is_empty());
            prop_assert!(events.len() <= 5);
        }

        #[test]
        fn scope_sizes_are_positive(sizes in scope_sizes_strategy(4, 3)) {
            prop_assert!(sizes.iter().all(|n| (1..=3).contains(n)));
        }
    }
}
