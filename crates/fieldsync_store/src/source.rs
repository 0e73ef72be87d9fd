//! Local event data source abstraction.

use crate::error::StoreResult;
use fieldsync_events::{Event, EventScope, EventScopeType, EventType};

/// Criteria for counting stored events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Only events in this scope.
    pub scope_id: Option<String>,
    /// Only events labelled with this project.
    pub project_id: Option<String>,
    /// Only events of this type.
    pub event_type: Option<EventType>,
}

impl EventFilter {
    /// Matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to a scope.
    #[must_use]
    pub fn with_scope(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = Some(scope_id.into());
        self
    }

    /// Restricts to a project.
    #[must_use]
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Restricts to an event type.
    #[must_use]
    pub fn with_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Returns true if `event` passes the project and type criteria.
    ///
    /// The scope criterion is applied by the data source.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(project_id) = &self.project_id {
            if event.labels.project_id.as_deref() != Some(project_id.as_str()) {
                return false;
            }
        }
        if let Some(event_type) = self.event_type {
            if event.event_type() != event_type {
                return false;
            }
        }
        true
    }
}

/// Durable storage for scopes and their events.
///
/// Events are stored as raw JSON, so a scope whose events no longer decode
/// can still be read back byte for byte for quarantine. Implementations
/// must tolerate concurrent readers and writers at record granularity.
pub trait EventLocalDataSource: Send + Sync {
    /// Inserts or replaces a scope.
    fn insert_or_update_scope(&self, scope: &EventScope) -> StoreResult<()>;

    /// Loads a scope by id.
    fn load_scope(&self, id: &str) -> StoreResult<Option<EventScope>>;

    /// Loads open scopes of a type, oldest first.
    fn load_open_scopes(&self, scope_type: EventScopeType) -> StoreResult<Vec<EventScope>>;

    /// Loads up to `limit` closed scopes of a type, oldest first.
    fn load_closed_scopes(
        &self,
        scope_type: EventScopeType,
        limit: usize,
    ) -> StoreResult<Vec<EventScope>>;

    /// Counts scopes of a type.
    fn count_scopes(&self, scope_type: EventScopeType) -> StoreResult<usize>;

    /// Counts closed scopes of a type.
    fn count_closed_scopes(&self, scope_type: EventScopeType) -> StoreResult<usize>;

    /// Deletes a scope and all of its events.
    fn delete_scope(&self, id: &str) -> StoreResult<()>;

    /// Deletes several scopes and their events.
    fn delete_scopes(&self, ids: &[String]) -> StoreResult<()> {
        for id in ids {
            self.delete_scope(id)?;
        }
        Ok(())
    }

    /// Inserts or replaces an event. The event must carry a scope label.
    fn insert_or_update_event(&self, event: &Event) -> StoreResult<()>;

    /// Loads the raw JSON of every event in a scope.
    fn load_event_jsons_from_scope(&self, scope_id: &str) -> StoreResult<Vec<String>>;

    /// Loads and decodes every event in a scope.
    ///
    /// Fails if any event does not decode.
    fn load_events_from_scope(&self, scope_id: &str) -> StoreResult<Vec<Event>> {
        self.load_event_jsons_from_scope(scope_id)?
            .iter()
            .map(|json| Ok(Event::from_json(json)?))
            .collect()
    }

    /// Deletes events by id.
    fn delete_events(&self, ids: &[String]) -> StoreResult<()>;

    /// Counts events matching a filter. Events that no longer decode are
    /// only counted when the filter has no project or type criterion.
    fn count_events(&self, filter: &EventFilter) -> StoreResult<usize>;

    /// Deletes every scope and event.
    fn delete_all(&self) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_events::{EventPayload, GuidSelectionPayload, Timestamp};

    #[test]
    fn filter_matches_project_and_type() {
        let mut event = Event::with_id(
            "e1",
            EventPayload::GuidSelection(GuidSelectionPayload {
                created_at: Timestamp(1),
                selected_id: "s".into(),
            }),
        );
        event.labels.project_id = Some("p1".into());

        assert!(EventFilter::all().matches(&event));
        assert!(EventFilter::all().with_project("p1").matches(&event));
        assert!(!EventFilter::all().with_project("p2").matches(&event));
        assert!(EventFilter::all()
            .with_type(EventType::GuidSelection)
            .matches(&event));
        assert!(!EventFilter::all().with_type(EventType::Consent).matches(&event));
    }
}
