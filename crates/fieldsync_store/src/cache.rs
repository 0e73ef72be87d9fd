//! Write-through cache of the current session.

use fieldsync_events::{Event, EventScope};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct CachedSession {
    scope: Option<EventScope>,
    events: HashMap<String, Event>,
    /// Insertion order of event ids.
    order: Vec<String>,
}

/// Holds the open session scope and its events.
///
/// The repository writes to the store first and then to the cache, so the
/// cache never holds anything the store does not. It is reset exactly when
/// a session is created or closed.
#[derive(Debug, Default)]
pub struct SessionCache {
    inner: RwLock<CachedSession>,
}

impl SessionCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached scope.
    pub fn current_scope(&self) -> Option<EventScope> {
        self.inner.read().scope.clone()
    }

    /// Replaces the cache contents with a new scope and its events.
    pub fn switch_to(&self, scope: EventScope, events: Vec<Event>) {
        let mut inner = self.inner.write();
        inner.scope = Some(scope);
        inner.events.clear();
        inner.order.clear();
        for event in events {
            inner.order.push(event.id.clone());
            inner.events.insert(event.id.clone(), event);
        }
    }

    /// Inserts or replaces a cached event.
    pub fn put_event(&self, event: Event) {
        let mut inner = self.inner.write();
        if !inner.events.contains_key(&event.id) {
            inner.order.push(event.id.clone());
        }
        inner.events.insert(event.id.clone(), event);
    }

    /// Returns the cached events in insertion order.
    pub fn events(&self) -> Vec<Event> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.events.get(id).cloned())
            .collect()
    }

    /// Drops the cached scope and events.
    pub fn invalidate(&self) {
        let mut inner = self.inner.write();
        inner.scope = None;
        inner.events.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_events::{
        ConsentPayload, ConsentResult, EventPayload, EventScopePayload, EventScopeType, Timestamp,
    };

    fn scope(id: &str) -> EventScope {
        EventScope::new(
            id,
            "p1",
            EventScopeType::Session,
            Timestamp(1),
            EventScopePayload::default(),
        )
    }

    fn consent(id: &str, result: ConsentResult) -> Event {
        Event::with_id(
            id,
            EventPayload::Consent(ConsentPayload {
                created_at: Timestamp(1),
                ended_at: Timestamp(2),
                result,
            }),
        )
    }

    #[test]
    fn switch_replaces_contents() {
        let cache = SessionCache::new();
        cache.switch_to(scope("s1"), vec![consent("e1", ConsentResult::Accepted)]);
        cache.switch_to(scope("s2"), vec![]);
        assert_eq!(cache.current_scope().unwrap().id, "s2");
        assert!(cache.events().is_empty());
    }

    #[test]
    fn put_event_keeps_order_on_update() {
        let cache = SessionCache::new();
        cache.switch_to(scope("s1"), vec![]);
        cache.put_event(consent("e1", ConsentResult::Accepted));
        cache.put_event(consent("e2", ConsentResult::Accepted));
        cache.put_event(consent("e1", ConsentResult::Declined));

        let events = cache.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "e1");
        assert!(matches!(
            &events[0].payload,
            EventPayload::Consent(p) if p.result == ConsentResult::Declined
        ));
    }

    #[test]
    fn invalidate_clears() {
        let cache = SessionCache::new();
        cache.switch_to(scope("s1"), vec![consent("e1", ConsentResult::Accepted)]);
        cache.invalidate();
        assert!(cache.current_scope().is_none());
        assert!(cache.events().is_empty());
    }
}
