//! The event repository.

use crate::cache::SessionCache;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::login::LoginInfo;
use crate::source::{EventFilter, EventLocalDataSource};
use crate::time::TimeHelper;
use crate::validator::{default_validators, EventValidator};
use fieldsync_events::{
    ArtificialTerminationPayload, ArtificialTerminationReason, DatabaseInfo, Device, Event,
    EventPayload, EventScope, EventScopeEndCause, EventScopePayload, EventScopeType,
    PROJECT_ID_FOR_NOT_SIGNED_IN,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Entry point for recording events.
///
/// Every write goes through here so that events are validated and labelled
/// and so that at most one session scope is open at a time.
pub struct EventRepository {
    config: StoreConfig,
    source: Arc<dyn EventLocalDataSource>,
    login: Arc<dyn LoginInfo>,
    clock: Arc<dyn TimeHelper>,
    validators: Vec<Box<dyn EventValidator>>,
    cache: SessionCache,
    /// Serializes writers so a session switch is never interleaved with
    /// an append.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for EventRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRepository")
            .field("config", &self.config)
            .field("validators", &self.validators.len())
            .finish()
    }
}

fn end_cause_for(reason: Option<ArtificialTerminationReason>) -> EventScopeEndCause {
    match reason {
        Some(ArtificialTerminationReason::NewSession) => EventScopeEndCause::NewSession,
        Some(ArtificialTerminationReason::TimedOut) | None => EventScopeEndCause::WorkflowEnded,
    }
}

impl EventRepository {
    /// Creates a repository with the default validators.
    pub fn new(
        config: StoreConfig,
        source: Arc<dyn EventLocalDataSource>,
        login: Arc<dyn LoginInfo>,
        clock: Arc<dyn TimeHelper>,
    ) -> Self {
        Self {
            config,
            source,
            login,
            clock,
            validators: default_validators(),
            cache: SessionCache::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Replaces the registered validators.
    #[must_use]
    pub fn with_validators(mut self, validators: Vec<Box<dyn EventValidator>>) -> Self {
        self.validators = validators;
        self
    }

    /// Returns the underlying data source.
    pub fn source(&self) -> &Arc<dyn EventLocalDataSource> {
        &self.source
    }

    /// Returns the repository clock.
    pub fn clock(&self) -> &Arc<dyn TimeHelper> {
        &self.clock
    }

    /// Returns the signed-in project, or the placeholder used when signed out.
    pub fn current_project(&self) -> String {
        self.login
            .signed_in_project_id()
            .unwrap_or_else(|| PROJECT_ID_FOR_NOT_SIGNED_IN.to_string())
    }

    fn scope_payload(&self, session_count: u32) -> EventScopePayload {
        EventScopePayload {
            end_cause: None,
            modalities: self.config.modalities.clone(),
            device: Device {
                device_id: self.config.device_id.clone(),
                android_sdk_version: self.config.os_version.clone(),
                device_model: self.config.device_model.clone(),
            },
            database_info: DatabaseInfo { session_count },
            language: self.config.language.clone(),
            app_version: self.config.app_version.clone(),
        }
    }

    fn stamp(&self, event: &mut Event, scope: &EventScope) {
        event.labels.scope_id = Some(scope.id.clone());
        event.labels.project_id = Some(scope.project_id.clone());
        event.labels.device_id = Some(self.config.device_id.clone());
    }

    fn termination_event(&self, reason: ArtificialTerminationReason) -> Event {
        Event::new(EventPayload::ArtificialTermination(
            ArtificialTerminationPayload {
                created_at: self.clock.now(),
                reason,
            },
        ))
    }

    /// Closes `scope`, optionally appending a termination event first.
    fn close_scope_locked(
        &self,
        mut scope: EventScope,
        reason: Option<ArtificialTerminationReason>,
    ) -> StoreResult<()> {
        if let Some(reason) = reason {
            let mut event = self.termination_event(reason);
            self.stamp(&mut event, &scope);
            self.source.insert_or_update_event(&event)?;
        }
        scope.close(self.clock.now(), Some(end_cause_for(reason)));
        self.source.insert_or_update_scope(&scope)?;
        debug!(scope_id = %scope.id, scope_type = %scope.scope_type, "scope closed");
        Ok(())
    }

    fn close_open_sessions_locked(
        &self,
        reason: Option<ArtificialTerminationReason>,
    ) -> StoreResult<usize> {
        let open = self.source.load_open_scopes(EventScopeType::Session)?;
        let count = open.len();
        for scope in open {
            self.close_scope_locked(scope, reason)?;
        }
        self.cache.invalidate();
        Ok(count)
    }

    fn create_session_locked(&self) -> StoreResult<EventScope> {
        let closed = self.close_open_sessions_locked(Some(ArtificialTerminationReason::NewSession))?;
        let session_count =
            u32::try_from(self.source.count_scopes(EventScopeType::Session)?).unwrap_or(u32::MAX);
        let scope = EventScope::new(
            Uuid::new_v4().to_string(),
            self.current_project(),
            EventScopeType::Session,
            self.clock.now(),
            self.scope_payload(session_count),
        );
        self.source.insert_or_update_scope(&scope)?;
        self.cache.switch_to(scope.clone(), Vec::new());
        info!(scope_id = %scope.id, closed_previous = closed, session_count, "session created");
        Ok(scope)
    }

    /// Resolves the open session: cache first, then store, else a new one.
    fn current_session_locked(&self) -> StoreResult<EventScope> {
        if let Some(scope) = self.cache.current_scope() {
            return Ok(scope);
        }
        let mut open = self.source.load_open_scopes(EventScopeType::Session)?;
        match open.pop() {
            Some(scope) if open.is_empty() => {
                let events = self.source.load_events_from_scope(&scope.id)?;
                self.cache.switch_to(scope.clone(), events);
                Ok(scope)
            }
            _ => self.create_session_locked(),
        }
    }

    /// Starts a new session, closing any session left open.
    ///
    /// Each closed session receives one termination event with reason
    /// `NewSession`.
    pub fn create_session(&self) -> StoreResult<EventScope> {
        let _guard = self.write_lock.lock();
        self.create_session_locked()
    }

    /// Returns the open session, creating one if needed.
    pub fn current_session(&self) -> StoreResult<EventScope> {
        let _guard = self.write_lock.lock();
        self.current_session_locked()
    }

    /// Validates, labels and stores an event in the current session.
    ///
    /// Returns the event as stored.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Validation` if a validator rejects the event;
    /// nothing is written in that case.
    pub fn add_or_update_event(&self, mut event: Event) -> StoreResult<Event> {
        let _guard = self.write_lock.lock();
        let scope = self.current_session_locked()?;
        let history = self.cache.events();
        for validator in &self.validators {
            validator.validate(&history, &event)?;
        }
        self.stamp(&mut event, &scope);
        self.source.insert_or_update_event(&event)?;
        self.cache.put_event(event.clone());
        debug!(event_id = %event.id, event_type = ?event.event_type(), scope_id = %scope.id, "event saved");
        Ok(event)
    }

    /// Labels and stores an event in a given scope, without validation.
    pub fn add_or_update_event_in_scope(
        &self,
        scope: &EventScope,
        mut event: Event,
    ) -> StoreResult<Event> {
        let _guard = self.write_lock.lock();
        self.stamp(&mut event, scope);
        self.source.insert_or_update_event(&event)?;
        if self.cache.current_scope().map(|s| s.id) == Some(scope.id.clone()) {
            self.cache.put_event(event.clone());
        }
        Ok(event)
    }

    /// Closes the open session, if any.
    ///
    /// Calling this with no open session does nothing.
    pub fn close_current_session(
        &self,
        reason: Option<ArtificialTerminationReason>,
    ) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        self.close_open_sessions_locked(reason)?;
        Ok(())
    }

    /// Creates an open tracking scope for a sync run.
    pub fn create_event_scope(
        &self,
        scope_type: EventScopeType,
        id: Option<String>,
    ) -> StoreResult<EventScope> {
        let _guard = self.write_lock.lock();
        if scope_type == EventScopeType::Session {
            return self.create_session_locked();
        }
        let session_count =
            u32::try_from(self.source.count_scopes(EventScopeType::Session)?).unwrap_or(u32::MAX);
        let scope = EventScope::new(
            id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            self.current_project(),
            scope_type,
            self.clock.now(),
            self.scope_payload(session_count),
        );
        self.source.insert_or_update_scope(&scope)?;
        debug!(scope_id = %scope.id, scope_type = %scope_type, "tracking scope created");
        Ok(scope)
    }

    /// Closes a scope by id. Closing a closed scope does nothing.
    pub fn close_event_scope(
        &self,
        scope_id: &str,
        reason: Option<ArtificialTerminationReason>,
    ) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let scope = self
            .source
            .load_scope(scope_id)?
            .ok_or_else(|| StoreError::scope_not_found(scope_id))?;
        if scope.closed {
            return Ok(());
        }
        self.close_scope_locked(scope, reason)?;
        if self.cache.current_scope().map(|s| s.id).as_deref() == Some(scope_id) {
            self.cache.invalidate();
        }
        Ok(())
    }

    /// Loads a scope.
    pub fn get_event_scope(&self, scope_id: &str) -> StoreResult<Option<EventScope>> {
        self.source.load_scope(scope_id)
    }

    /// Loads the decoded events of a scope.
    pub fn get_events_from_scope(&self, scope_id: &str) -> StoreResult<Vec<Event>> {
        self.source.load_events_from_scope(scope_id)
    }

    /// Loads the raw event JSON of a scope.
    pub fn get_events_json_from_scope(&self, scope_id: &str) -> StoreResult<Vec<String>> {
        self.source.load_event_jsons_from_scope(scope_id)
    }

    /// Loads up to `limit` closed scopes of a type, oldest first.
    pub fn get_closed_event_scopes(
        &self,
        scope_type: EventScopeType,
        limit: usize,
    ) -> StoreResult<Vec<EventScope>> {
        self.source.load_closed_scopes(scope_type, limit)
    }

    /// Counts closed scopes of a type.
    pub fn get_closed_event_scope_count(&self, scope_type: EventScopeType) -> StoreResult<usize> {
        self.source.count_closed_scopes(scope_type)
    }

    /// Deletes a scope and its events.
    pub fn delete_event_scope(&self, scope_id: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        self.source.delete_scope(scope_id)?;
        if self.cache.current_scope().map(|s| s.id).as_deref() == Some(scope_id) {
            self.cache.invalidate();
        }
        Ok(())
    }

    /// Deletes several scopes and their events.
    pub fn delete_event_scopes(&self, scope_ids: &[String]) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        self.source.delete_scopes(scope_ids)?;
        if let Some(current) = self.cache.current_scope() {
            if scope_ids.contains(&current.id) {
                self.cache.invalidate();
            }
        }
        Ok(())
    }

    /// Counts stored events.
    pub fn local_count(&self, filter: &EventFilter) -> StoreResult<usize> {
        self.source.count_events(filter)
    }

    /// Deletes everything.
    pub fn delete_all(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        self.source.delete_all()?;
        self.cache.invalidate();
        Ok(())
    }
}
