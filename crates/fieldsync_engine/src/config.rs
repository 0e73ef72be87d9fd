//! Configuration for the sync engine.

use fieldsync_events::EventScopeType;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Capacity of the channel between the download parser and the consumer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 2000;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the events API.
    pub base_url: String,
    /// Closed session scopes uploaded per request.
    pub session_batch_size: usize,
    /// Closed down-sync tracking scopes uploaded per request.
    pub down_sync_scope_batch_size: usize,
    /// Closed up-sync tracking scopes uploaded per request.
    pub up_sync_scope_batch_size: usize,
    /// Downloaded records applied per local transaction.
    pub down_sync_batch_size: usize,
    /// Capacity of the download channel.
    pub channel_capacity: usize,
    /// Retry policy of sync stages.
    pub backoff: BackoffPolicy,
    /// Which error statuses are cloud integration failures.
    pub integration_issue: IntegrationIssuePredicate,
    /// Request timeout.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a configuration for a backend.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            session_batch_size: 1,
            down_sync_scope_batch_size: 1,
            up_sync_scope_batch_size: 1,
            down_sync_batch_size: 200,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backoff: BackoffPolicy::default(),
            integration_issue: IntegrationIssuePredicate::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the upload batch size of a scope type.
    pub fn with_scope_batch_size(mut self, scope_type: EventScopeType, size: usize) -> Self {
        let size = size.max(1);
        match scope_type {
            EventScopeType::Session => self.session_batch_size = size,
            EventScopeType::DownSync => self.down_sync_scope_batch_size = size,
            EventScopeType::UpSync => self.up_sync_scope_batch_size = size,
        }
        self
    }

    /// Sets the number of downloaded records applied at once.
    pub fn with_down_sync_batch_size(mut self, size: usize) -> Self {
        self.down_sync_batch_size = size.max(1);
        self
    }

    /// Sets the download channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Sets the stage retry policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the cloud integration predicate.
    pub fn with_integration_issue(mut self, predicate: IntegrationIssuePredicate) -> Self {
        self.integration_issue = predicate;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the upload batch size of a scope type.
    pub fn batch_size(&self, scope_type: EventScopeType) -> usize {
        match scope_type {
            EventScopeType::Session => self.session_batch_size,
            EventScopeType::DownSync => self.down_sync_scope_batch_size,
            EventScopeType::UpSync => self.up_sync_scope_batch_size,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Linear retry policy: attempt `n` waits `n * delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay unit.
    pub delay: Duration,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Creates a linear policy.
    pub fn linear(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Creates a policy with a single attempt.
    pub fn no_retry() -> Self {
        Self::linear(Duration::ZERO, 1)
    }

    /// Returns the wait after a failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::linear(Duration::from_secs(5), 5)
    }
}

/// Decides which HTTP statuses mean the backend rejected the request for
/// good, as opposed to a transient failure.
#[derive(Clone)]
pub struct IntegrationIssuePredicate(Arc<dyn Fn(u16) -> bool + Send + Sync>);

impl IntegrationIssuePredicate {
    /// Creates a predicate from a function.
    pub fn new(f: impl Fn(u16) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Treats no status as an integration issue.
    pub fn never() -> Self {
        Self::new(|_| false)
    }

    /// Returns true if `status` is an integration issue.
    pub fn is_integration_issue(&self, status: u16) -> bool {
        (self.0)(status)
    }
}

impl Default for IntegrationIssuePredicate {
    /// Client errors other than 401, 403 and 429.
    fn default() -> Self {
        Self::new(|status| (400..500).contains(&status) && !matches!(status, 401 | 403 | 429))
    }
}

impl fmt::Debug for IntegrationIssuePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IntegrationIssuePredicate")
    }
}
