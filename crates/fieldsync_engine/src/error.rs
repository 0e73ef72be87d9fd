//! Error types for the sync engine.

use fieldsync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Errors fall into four groups, see [`SyncError::is_fatal`],
/// [`SyncError::is_retryable`] and [`SyncError::is_degraded`]. Anything
/// else (store failures, cancellation) is left to the caller.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Nobody is signed in on the device.
    #[error("not signed in")]
    NotSignedIn,

    /// An operation was built for another project than the signed-in one.
    #[error("operation is for project {actual} but device is signed in to {expected}")]
    ProjectMismatch {
        /// Signed-in project.
        expected: String,
        /// Project of the operation.
        actual: String,
    },

    /// The device failed the root check.
    #[error("device is rooted")]
    RootedDevice,

    /// A stored sync operation could not be decoded.
    #[error("malformed sync operation: {0}")]
    MalformedOperation(String),

    /// The backend refused the credentials (HTTP 401/403).
    #[error("unauthorized (HTTP {status})")]
    Unauthorized {
        /// HTTP status.
        status: u16,
    },

    /// The request never reached the backend.
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with an error status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The backend is rate limiting the device (HTTP 429).
    #[error("too many requests")]
    TooManyRequests,

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The backend announced a maintenance window.
    #[error("backend under maintenance (estimated outage: {estimated_outage_secs:?}s)")]
    BackendMaintenance {
        /// Announced outage length in seconds.
        estimated_outage_secs: Option<u64>,
    },

    /// The backend rejected the request in a way retrying cannot fix.
    #[error("cloud integration error (HTTP {status})")]
    CloudIntegration {
        /// HTTP status.
        status: u16,
    },

    /// Local store error.
    #[error("store error: {0}")]
    Store(StoreError),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The downloaded body is not a well-formed JSON array.
    #[error("malformed event stream: {0}")]
    StreamStructure(String),

    /// The job scheduler could not accept work.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// The work was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MalformedOperation { message } => SyncError::MalformedOperation(message),
            other => SyncError::Store(other),
        }
    }
}

impl SyncError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        SyncError::Network(message.into())
    }

    /// Creates an HTTP status error.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        SyncError::Http {
            status,
            body: body.into(),
        }
    }

    /// Creates a stream structure error.
    pub fn stream_structure(message: impl Into<String>) -> Self {
        SyncError::StreamStructure(message.into())
    }

    /// Returns true if retrying cannot help until the user or the backend
    /// changes something.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::NotSignedIn
                | SyncError::ProjectMismatch { .. }
                | SyncError::RootedDevice
                | SyncError::MalformedOperation(_)
                | SyncError::Unauthorized { .. }
        )
    }

    /// Returns true if the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::TooManyRequests | SyncError::Timeout => true,
            SyncError::Http { status, .. } => *status >= 500,
            SyncError::StreamStructure(_) => true,
            _ => false,
        }
    }

    /// Returns true if the backend is known to be down for a while.
    pub fn is_degraded(&self) -> bool {
        matches!(self, SyncError::BackendMaintenance { .. })
    }

    /// Returns true if the error came from talking to the backend, as
    /// opposed to a local or authentication failure.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_)
                | SyncError::Http { .. }
                | SyncError::TooManyRequests
                | SyncError::Timeout
                | SyncError::BackendMaintenance { .. }
                | SyncError::CloudIntegration { .. }
        )
    }

    /// Returns the HTTP status behind the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Unauthorized { status }
            | SyncError::Http { status, .. }
            | SyncError::CloudIntegration { status } => Some(*status),
            SyncError::TooManyRequests => Some(429),
            SyncError::BackendMaintenance { .. } => Some(503),
            _ => None,
        }
    }

    /// Returns a short name of the error kind, recorded in audit events.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::NotSignedIn => "NOT_SIGNED_IN",
            SyncError::ProjectMismatch { .. } => "PROJECT_MISMATCH",
            SyncError::RootedDevice => "ROOTED_DEVICE",
            SyncError::MalformedOperation(_) => "MALFORMED_OPERATION",
            SyncError::Unauthorized { .. } => "UNAUTHORIZED",
            SyncError::Network(_) => "NETWORK",
            SyncError::Http { .. } => "HTTP",
            SyncError::TooManyRequests => "TOO_MANY_REQUESTS",
            SyncError::Timeout => "TIMEOUT",
            SyncError::BackendMaintenance { .. } => "BACKEND_MAINTENANCE",
            SyncError::CloudIntegration { .. } => "CLOUD_INTEGRATION",
            SyncError::Store(_) => "STORE",
            SyncError::Json(_) => "JSON",
            SyncError::StreamStructure(_) => "STREAM_STRUCTURE",
            SyncError::Scheduler(_) => "SCHEDULER",
            SyncError::Cancelled => "CANCELLED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SyncError::NotSignedIn.is_fatal());
        assert!(SyncError::Unauthorized { status: 401 }.is_fatal());
        assert!(SyncError::RootedDevice.is_fatal());

        assert!(SyncError::network("connection reset").is_retryable());
        assert!(SyncError::http(502, "bad gateway").is_retryable());
        assert!(!SyncError::http(418, "teapot").is_retryable());
        assert!(SyncError::TooManyRequests.is_retryable());
        assert!(SyncError::Timeout.is_retryable());

        let maintenance = SyncError::BackendMaintenance {
            estimated_outage_secs: Some(600),
        };
        assert!(maintenance.is_degraded());
        assert!(!maintenance.is_retryable());
        assert!(!maintenance.is_fatal());

        assert!(!SyncError::CloudIntegration { status: 400 }.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn remote_errors() {
        assert!(SyncError::network("down").is_remote());
        assert!(SyncError::CloudIntegration { status: 422 }.is_remote());
        assert!(!SyncError::Unauthorized { status: 401 }.is_remote());
        assert!(!SyncError::NotSignedIn.is_remote());
    }

    #[test]
    fn malformed_store_operation_is_fatal() {
        let err: SyncError = StoreError::malformed_operation("unknown shape").into();
        assert!(matches!(err, SyncError::MalformedOperation(_)));
        assert!(err.is_fatal());

        let err: SyncError = StoreError::scope_not_found("s1").into();
        assert!(matches!(err, SyncError::Store(_)));
    }

    #[test]
    fn status_and_kind() {
        assert_eq!(SyncError::TooManyRequests.status(), Some(429));
        assert_eq!(SyncError::http(500, "").status(), Some(500));
        assert_eq!(SyncError::Timeout.status(), None);
        assert_eq!(SyncError::network("x").kind(), "NETWORK");
    }

    #[test]
    fn error_display() {
        let err = SyncError::ProjectMismatch {
            expected: "p1".into(),
            actual: "p2".into(),
        };
        assert!(err.to_string().contains("p1"));
        assert!(err.to_string().contains("p2"));
        assert_eq!(SyncError::Cancelled.to_string(), "sync cancelled");
    }
}
