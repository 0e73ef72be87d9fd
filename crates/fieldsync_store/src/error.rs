//! Error types for the event store.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the event store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] fieldsync_storage::StorageError),

    /// Event (de)serialization error.
    #[error("event error: {0}")]
    Event(#[from] fieldsync_events::EventError),

    /// JSON error outside of event decoding.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An event violates a scope invariant.
    #[error("validation failed ({validator}): {reason}")]
    Validation {
        /// Name of the validator that rejected the event.
        validator: &'static str,
        /// Why the event was rejected.
        reason: String,
    },

    /// A scope does not exist.
    #[error("scope not found: {id}")]
    ScopeNotFound {
        /// Scope id.
        id: String,
    },

    /// An event was written without a scope label.
    #[error("event {id} has no scope")]
    MissingScope {
        /// Event id.
        id: String,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The store directory is unusable.
    #[error("invalid store directory: {message}")]
    InvalidDirectory {
        /// Description of the problem.
        message: String,
    },

    /// A stored sync operation has a shape that cannot be migrated.
    #[error("malformed sync operation: {message}")]
    MalformedOperation {
        /// Description of the problem.
        message: String,
    },
}

impl StoreError {
    /// Creates a validation error.
    pub fn validation(validator: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            validator,
            reason: reason.into(),
        }
    }

    /// Creates a scope not found error.
    pub fn scope_not_found(id: impl Into<String>) -> Self {
        Self::ScopeNotFound { id: id.into() }
    }

    /// Creates an invalid directory error.
    pub fn invalid_directory(message: impl Into<String>) -> Self {
        Self::InvalidDirectory {
            message: message.into(),
        }
    }

    /// Creates a malformed operation error.
    pub fn malformed_operation(message: impl Into<String>) -> Self {
        Self::MalformedOperation {
            message: message.into(),
        }
    }

    /// Returns true if the error is a validator rejection.
    ///
    /// Validation errors are never worth retrying.
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation { .. })
    }

    /// Returns true if stored data no longer decodes.
    pub fn is_corrupted_data(&self) -> bool {
        matches!(self, StoreError::Event(_) | StoreError::Json(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = StoreError::validation("GuidSelectionValidator", "second selection");
        assert_eq!(
            err.to_string(),
            "validation failed (GuidSelectionValidator): second selection"
        );
        assert!(err.is_validation());
        assert!(!StoreError::StoreLocked.is_validation());
    }

    #[test]
    fn from_storage() {
        let err: StoreError = fieldsync_storage::StorageError::Corrupted {
            offset: 8,
            reason: "bad crc".into(),
        }
        .into();
        assert!(matches!(err, StoreError::Storage(_)));
    }
}
