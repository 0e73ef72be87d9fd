//! Error types for event encoding.

use thiserror::Error;

/// Result type for event encoding.
pub type EventResult<T> = Result<T, EventError>;

/// Errors that can occur while encoding or decoding events.
#[derive(Debug, Error)]
pub enum EventError {
    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored value does not have the expected shape.
    #[error("invalid structure: {0}")]
    InvalidStructure(String),
}

impl EventError {
    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure(message.into())
    }
}
