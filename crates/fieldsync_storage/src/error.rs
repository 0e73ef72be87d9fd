//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame failed its checksum somewhere other than the tail.
    #[error("record corrupted at offset {offset}: {reason}")]
    Corrupted {
        /// Offset of the damaged frame.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A payload exceeds the frame size limit.
    #[error("record of {len} bytes exceeds the {max} byte limit")]
    RecordTooLarge {
        /// Payload length.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// Attempted to truncate beyond the end of storage.
    #[error("cannot truncate to {requested} bytes, storage holds {size}")]
    TruncatePastEnd {
        /// The requested size.
        requested: u64,
        /// The current storage size.
        size: u64,
    },
}
