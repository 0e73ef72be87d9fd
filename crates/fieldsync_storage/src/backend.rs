//! Storage backend trait definition.

use crate::error::StorageResult;

/// A byte store holding one record file.
///
/// Backends are **opaque byte stores**: the framing in [`crate::RecordLog`]
/// owns all interpretation. Methods take `&self` and lock internally, so a
/// single backend can be shared by concurrent readers and writers.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_all` returns every byte previously appended, in order
/// - `replace` is atomic: readers observe either the old or the new content
/// - after `sync` returns, all appended data survives process termination
pub trait StorageBackend: Send + Sync {
    /// Returns the whole content of the store.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns its offset.
    fn append(&self, data: &[u8]) -> StorageResult<u64>;

    /// Atomically replaces the whole content of the store.
    ///
    /// Used to compact a log down to its live records.
    fn replace(&self, data: &[u8]) -> StorageResult<()>;

    /// Truncates the store to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncatePastEnd`] if `new_size` is
    /// greater than the current size.
    fn truncate(&self, new_size: u64) -> StorageResult<()>;

    /// Syncs data and metadata to durable storage.
    fn sync(&self) -> StorageResult<()>;

    /// Returns the current size in bytes.
    fn size(&self) -> StorageResult<u64>;
}
