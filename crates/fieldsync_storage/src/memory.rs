//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// Suitable for unit tests, integration tests and stores that do not need to
/// survive a restart.
///
/// # Example
///
/// ```rust
/// use fieldsync_storage::{StorageBackend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    ///
    /// Useful for testing recovery of torn or corrupted files.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn append(&self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn replace(&self, new_data: &[u8]) -> StorageResult<()> {
        *self.data.write() = new_data.to_vec();
        Ok(())
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        // Nothing to make durable
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.read_all().unwrap().is_empty());
    }

    #[test]
    fn memory_append_returns_correct_offset() {
        let backend = InMemoryBackend::new();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn memory_replace_discards_previous_content() {
        let backend = InMemoryBackend::with_data(b"old content".to_vec());
        backend.replace(b"new").unwrap();
        assert_eq!(backend.read_all().unwrap(), b"new");
    }

    #[test]
    fn memory_truncate_partial() {
        let backend = InMemoryBackend::new();
        backend.append(b"hello world").unwrap();

        backend.truncate(5).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"hello");
    }

    #[test]
    fn memory_truncate_to_larger_size_fails() {
        let backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        let result = backend.truncate(100);
        assert!(matches!(
            result,
            Err(StorageError::TruncatePastEnd { requested: 100, size: 5 })
        ));
    }
}
