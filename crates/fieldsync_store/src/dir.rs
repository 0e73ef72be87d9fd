//! Store directory management.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK          # Advisory lock for single-writer
//! ├─ scopes.log    # Scope records
//! ├─ events.log    # Event records
//! └─ sync.log      # Progress counters and sync operations
//! ```

use crate::error::{StoreError, StoreResult};
use fieldsync_storage::FileBackend;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const SCOPES_FILE: &str = "scopes.log";
const EVENTS_FILE: &str = "events.log";
const SYNC_FILE: &str = "sync.log";

/// An exclusively locked store directory.
///
/// The lock is released when the last handle is dropped. Share it as
/// `Arc<StoreDir>` between the event store and the sync state store.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns `StoreLocked` if another process holds the directory, and
    /// `InvalidDirectory` if the path is missing (and `create_if_missing` is
    /// false) or is not a directory.
    pub fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StoreError::invalid_directory(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(StoreError::invalid_directory(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the scope record file.
    pub fn scopes_backend(&self) -> StoreResult<FileBackend> {
        Ok(FileBackend::open(&self.path.join(SCOPES_FILE))?)
    }

    /// Opens the event record file.
    pub fn events_backend(&self) -> StoreResult<FileBackend> {
        Ok(FileBackend::open(&self.path.join(EVENTS_FILE))?)
    }

    /// Opens the sync state record file.
    pub fn sync_backend(&self) -> StoreResult<FileBackend> {
        Ok(FileBackend::open(&self.path.join(SYNC_FILE))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_directory() {
        let root = tempdir().unwrap();
        let path = root.path().join("store");
        let dir = StoreDir::open(&path, true).unwrap();
        assert!(dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn missing_directory_without_create() {
        let root = tempdir().unwrap();
        let err = StoreDir::open(&root.path().join("nope"), false).unwrap_err();
        assert!(matches!(err, StoreError::InvalidDirectory { .. }));
    }

    #[test]
    fn second_open_is_locked() {
        let root = tempdir().unwrap();
        let _first = StoreDir::open(root.path(), true).unwrap();
        let err = StoreDir::open(root.path(), true).unwrap_err();
        assert!(matches!(err, StoreError::StoreLocked));
    }

    #[test]
    fn lock_released_on_drop() {
        let root = tempdir().unwrap();
        drop(StoreDir::open(root.path(), true).unwrap());
        assert!(StoreDir::open(root.path(), true).is_ok());
    }
}
