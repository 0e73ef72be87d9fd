//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Suffix of the temporary file used by [`StorageBackend::replace`].
const REPLACE_SUFFIX: &str = "tmp";

/// A file-based storage backend.
///
/// Data survives process restarts. `replace` writes a sibling temporary file,
/// syncs it and renames it over the original, so a crash leaves either the
/// old or the new content.
///
/// # Example
///
/// ```no_run
/// use fieldsync_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("events.log")).unwrap();
/// backend.append(b"persistent data").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = Self::open_file(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Opens or creates a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(path: &Path) -> StorageResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".");
        name.push(REPLACE_SUFFIX);
        PathBuf::from(name)
    }
}

impl StorageBackend for FileBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.lock();
        let offset = file.seek(SeekFrom::End(0))?;
        if !data.is_empty() {
            file.write_all(data)?;
            file.flush()?;
        }
        Ok(offset)
    }

    fn replace(&self, data: &[u8]) -> StorageResult<()> {
        let mut file = self.file.lock();
        let temp_path = self.temp_path();
        {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(data)?;
            temp.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        *file = Self::open_file(&self.path)?;
        Ok(())
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        let file = self.file.lock();
        let size = file.metadata()?.len();
        if new_size > size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size,
            });
        }
        file.set_len(new_size)?;
        file.sync_all()?;
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.file.lock().metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("events.log")).unwrap();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent data").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"persistent data");
    }

    #[test]
    fn file_replace_is_visible_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");

        let backend = FileBackend::open(&path).unwrap();
        backend.append(b"a long history of records").unwrap();
        backend.replace(b"compacted").unwrap();
        backend.append(b"+tail").unwrap();
        assert_eq!(backend.read_all().unwrap(), b"compacted+tail");
        drop(backend);

        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.read_all().unwrap(), b"compacted+tail");
        assert!(!dir.path().join("events.log.tmp").exists());
    }

    #[test]
    fn file_truncate() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("events.log")).unwrap();
        backend.append(b"hello world").unwrap();

        backend.truncate(5).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"hello");
        assert!(backend.truncate(50).is_err());
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store").join("events.log");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.path(), path);
    }
}
