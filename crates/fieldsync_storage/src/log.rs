//! Append-only record log on top of a [`StorageBackend`].

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use crate::record::{decode_frames, encode_frame};

/// An append-only log of framed records.
///
/// Opening a log replays every valid record and truncates a torn tail so the
/// next append starts on a frame boundary. Writers that keep their own
/// in-memory index (the event store does) call [`RecordLog::rewrite`] from
/// time to time to drop superseded records.
#[derive(Debug)]
pub struct RecordLog<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> RecordLog<B> {
    /// Opens a log and returns it together with the replayed records.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read, or if a record in
    /// the middle of the log is corrupted.
    pub fn open(backend: B) -> StorageResult<(Self, Vec<Vec<u8>>)> {
        let data = backend.read_all()?;
        let scan = decode_frames(&data)?;
        if scan.torn_tail {
            backend.truncate(scan.valid_len)?;
            backend.sync()?;
        }
        Ok((Self { backend }, scan.payloads))
    }

    /// Appends one record.
    pub fn append(&self, payload: &[u8]) -> StorageResult<()> {
        let frame = encode_frame(payload)?;
        self.backend.append(&frame)?;
        Ok(())
    }

    /// Appends several records with a single write.
    pub fn append_batch<'a, I>(&self, payloads: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut buffer = Vec::new();
        for payload in payloads {
            buffer.extend_from_slice(&encode_frame(payload)?);
        }
        if !buffer.is_empty() {
            self.backend.append(&buffer)?;
        }
        Ok(())
    }

    /// Reads every record currently in the log.
    pub fn read_all(&self) -> StorageResult<Vec<Vec<u8>>> {
        let data = self.backend.read_all()?;
        Ok(decode_frames(&data)?.payloads)
    }

    /// Atomically replaces the log with the given records.
    pub fn rewrite<'a, I>(&self, payloads: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut buffer = Vec::new();
        for payload in payloads {
            buffer.extend_from_slice(&encode_frame(payload)?);
        }
        self.backend.replace(&buffer)
    }

    /// Syncs the log to durable storage.
    pub fn sync(&self) -> StorageResult<()> {
        self.backend.sync()
    }

    /// Returns the size of the log in bytes.
    pub fn size(&self) -> StorageResult<u64> {
        self.backend.size()
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use crate::record::encode_frame;

    #[test]
    fn open_replays_records() {
        let mut data = encode_frame(b"one").unwrap();
        data.extend_from_slice(&encode_frame(b"two").unwrap());

        let (_log, records) = RecordLog::open(InMemoryBackend::with_data(data)).unwrap();
        assert_eq!(records, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn open_truncates_torn_tail() {
        let mut data = encode_frame(b"one").unwrap();
        let valid = data.len() as u64;
        data.extend_from_slice(&[9, 9]);

        let (log, records) = RecordLog::open(InMemoryBackend::with_data(data)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(log.size().unwrap(), valid);

        log.append(b"two").unwrap();
        assert_eq!(log.read_all().unwrap(), vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn rewrite_compacts() {
        let (log, _) = RecordLog::open(InMemoryBackend::new()).unwrap();
        log.append_batch([b"a".as_slice(), b"b".as_slice(), b"c".as_slice()])
            .unwrap();

        log.rewrite([b"c".as_slice()]).unwrap();
        assert_eq!(log.read_all().unwrap(), vec![b"c".to_vec()]);
    }
}
