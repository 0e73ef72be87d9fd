//! # FieldSync Storage
//!
//! Durable record files for the FieldSync event store.
//!
//! This crate is the lowest layer of the store. It knows nothing about
//! events or scopes: it persists opaque payloads as checksummed frames in an
//! append-only file and replays them on open.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, replace, sync)
//! - Records are framed as `[len u32 LE][crc32 u32 LE][payload]`
//! - A torn tail (crash mid-append) is truncated on open, never reported as data
//! - Must be `Send + Sync`; stores share one log across sync tasks
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral stores
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use fieldsync_storage::{InMemoryBackend, RecordLog};
//!
//! let (log, records) = RecordLog::open(InMemoryBackend::new()).unwrap();
//! assert!(records.is_empty());
//! log.append(b"{\"id\":\"e1\"}").unwrap();
//! assert_eq!(log.read_all().unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod log;
mod memory;
mod record;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use log::RecordLog;
pub use memory::InMemoryBackend;
pub use record::{compute_crc32, decode_frames, encode_frame, FrameScan, FRAME_HEADER_SIZE, MAX_RECORD_SIZE};
