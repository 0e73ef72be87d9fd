//! # FieldSync Store
//!
//! Session-scoped event store for FieldSync.
//!
//! Events are grouped into [`EventScope`](fieldsync_events::EventScope)s.
//! The [`EventRepository`] is the only writer: it keeps at most one session
//! scope open, validates each event against the history of its scope and
//! stamps the scope labels before storing it.
//!
//! ## Layout
//!
//! - [`EventLocalDataSource`] - storage seam, implemented by
//!   [`MemoryEventStore`] and [`FileEventStore`]
//! - [`SessionCache`] - write-through cache of the open session
//! - [`EventValidator`] - per-scope invariants
//! - [`SyncProgressCache`] and the operation repositories - durable sync
//!   state on a [`KeyValueStore`]
//!
//! ## Example
//!
//! ```rust
//! use fieldsync_store::{
//!     EventRepository, MemoryEventStore, StaticLogin, StoreConfig, SystemClock,
//! };
//! use std::sync::Arc;
//!
//! let repo = EventRepository::new(
//!     StoreConfig::new("device-1"),
//!     Arc::new(MemoryEventStore::in_memory().unwrap()),
//!     Arc::new(StaticLogin::signed_in("project-1", "user-1")),
//!     Arc::new(SystemClock),
//! );
//! let session = repo.create_session().unwrap();
//! assert!(!session.closed);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod dir;
mod error;
mod kv;
mod login;
mod map;
mod operations;
mod progress;
mod record_store;
mod repository;
mod source;
mod time;
mod validator;

pub use cache::SessionCache;
pub use config::StoreConfig;
pub use dir::StoreDir;
pub use error::{StoreError, StoreResult};
pub use kv::{KeyValueStore, RecordKeyValueStore};
pub use login::{LoginInfo, StaticLogin};
pub use map::RecordMap;
pub use operations::{
    decode_up_sync_operation, encode_up_sync_operation, DownSyncOperationRepository,
    DownSyncScope, Partitioning, UpSyncOperationRepository,
};
pub use progress::SyncProgressCache;
pub use record_store::{FileEventStore, MemoryEventStore, RecordEventStore};
pub use repository::EventRepository;
pub use source::{EventFilter, EventLocalDataSource};
pub use time::{ManualClock, SystemClock, TimeHelper};
pub use validator::{default_validators, EnrolmentValidator, EventValidator, GuidSelectionValidator};
