//! # FieldSync Testkit
//!
//! Test utilities for FieldSync.
//!
//! This crate provides:
//! - Event stores on memory or a temporary directory, with a manual clock
//! - Builders for common session events and remote records
//! - A stateful fake backend that turns uploaded enrolments into
//!   downloadable records
//! - A sync harness wiring the engine onto the fake backend
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fieldsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn uploads_a_session() {
//!     let harness = SyncHarness::new();
//!     harness.store.closed_session(vec![consent_event(10)]);
//!     harness.run_sync().await;
//!     assert_eq!(harness.backend.uploaded_scope_ids().len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use backend::*;
pub use fixtures::*;
pub use generators::*;
