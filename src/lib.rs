//! Filestore: Crash-Safe Path-Keyed Artifact Storage
//!
//! Durable local storage for build artifacts keyed by caller-chosen relative
//! paths. A memory-mapped write-intent marker records the one file currently
//! being written so that abrupt process termination never leaves a
//! silently-corrupt entry, and ant-style include patterns search the stored
//! entries.

pub mod entry;
pub mod error;
pub mod marker;
pub mod store;

mod search;

pub use entry::StoreEntry;
pub use error::{FileStoreError, Result};
pub use store::{FileStore, PathKeyFileStore};
