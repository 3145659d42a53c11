//! Error types for the file store
//!
//! Faults at the add/move boundary fall into two categories so callers can
//! tell their own failure apart from the store's: a failed population
//! callback surfaces as [`FileStoreError::AddActionFailed`], everything else
//! (directory creation, marker I/O, underlying file I/O) as store failures.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    /// The caller-supplied population callback failed. The destination file
    /// has already been cleaned up when this is returned.
    #[error("failed to add into file store '{}' at '{key}'", .store.display())]
    AddActionFailed {
        store: PathBuf,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Infrastructure fault during add/move: directory creation, marker I/O,
    /// or file I/O under the store root.
    #[error("file store '{}' failed at '{key}'", .store.display())]
    Store {
        store: PathBuf,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Move precondition: the source file must exist. Raised before the
    /// write marker is touched.
    #[error("cannot move '{}' into file store at '{key}' as it does not exist", .source_path.display())]
    MissingSource { source_path: PathBuf, key: String },

    /// The key does not fit the marker's fixed slot. Fatal usage error,
    /// raised before any directory or marker mutation.
    #[error("path key of {len} bytes exceeds the write marker slot: '{key}'")]
    KeyTooLong { key: String, len: usize },

    /// Empty, absolute, root-escaping, or reserved key. Raised before any
    /// mutation.
    #[error("invalid path key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// The search pattern failed to compile.
    #[error("invalid search pattern")]
    Pattern(#[from] globset::Error),

    /// I/O failure while creating or mapping the write marker slot.
    #[error("write marker I/O failure")]
    Marker(#[from] std::io::Error),
}

impl FileStoreError {
    /// True when the fault originated in the caller's population callback.
    pub fn is_add_action_failure(&self) -> bool {
        matches!(self, FileStoreError::AddActionFailed { .. })
    }

    /// True for faults on the store's side of the add/move boundary,
    /// including the move-source precondition.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            FileStoreError::Store { .. } | FileStoreError::MissingSource { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FileStoreError>;
