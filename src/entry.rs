//! Store entry handles
//!
//! An entry is an immutable reference to a resolved, committed file under a
//! store root. It snapshots existence at resolution time and does not own
//! the underlying file's lifetime; files may be removed externally.

use std::path::{Path, PathBuf};

/// Resolved reference to a file under the store root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreEntry {
    key: String,
    path: PathBuf,
    exists: bool,
}

impl StoreEntry {
    pub(crate) fn new(key: String, path: PathBuf) -> Self {
        let exists = path.exists();
        Self { key, path, exists }
    }

    /// Root-relative path key, `/`-separated.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Absolute location of the file under the store root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file existed when this entry was resolved.
    pub fn exists(&self) -> bool {
        self.exists
    }
}
