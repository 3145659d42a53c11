//! Path-keyed file store
//!
//! Maps caller-chosen relative path keys to at most one file each under a
//! root directory. Writes run through the write-intent marker so that a
//! process dying mid-write never leaves a silently-corrupt entry: the next
//! read finds the marker non-empty and discards whatever the interrupted
//! write left behind.
//!
//! The store performs no internal locking. Mutating calls (`add`, `mv`) must
//! be externally serialized to at most one in flight at a time; for a single
//! handle the `&mut self` receivers enforce this.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::entry::StoreEntry;
use crate::error::{FileStoreError, Result};
use crate::marker::{WriteMarker, MARKER_FILE_NAME, MAX_KEY_BYTES};
use crate::search::{self, IncludePattern};

/// Storage contract for a path-keyed store.
///
/// There is always at most one entry per key; an existing entry at a key is
/// overwritten. Keys may contain directory components, created on demand.
pub trait FileStore {
    /// Stores an entry at `key` by handing the destination path to
    /// `populate`, which must synchronously create its content.
    fn add<F>(&mut self, key: &str, populate: F) -> Result<StoreEntry>
    where
        F: FnOnce(&Path) -> anyhow::Result<()>;

    /// Relocates `source` into the store at `key`. Fails without touching
    /// the write marker if `source` does not exist.
    fn mv(&mut self, key: &str, source: &Path) -> Result<StoreEntry>;

    /// Looks up the entry at `key`. Absent is `Ok(None)`, never an error.
    fn get(&mut self, key: &str) -> Result<Option<StoreEntry>>;

    /// All committed entries whose keys match an ant-style include pattern.
    /// A nonexistent root yields an empty set.
    fn search(&mut self, pattern: &str) -> Result<HashSet<StoreEntry>>;
}

/// File store keyed by relative paths, self-repairing after crashes.
///
/// Partially written files from a previous fatal termination are detected
/// via the marker slot and quietly removed on the next read.
pub struct PathKeyFileStore {
    root: PathBuf,
    marker: WriteMarker,
}

impl PathKeyFileStore {
    /// Opens a store over `root`, creating the directory and the marker
    /// slot's backing file if absent. The mapped region is held for the
    /// store's lifetime.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        let marker = WriteMarker::open(root.join(MARKER_FILE_NAME))?;
        Ok(Self { root, marker })
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_at(&self, key: &str) -> StoreEntry {
        StoreEntry::new(key.to_string(), self.root.join(key))
    }

    fn invalid_key(key: &str, reason: &str) -> FileStoreError {
        FileStoreError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Rejects unusable keys before any directory or marker mutation.
    fn validate_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Self::invalid_key(key, "key is empty"));
        }
        for component in Path::new(key).components() {
            match component {
                Component::Normal(part) => {
                    if part == MARKER_FILE_NAME {
                        return Err(Self::invalid_key(key, "collides with the marker file"));
                    }
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(Self::invalid_key(key, "escapes the store root"));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Self::invalid_key(key, "key must be a relative path"));
                }
            }
        }
        if key.len() > MAX_KEY_BYTES {
            return Err(FileStoreError::KeyTooLong {
                key: key.to_string(),
                len: key.len(),
            });
        }
        Ok(())
    }

    fn store_error(&self, key: &str, source: impl Into<anyhow::Error>) -> FileStoreError {
        FileStoreError::Store {
            store: self.root.clone(),
            key: key.to_string(),
            source: source.into(),
        }
    }

    /// Crash-safe write protocol: record the key in the marker slot before
    /// mutating the destination, clear the slot on every exit path.
    fn do_add<F>(&mut self, key: &str, populate: F) -> Result<StoreEntry>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        self.validate_key(key)?;
        let destination = self.root.join(key);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| self.store_error(key, e))?;
        }
        self.marker.begin_write(key).map_err(|e| self.store_error(key, e))?;
        debug!(store = %self.root.display(), key, "write begin");
        let outcome = {
            // Declaration order matters: `discard` drops first, so a failed
            // or aborted populate deletes the partial file while the marker
            // still names it, then `_clear` empties the slot.
            let _clear = ClearOnExit(&mut self.marker);
            let mut discard = DiscardOnFailure {
                destination: &destination,
                committed: false,
            };
            remove_quietly(&destination);
            let outcome = populate(&destination);
            if outcome.is_ok() {
                discard.committed = true;
            }
            outcome
        };
        outcome?;
        debug!(store = %self.root.display(), key, "write committed");
        Ok(self.entry_at(key))
    }

    /// Best-effort, single-crash-depth repair: the slot only remembers the
    /// most recent in-flight write, so one sweep is all that is needed and
    /// all that is possible.
    fn sweep_in_flight(&mut self) {
        if let Some(stale) = self.marker.in_flight() {
            let remnant = self.root.join(&stale);
            warn!(
                store = %self.root.display(),
                path = %stale,
                "removing remnant of an interrupted write"
            );
            remove_quietly(&remnant);
            self.marker.end_write();
        }
    }
}

impl FileStore for PathKeyFileStore {
    fn add<F>(&mut self, key: &str, populate: F) -> Result<StoreEntry>
    where
        F: FnOnce(&Path) -> anyhow::Result<()>,
    {
        let store = self.root.clone();
        self.do_add(key, |destination| {
            populate(destination).map_err(|source| FileStoreError::AddActionFailed {
                store: store.clone(),
                key: key.to_string(),
                source,
            })
        })
    }

    fn mv(&mut self, key: &str, source: &Path) -> Result<StoreEntry> {
        if !source.exists() {
            return Err(FileStoreError::MissingSource {
                source_path: source.to_path_buf(),
                key: key.to_string(),
            });
        }
        let store = self.root.clone();
        self.do_add(key, |destination| {
            relocate(source, destination).map_err(|e| FileStoreError::Store {
                store: store.clone(),
                key: key.to_string(),
                source: e.into(),
            })
        })
    }

    fn get(&mut self, key: &str) -> Result<Option<StoreEntry>> {
        self.validate_key(key)?;
        self.sweep_in_flight();
        let entry = self.entry_at(key);
        if entry.exists() {
            Ok(Some(entry))
        } else {
            Ok(None)
        }
    }

    fn search(&mut self, pattern: &str) -> Result<HashSet<StoreEntry>> {
        if !self.root.exists() {
            return Ok(HashSet::new());
        }
        let include = IncludePattern::compile(pattern)?;
        // An interrupted write cannot be swept here; the walker does not
        // tolerate the tree mutating mid-traversal.
        let in_flight = self.marker.in_flight().map(|stale| self.root.join(stale));
        let marker_path = self.marker.path().to_path_buf();
        let mut entries = HashSet::new();
        search::visit_files(&self.root, &include, |path, key| {
            if path == marker_path {
                return;
            }
            if in_flight.as_deref() == Some(path) {
                return;
            }
            entries.insert(StoreEntry::new(key.to_string(), path.to_path_buf()));
        });
        trace!(
            store = %self.root.display(),
            pattern,
            matches = entries.len(),
            "search complete"
        );
        Ok(entries)
    }
}

/// Clears the marker slot when dropped, so the slot is empty whenever
/// control returns from a write, on every exit path including unwinds.
struct ClearOnExit<'a>(&'a mut WriteMarker);

impl Drop for ClearOnExit<'_> {
    fn drop(&mut self) {
        self.0.end_write();
    }
}

/// Quietly deletes the destination when dropped without being committed, so
/// a failed or panicking populate never leaves a partial file behind.
struct DiscardOnFailure<'a> {
    destination: &'a Path,
    committed: bool,
}

impl Drop for DiscardOnFailure<'_> {
    fn drop(&mut self) {
        if !self.committed {
            remove_quietly(self.destination);
        }
    }
}

/// Quiet delete: absence is not an error; directories are removed
/// recursively.
fn remove_quietly(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    if let Err(err) = result {
        if err.kind() != io::ErrorKind::NotFound {
            trace!(path = %path.display(), %err, "quiet delete failed");
        }
    }
}

/// Atomic relocate: rename within a volume; files fall back to copy+delete
/// across filesystems, directories do not.
fn relocate(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if source.is_file() {
                fs::copy(source, destination)?;
                fs::remove_file(source)
            } else {
                Err(rename_err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> PathKeyFileStore {
        PathKeyFileStore::open(dir.path().join("store")).unwrap()
    }

    #[test]
    fn rejects_empty_key() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let err = store.add("", |_| Ok(())).unwrap_err();
        assert!(matches!(err, FileStoreError::InvalidKey { .. }));
    }

    #[test]
    fn rejects_parent_escaping_key() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let err = store.add("../outside.txt", |_| Ok(())).unwrap_err();
        assert!(matches!(err, FileStoreError::InvalidKey { .. }));
    }

    #[test]
    fn rejects_absolute_key() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let err = store.add("/etc/passwd", |_| Ok(())).unwrap_err();
        assert!(matches!(err, FileStoreError::InvalidKey { .. }));
    }

    #[test]
    fn rejects_key_colliding_with_marker_file() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let err = store.add(MARKER_FILE_NAME, |_| Ok(())).unwrap_err();
        assert!(matches!(err, FileStoreError::InvalidKey { .. }));
    }

    #[test]
    fn oversized_key_fails_before_touching_anything() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let key = "k".repeat(MAX_KEY_BYTES + 1);
        let err = store
            .add(&key, |_| panic!("populate must not run"))
            .unwrap_err();
        assert!(matches!(err, FileStoreError::KeyTooLong { .. }));
        // No directories were created for the oversized key.
        assert!(!store.root().join(&key).exists());
    }

    #[test]
    fn error_classification_helpers() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let err = store
            .add("k", |_| Err(anyhow::anyhow!("caller bug")))
            .unwrap_err();
        assert!(err.is_add_action_failure());
        assert!(!err.is_store_failure());

        let err = store.mv("k", Path::new("/no/such/file")).unwrap_err();
        assert!(err.is_store_failure());
        assert!(!err.is_add_action_failure());
    }
}
