//! Write-intent marker
//!
//! A fixed-size, memory-mapped single-slot durability record naming the one
//! file currently being written, if any. The slot layout is: a 4-byte signed
//! little-endian length `L` at offset 0 (0 = empty), followed by `L` bytes of
//! UTF-8 relative path. Begin-write zeroes the view, writes the length and
//! path bytes, and forces a flush to stable storage before returning;
//! end-write overwrites only the length field with 0, leaving the payload
//! bytes stale but inert.
//!
//! A non-empty slot observed later means the process died mid-write and the
//! named file is unreliable regardless of its apparent state.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

/// Reserved file name for the marker slot under a store root.
pub const MARKER_FILE_NAME: &str = ".fslck";

/// Fixed size of the slot's backing region.
pub const SLOT_SIZE: usize = 4096;

const LEN_FIELD: usize = 4;

/// Longest path key the slot can hold alongside its length prefix.
pub const MAX_KEY_BYTES: usize = SLOT_SIZE - LEN_FIELD;

/// Single-slot write-intent record, mapped read-write for the lifetime of
/// the owning store.
pub struct WriteMarker {
    map: MmapMut,
    path: PathBuf,
}

impl WriteMarker {
    /// Opens (creating and zero-filling if absent) the backing file at
    /// `path` and maps its fixed-size region.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        file.set_len(SLOT_SIZE as u64)?;
        let map = unsafe { MmapOptions::new().len(SLOT_SIZE).map_mut(&file)? };
        Ok(Self { map, path })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records `key` as the in-flight write and forces the slot durable.
    /// Callers must have checked [`MAX_KEY_BYTES`] beforehand.
    pub fn begin_write(&mut self, key: &str) -> io::Result<()> {
        let bytes = key.as_bytes();
        debug_assert!(bytes.len() <= MAX_KEY_BYTES);
        self.map.fill(0);
        self.map[..LEN_FIELD].copy_from_slice(&(bytes.len() as i32).to_le_bytes());
        self.map[LEN_FIELD..LEN_FIELD + bytes.len()].copy_from_slice(bytes);
        self.map.flush()
    }

    /// Clears the slot by overwriting the length field with 0. The payload
    /// bytes are left stale; a zero length means "ignore payload".
    pub fn end_write(&mut self) {
        self.map[..LEN_FIELD].copy_from_slice(&0i32.to_le_bytes());
    }

    /// Relative path recorded by an unfinished write, if any. A negative or
    /// oversized length, or a non-UTF-8 payload, is treated as empty.
    pub fn in_flight(&self) -> Option<String> {
        let mut len_bytes = [0u8; LEN_FIELD];
        len_bytes.copy_from_slice(&self.map[..LEN_FIELD]);
        let len = i32::from_le_bytes(len_bytes);
        if len <= 0 || len as usize > MAX_KEY_BYTES {
            return None;
        }
        let payload = &self.map[LEN_FIELD..LEN_FIELD + len as usize];
        std::str::from_utf8(payload).ok().map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn marker_in(dir: &TempDir) -> WriteMarker {
        WriteMarker::open(dir.path().join(MARKER_FILE_NAME)).unwrap()
    }

    #[test]
    fn fresh_slot_is_empty() {
        let dir = TempDir::new().unwrap();
        let marker = marker_in(&dir);
        assert_eq!(marker.in_flight(), None);
        assert_eq!(
            fs::metadata(marker.path()).unwrap().len(),
            SLOT_SIZE as u64
        );
    }

    #[test]
    fn begin_write_is_visible_after_remap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MARKER_FILE_NAME);
        {
            let mut marker = WriteMarker::open(&path).unwrap();
            marker.begin_write("a/b.txt").unwrap();
        }
        // A fresh mapping over the same file must still see the record.
        let marker = WriteMarker::open(&path).unwrap();
        assert_eq!(marker.in_flight().as_deref(), Some("a/b.txt"));
    }

    #[test]
    fn end_write_leaves_stale_payload_inert() {
        let dir = TempDir::new().unwrap();
        let mut marker = marker_in(&dir);
        marker.begin_write("downloads/lib.jar").unwrap();
        marker.end_write();
        assert_eq!(marker.in_flight(), None);
        // Payload bytes are still there; only the length field was cleared.
        let raw = fs::read(marker.path()).unwrap();
        assert_eq!(&raw[..4], &[0, 0, 0, 0]);
        assert_eq!(&raw[4..4 + 17], b"downloads/lib.jar");
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("cache").join("modules").join(MARKER_FILE_NAME);
        let marker = WriteMarker::open(&nested).unwrap();
        assert_eq!(marker.in_flight(), None);
    }

    proptest! {
        #[test]
        fn slot_records_any_key_within_capacity(key in "[a-zA-Z0-9._/-]{1,512}") {
            let dir = TempDir::new().unwrap();
            let mut marker = marker_in(&dir);
            marker.begin_write(&key).unwrap();
            let recorded = marker.in_flight();
            prop_assert_eq!(recorded.as_deref(), Some(key.as_str()));
            marker.end_write();
            prop_assert_eq!(marker.in_flight(), None);
        }
    }
}
