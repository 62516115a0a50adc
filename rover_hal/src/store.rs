//! Key-value persistent store for calibration records.
//!
//! The calibrator persists small binary records (LUTs, offsets, flags)
//! under string keys of the form `"{namespace}.{record}"`. The backend is
//! abstract: production targets map it onto the platform's non-volatile
//! store, tests use [`MemStore`], and the Linux build uses [`FileStore`]
//! (one file per record under a directory).
//!
//! Store access happens only on the control task and only outside the
//! high-rate path (boot, routine completion), so the trait is synchronous.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

/// Persistent store failure.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backend I/O failed.
    #[error("store I/O error on {key}: {detail}")]
    Io { key: String, detail: String },
    /// Key contains characters the backend cannot represent.
    #[error("invalid store key: {0}")]
    InvalidKey(String),
}

/// Byte-blob key-value store.
///
/// Absent keys read as `None`; `remove` of an absent key succeeds.
pub trait KvStore: Send {
    /// Read a record. `None` when the key does not exist.
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    /// Create or overwrite a record.
    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    /// Delete a record if present.
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

// ─── In-memory store ────────────────────────────────────────────────

/// Volatile store for tests and bench harnesses.
#[derive(Debug, Default)]
pub struct MemStore {
    records: HashMap<String, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records (test hook).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.records.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.records.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.records.remove(key);
        Ok(())
    }
}

// ─── File-backed store ──────────────────────────────────────────────

/// Directory-backed store: one file per record, named after the key.
///
/// Writes go through a temporary file and an atomic rename so a crash
/// mid-write leaves the previous record intact.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io {
            key: dir.display().to_string(),
            detail: e.to_string(),
        })?;
        debug!(dir = %dir.display(), "file store opened");
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.path_for(key).ok()?;
        fs::read(path).ok()
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!("{key}.tmp"));
        fs::write(&tmp, value).map_err(|e| StoreError::Io {
            key: key.to_string(),
            detail: e.to_string(),
        })?;
        fs::rename(&tmp, &path).map_err(|e| StoreError::Io {
            key: key.to_string(),
            detail: e.to_string(),
        })
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io {
                key: key.to_string(),
                detail: e.to_string(),
            }),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_store_round_trip() {
        let mut s = MemStore::new();
        assert!(s.get("wheel_l.lut_fwd").is_none());
        s.put("wheel_l.lut_fwd", &[1, 2, 3]).unwrap();
        assert_eq!(s.get("wheel_l.lut_fwd").unwrap(), vec![1, 2, 3]);
        s.put("wheel_l.lut_fwd", &[9]).unwrap();
        assert_eq!(s.get("wheel_l.lut_fwd").unwrap(), vec![9]);
        s.remove("wheel_l.lut_fwd").unwrap();
        assert!(s.get("wheel_l.lut_fwd").is_none());
    }

    #[test]
    fn mem_store_remove_absent_ok() {
        let mut s = MemStore::new();
        s.remove("nope").unwrap();
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = FileStore::open(dir.path()).unwrap();
        s.put("wheel_r.off_rev", &7u16.to_le_bytes()).unwrap();
        assert_eq!(s.get("wheel_r.off_rev").unwrap(), 7u16.to_le_bytes());
        s.remove("wheel_r.off_rev").unwrap();
        assert!(s.get("wheel_r.off_rev").is_none());
        s.remove("wheel_r.off_rev").unwrap();
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut s = FileStore::open(dir.path()).unwrap();
            s.put("wheel_l.use_fwd", &[1]).unwrap();
        }
        let s = FileStore::open(dir.path()).unwrap();
        assert_eq!(s.get("wheel_l.use_fwd").unwrap(), vec![1]);
    }

    #[test]
    fn file_store_rejects_path_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            s.put("../evil", &[0]),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(s.get("a/b").is_none());
    }
}
