//! Snapshot store backed by a single file on disk.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::store::{SnapshotStore, StoreError, StoreResult};

/// Stores the snapshot as a JSON file at a fixed path.
///
/// Writes go to a sibling temporary file first and are then renamed over
/// the target, so a crash mid-write never leaves a truncated snapshot.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotStore {
    path: PathBuf,
}

impl JsonFileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for JsonFileSnapshotStore {
    fn read_snapshot(&self) -> StoreResult<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(StoreError::BackendError(format!("{}: {}", self.path.display(), e))),
        }
    }

    fn write_snapshot(&self, bytes: &[u8]) -> StoreResult<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|e| StoreError::BackendError(format!("{}: {}", dir.display(), e)))?;
        }
        let tmp = self.temp_path();
        fs::write(&tmp, bytes)
            .map_err(|e| StoreError::BackendError(format!("{}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| StoreError::BackendError(format!("{}: {}", self.path.display(), e)))
    }

    fn clear_snapshot(&self) -> StoreResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::BackendError(format!("{}: {}", self.path.display(), e))),
        }
    }
}
