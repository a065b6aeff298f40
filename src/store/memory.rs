//! In-memory snapshot store for development and testing.

use std::sync::RwLock;

use crate::store::{SnapshotStore, StoreError, StoreResult};

/// Keeps the snapshot blob in process memory.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    blob: RwLock<Option<Vec<u8>>>,
}

impl MemorySnapshotStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `bytes`.
    pub fn with_snapshot(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            blob: RwLock::new(Some(bytes.into())),
        }
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn read_snapshot(&self) -> StoreResult<Vec<u8>> {
        let blob = self.blob.read()
            .map_err(|_| StoreError::BackendError("lock poisoned".to_string()))?;
        blob.clone().ok_or(StoreError::NotFound)
    }

    fn write_snapshot(&self, bytes: &[u8]) -> StoreResult<()> {
        let mut blob = self.blob.write()
            .map_err(|_| StoreError::BackendError("lock poisoned".to_string()))?;
        *blob = Some(bytes.to_vec());
        Ok(())
    }

    fn clear_snapshot(&self) -> StoreResult<()> {
        let mut blob = self.blob.write()
            .map_err(|_| StoreError::BackendError("lock poisoned".to_string()))?;
        *blob = None;
        Ok(())
    }
}
