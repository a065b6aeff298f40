//! Store traits for hot-resume snapshot persistence.
//!
//! The engine reads and writes exactly one opaque blob. Where that blob
//! lives is up to the caller.

/// Error type for store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound,
    BackendError(String),
    SerializationError(String),
    /// Stored data exists but is not a snapshot this engine can read.
    Malformed(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "not found"),
            StoreError::BackendError(e) => write!(f, "backend error: {}", e),
            StoreError::SerializationError(e) => write!(f, "serialization error: {}", e),
            StoreError::Malformed(e) => write!(f, "malformed snapshot: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable home for one hot-resume snapshot.
pub trait SnapshotStore: Send + Sync {
    /// Read the stored blob, or [`StoreError::NotFound`] if nothing was written.
    fn read_snapshot(&self) -> StoreResult<Vec<u8>>;

    /// Replace the stored blob.
    fn write_snapshot(&self, bytes: &[u8]) -> StoreResult<()>;

    /// Forget the stored blob. Clearing an empty store is not an error.
    fn clear_snapshot(&self) -> StoreResult<()>;
}
