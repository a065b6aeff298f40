//! Storage module for hot-resume snapshot persistence.
//!
//! Provides the snapshot format, the store trait the engine writes through,
//! and in-memory and file-backed implementations.

mod traits;
mod memory;
mod file;
mod snapshot;

pub use traits::*;
pub use memory::*;
pub use file::*;
pub use snapshot::*;
