//! Storage trait definitions

use crate::book::Book;
use chrono::{DateTime, Utc};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt state for key '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for persisted session state
///
/// Implementations must be thread-safe (Send + Sync); the CLI saves from
/// whichever task finished the last mutation.
pub trait StateStore: Send + Sync {
    /// Persist the whole book in one write
    fn save_book(&self, book: &Book) -> StorageResult<()>;

    /// Load the persisted book; `None` when nothing was saved yet
    fn load_book(&self) -> StorageResult<Option<Book>>;

    /// When the book was last saved
    fn last_saved(&self) -> StorageResult<Option<DateTime<Utc>>>;

    /// Forget all persisted state
    fn clear(&self) -> StorageResult<()>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: StateStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
