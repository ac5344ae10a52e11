//! Persisted session state
//!
//! The book, the current-chapter pointer and the style prompt survive
//! restarts through the `StateStore` trait. `SqliteStore` is the only
//! implementation.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{OpenStore, StateStore, StorageError, StorageResult};
