//! Manuscript data model: chapters, their comment maps and the book

mod chapter;
pub mod comments;
mod manuscript;


pub use chapter::{Chapter, ChapterId, ChapterSummaries};
pub use comments::{decode_subcomments, encode_subcomments, CommentStore, Subcomment};
pub use manuscript::{Book, BookError, BookResult};

use std::sync::Arc;
use tokio::sync::RwLock;

/// A book shared between the session, the sequencer and discussion tasks.
///
/// Locks are only held between suspension points, never across a backend call.
pub type SharedBook = Arc<RwLock<Book>>;
