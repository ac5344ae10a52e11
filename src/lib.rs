//! Manuscript: annotation reconciliation and incremental chapter analysis
//!
//! A client for a writing-assistant backend. A book is split into chapters;
//! critique comments coming back from the backend are anchored into chapter
//! text with fingerprint-keyed markers, and cross-chapter logic inspection
//! is fed summaries that are refined chapter by chapter, in order.
//!
//! # Core Concepts
//!
//! - **Fingerprints**: 8-hex-char content hashes that key comments and markers
//! - **Chapters**: text plus cached summaries plus a flat comment map
//! - **Sessions**: dispatch inspections and route replies by chapter id
//!
//! # Example
//!
//! ```
//! use manuscript::{Book, Reconciler, Annotation};
//!
//! let mut book = Book::new();
//! let id = book.add_chapter("Opening", "It was a dark night.");
//! let chapter = book.chapter_mut(&id).unwrap();
//! let outcome = Reconciler::new().annotate_chapter(chapter, &Annotation::new("dark", "Cliché."));
//! assert!(outcome.anchored);
//! ```

pub mod analysis;
pub mod annotation;
pub mod backend;
mod book;
pub mod config;
mod fingerprint;
pub mod storage;

pub use analysis::{AnalysisError, AnalysisSession, BlockedFlag, InboundEffect, Notice, NoticeLevel};
pub use annotation::{
    Annotation, AnnotationOutcome, DiscussionCoordinator, DiscussionError, DiscussionOutcome,
    ReconcileError, Reconciler,
};
pub use backend::{BackendError, InboundFrame, InspectionKind, OutboundFrame, StoryboardClient};
pub use book::{
    decode_subcomments, encode_subcomments, Book, BookError, BookResult, Chapter, ChapterId,
    ChapterSummaries, CommentStore, SharedBook, Subcomment,
};
pub use config::{Config, ConfigError};
pub use fingerprint::{fingerprint, Fingerprint};
pub use storage::{OpenStore, SqliteStore, StateStore, StorageError, StorageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
