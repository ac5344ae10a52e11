//! Common test utilities for manuscript integration tests
//!
//! Backends here stand in for the storyboard service with behaviour the
//! library's `MockBackend` does not cover: call ordering with overlap
//! detection, and replies that wait until the test releases them.

// Each test binary uses its own subset.
#![allow(dead_code, unused_imports)]

pub mod backends;

pub use backends::{GatedBackend, RecordingBackend};

use manuscript::{Book, ChapterSummaries, SharedBook};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Summaries with only the two fields the sequencer reads.
pub fn summaries(character: &str, location: &str) -> ChapterSummaries {
    ChapterSummaries {
        character_summary: character.to_string(),
        location_summary: location.to_string(),
        ..Default::default()
    }
}

pub fn shared(book: Book) -> SharedBook {
    Arc::new(RwLock::new(book))
}
