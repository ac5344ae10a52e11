//! Book: the ordered chapter list and the current-chapter pointer

use super::chapter::{Chapter, ChapterId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from chapter addressing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookError {
    #[error("Chapter not found: {0}")]
    ChapterNotFound(ChapterId),

    #[error("Chapter index out of range: {index} (book has {len} chapters)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Result type for book operations
pub type BookResult<T> = Result<T, BookError>;

/// A manuscript split into chapters
///
/// Chapters keep insertion order. The `order` counter only grows, so an
/// order value freed by removal is never handed out again.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Book {
    chapters: Vec<Chapter>,
    next_order: u32,
    current: Option<ChapterId>,
    /// Free-text style prompt used by the style channel
    #[serde(default)]
    pub style_prompt: String,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a book from persisted parts.
    ///
    /// `current_index` is clamped to the chapter list; `next_order` is raised
    /// above every order value present.
    pub fn from_parts(
        chapters: Vec<Chapter>,
        current_index: Option<usize>,
        next_order: u32,
        style_prompt: String,
    ) -> Self {
        let floor = chapters.iter().map(|c| c.order + 1).max().unwrap_or(0);
        let current = match current_index {
            Some(i) if !chapters.is_empty() => Some(chapters[i.min(chapters.len() - 1)].id),
            _ => chapters.first().map(|c| c.id),
        };
        Self {
            chapters,
            next_order: next_order.max(floor),
            current,
            style_prompt,
        }
    }

    /// Append a chapter and return its id. The first chapter becomes current.
    pub fn add_chapter(&mut self, title: impl Into<String>, text: impl Into<String>) -> ChapterId {
        let chapter = Chapter::new(self.next_order, title, text);
        self.next_order += 1;
        let id = chapter.id;
        self.chapters.push(chapter);
        if self.current.is_none() {
            self.current = Some(id);
        }
        id
    }

    /// Remove a chapter.
    ///
    /// Removing the current chapter moves the pointer to the chapter now at
    /// the previous position (or the first one). Other removals leave the
    /// current chapter untouched.
    pub fn remove_chapter(&mut self, id: &ChapterId) -> BookResult<Chapter> {
        let index = self.index_of(id)?;
        let removed = self.chapters.remove(index);
        if self.current == Some(removed.id) {
            self.current = self
                .chapters
                .get(index.saturating_sub(1))
                .map(|c| c.id);
        }
        Ok(removed)
    }

    pub fn get(&self, id: &ChapterId) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == *id)
    }

    pub fn get_mut(&mut self, id: &ChapterId) -> Option<&mut Chapter> {
        self.chapters.iter_mut().find(|c| c.id == *id)
    }

    pub fn chapter(&self, id: &ChapterId) -> BookResult<&Chapter> {
        self.get(id).ok_or(BookError::ChapterNotFound(*id))
    }

    pub fn chapter_mut(&mut self, id: &ChapterId) -> BookResult<&mut Chapter> {
        self.get_mut(id).ok_or(BookError::ChapterNotFound(*id))
    }

    /// Current position of a chapter.
    pub fn index_of(&self, id: &ChapterId) -> BookResult<usize> {
        self.chapters
            .iter()
            .position(|c| c.id == *id)
            .ok_or(BookError::ChapterNotFound(*id))
    }

    /// Resolve a positional index to a stable id.
    pub fn id_at(&self, index: usize) -> BookResult<ChapterId> {
        self.chapters
            .get(index)
            .map(|c| c.id)
            .ok_or(BookError::IndexOutOfRange {
                index,
                len: self.chapters.len(),
            })
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn next_order(&self) -> u32 {
        self.next_order
    }

    pub fn current_id(&self) -> Option<ChapterId> {
        self.current
    }

    pub fn current(&self) -> Option<&Chapter> {
        self.current.as_ref().and_then(|id| self.get(id))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current.as_ref().and_then(|id| self.index_of(id).ok())
    }

    pub fn select(&mut self, id: &ChapterId) -> BookResult<()> {
        self.index_of(id)?;
        self.current = Some(*id);
        Ok(())
    }

    /// Render the book as markdown: a `#` heading per chapter followed by
    /// its text, markers preserved.
    pub fn to_markdown(&self) -> String {
        self.chapters
            .iter()
            .map(|c| format!("# {}\n\n{}\n", c.title, c.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All chapters' comment maps merged into one.
    pub fn merged_comments(&self) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        for chapter in &self.chapters {
            for (key, value) in chapter.comments.entries() {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_chapter_assigns_increasing_order() {
        let mut book = Book::new();
        let a = book.add_chapter("One", "a");
        let b = book.add_chapter("Two", "b");

        assert_eq!(book.chapter(&a).unwrap().order, 0);
        assert_eq!(book.chapter(&b).unwrap().order, 1);
        assert_eq!(book.current_id(), Some(a));
    }

    #[test]
    fn test_order_is_never_reused() {
        let mut book = Book::new();
        book.add_chapter("One", "a");
        let b = book.add_chapter("Two", "b");
        book.remove_chapter(&b).unwrap();

        let c = book.add_chapter("Three", "c");
        assert_eq!(book.chapter(&c).unwrap().order, 2);
    }

    #[test]
    fn test_surviving_chapters_keep_order() {
        let mut book = Book::new();
        let a = book.add_chapter("One", "a");
        let b = book.add_chapter("Two", "b");
        let c = book.add_chapter("Three", "c");
        book.remove_chapter(&b).unwrap();

        assert_eq!(book.chapter(&a).unwrap().order, 0);
        assert_eq!(book.chapter(&c).unwrap().order, 2);
        assert_eq!(book.index_of(&c).unwrap(), 1);
    }

    #[test]
    fn test_removing_current_moves_pointer_back() {
        let mut book = Book::new();
        let a = book.add_chapter("One", "a");
        let b = book.add_chapter("Two", "b");
        book.add_chapter("Three", "c");
        book.select(&b).unwrap();

        book.remove_chapter(&b).unwrap();
        assert_eq!(book.current_id(), Some(a));
    }

    #[test]
    fn test_removing_first_current_selects_new_first() {
        let mut book = Book::new();
        let a = book.add_chapter("One", "a");
        let b = book.add_chapter("Two", "b");

        book.remove_chapter(&a).unwrap();
        assert_eq!(book.current_id(), Some(b));

        book.remove_chapter(&b).unwrap();
        assert_eq!(book.current_id(), None);
    }

    #[test]
    fn test_removing_other_chapter_keeps_current() {
        let mut book = Book::new();
        let a = book.add_chapter("One", "a");
        let b = book.add_chapter("Two", "b");
        book.select(&b).unwrap();

        book.remove_chapter(&a).unwrap();
        assert_eq!(book.current_id(), Some(b));
        assert_eq!(book.current_index(), Some(0));
    }

    #[test]
    fn test_id_at_out_of_range() {
        let book = Book::new();
        assert_eq!(
            book.id_at(3),
            Err(BookError::IndexOutOfRange { index: 3, len: 0 })
        );
    }

    #[test]
    fn test_from_parts_restores_pointer_and_counter() {
        let mut original = Book::new();
        original.add_chapter("One", "a");
        let b = original.add_chapter("Two", "b");

        let restored = Book::from_parts(original.chapters().to_vec(), Some(1), 0, String::new());
        assert_eq!(restored.current_id(), Some(b));
        assert_eq!(restored.next_order(), 2);
    }

    #[test]
    fn test_markdown_rendering_keeps_markers() {
        let mut book = Book::new();
        book.add_chapter("Opening", "It began <comment id=\"0123abcd\">here</comment>.");
        let md = book.to_markdown();
        assert!(md.starts_with("# Opening\n\n"));
        assert!(md.contains("<comment id=\"0123abcd\">here</comment>"));
    }
}
