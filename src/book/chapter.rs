//! Chapter: one unit of manuscript content

use super::comments::CommentStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a chapter
///
/// Assigned at creation and never repurposed, unlike positional indices
/// which shift when chapters are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChapterId(Uuid);

impl ChapterId {
    /// Create a new random ChapterId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse the textual form produced by `Display`.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for ChapterId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChapterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derived analysis fields as returned by the storyboard endpoints.
///
/// An empty string means "not computed yet".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChapterSummaries {
    pub character_summary: String,
    pub location_summary: String,
    pub character_relationship_graph: String,
    pub timeline_summary: String,
    pub plotpoint_summary: String,
}

/// A chapter of the manuscript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// Stable identifier
    pub id: ChapterId,
    /// Creation-order position; unique within a book and never reused
    pub order: u32,
    pub title: String,
    /// Chapter body, possibly containing annotation markers
    pub text: String,
    #[serde(default)]
    pub character_summary: String,
    #[serde(default)]
    pub location_summary: String,
    #[serde(default)]
    pub character_relationship_graph: String,
    #[serde(default)]
    pub timeline_summary: String,
    #[serde(default)]
    pub plotpoint_summary: String,
    #[serde(default)]
    pub comments: CommentStore,
}

impl Chapter {
    /// Create a chapter with all derived fields empty.
    pub fn new(order: u32, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: ChapterId::new(),
            order,
            title: title.into(),
            text: text.into(),
            character_summary: String::new(),
            location_summary: String::new(),
            character_relationship_graph: String::new(),
            timeline_summary: String::new(),
            plotpoint_summary: String::new(),
            comments: CommentStore::new(),
        }
    }

    /// True when either cached summary the sequencer relies on is missing.
    pub fn needs_refinement(&self) -> bool {
        self.character_summary.is_empty() || self.location_summary.is_empty()
    }

    /// Current derived fields as a standalone value.
    pub fn summaries(&self) -> ChapterSummaries {
        ChapterSummaries {
            character_summary: self.character_summary.clone(),
            location_summary: self.location_summary.clone(),
            character_relationship_graph: self.character_relationship_graph.clone(),
            timeline_summary: self.timeline_summary.clone(),
            plotpoint_summary: self.plotpoint_summary.clone(),
        }
    }

    /// Overwrite derived fields with a fresh result.
    ///
    /// Empty fields in `summaries` keep the cached value, so a partial reply
    /// never erases work already done.
    pub fn apply_summaries(&mut self, summaries: &ChapterSummaries) {
        fn merge(slot: &mut String, fresh: &str) {
            if !fresh.is_empty() {
                *slot = fresh.to_string();
            }
        }
        merge(&mut self.character_summary, &summaries.character_summary);
        merge(&mut self.location_summary, &summaries.location_summary);
        merge(
            &mut self.character_relationship_graph,
            &summaries.character_relationship_graph,
        );
        merge(&mut self.timeline_summary, &summaries.timeline_summary);
        merge(&mut self.plotpoint_summary, &summaries.plotpoint_summary);
    }
}
