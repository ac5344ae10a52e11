//! Backend client: the storyboard HTTP endpoints and the inspection channels
//!
//! Two seams:
//! - `StoryboardClient`: request/response calls over HTTP (`HttpBackend`)
//! - `InspectionTransport`: fire-and-forget frames on the style, grammar and
//!   logic duplex channels (`SocketTransport`); replies arrive separately as
//!   `InboundFrame`s
//!
//! `MockBackend` and `MockTransport` stand in for both in tests.

pub mod http;
mod mock;
pub mod socket;

pub use mock::{BackendCall, MockBackend, MockTransport};

use crate::annotation::Annotation;
use crate::book::{ChapterId, ChapterSummaries};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const CHAPTER_STORYBOARD_PATH: &str = "/api/chapter-storyboard";
pub const INCREMENTAL_STORYBOARD_PATH: &str = "/api/incremental-storyboard";
pub const COMMENT_DISCUSSION_PATH: &str = "/api/comment-discussion";
pub const EXPORT_DOCX_PATH: &str = "/api/markdown-to-docx-with-comments";

/// Errors from backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend not available: {0}")]
    Unavailable(String),
    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("response decode error: {0}")]
    Decode(String),
    #[error("{0} channel is not connected")]
    ChannelClosed(InspectionKind),
}

/// Full one-shot analysis of a single chapter.
#[derive(Debug, Clone, Serialize)]
pub struct StoryboardRequest {
    pub chapter_number: usize,
    pub title: String,
    pub text: String,
}

/// Refinement of one chapter given every earlier chapter's cached summaries.
#[derive(Debug, Clone, Serialize)]
pub struct RefineRequest {
    pub chapter_number: usize,
    pub title: String,
    pub text: String,
    /// Summaries of chapters `0..chapter_number`, in order
    pub previous_summaries: Vec<ChapterSummaries>,
}

/// A comment thread sent for an AI reply.
#[derive(Debug, Clone, Serialize)]
pub struct DiscussionRequest {
    /// Original comment followed by every subcomment so far
    pub comments: Vec<String>,
    /// Character and location context of the chapter
    pub storyboard: String,
}

/// Book export with comments.
#[derive(Debug, Clone, Serialize)]
pub struct ExportRequest {
    pub markdown_content: String,
    pub filename: String,
    pub author_name: String,
    pub comments: BTreeMap<String, String>,
}

/// Client trait for the request/response endpoints.
///
/// Abstracts over transport (HTTP, mock) so the sequencer and the discussion
/// coordinator don't depend on how the backend is reached.
#[async_trait]
pub trait StoryboardClient: Send + Sync {
    /// `POST /api/chapter-storyboard`
    async fn storyboard_chapter(
        &self,
        request: &StoryboardRequest,
    ) -> Result<ChapterSummaries, BackendError>;

    /// `POST /api/incremental-storyboard`
    async fn refine_chapter(&self, request: &RefineRequest)
        -> Result<ChapterSummaries, BackendError>;

    /// `POST /api/comment-discussion`; an empty string means "no reply".
    async fn discuss(&self, request: &DiscussionRequest) -> Result<String, BackendError>;

    /// `POST /api/markdown-to-docx-with-comments`; returns the decoded document.
    async fn export_docx(&self, request: &ExportRequest) -> Result<Vec<u8>, BackendError>;
}

/// The three duplex inspection channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InspectionKind {
    Style,
    Grammar,
    Logic,
}

impl InspectionKind {
    pub const ALL: [InspectionKind; 3] = [Self::Style, Self::Grammar, Self::Logic];

    pub fn path(&self) -> &'static str {
        match self {
            Self::Style => "/api/style-guard",
            Self::Grammar => "/api/grammar-inspector",
            Self::Logic => "/api/logic-inspector",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Style => "style",
            Self::Grammar => "grammar",
            Self::Logic => "logic",
        }
    }
}

impl std::fmt::Display for InspectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Frames sent on an inspection channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    /// Style channel: replace the active style prompt
    StylePrompt { style_prompt: String },
    /// Style or grammar channel: inspect a chapter
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        chapter: Option<ChapterId>,
    },
    /// Logic channel: inspect a chapter against earlier chapters' summaries
    Logic {
        character_summary: String,
        location_summary: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        chapter: Option<ChapterId>,
    },
}

impl OutboundFrame {
    /// Chapter the frame is about, if any.
    pub fn chapter(&self) -> Option<ChapterId> {
        match self {
            Self::StylePrompt { .. } => None,
            Self::Text { chapter, .. } | Self::Logic { chapter, .. } => *chapter,
        }
    }
}

/// Lifecycle statuses reported on an inspection channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectionStatus {
    StylePromptUpdated,
    Done,
    StyleDone,
    Other(String),
}

impl InspectionStatus {
    fn parse(value: &str) -> Self {
        match value {
            "style_prompt_updated" => Self::StylePromptUpdated,
            "done" => Self::Done,
            "style_done" => Self::StyleDone,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether this status ends an outstanding inspection.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::StyleDone)
    }
}

/// Frames received on an inspection channel.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Annotation {
        annotation: Annotation,
        chapter: Option<ChapterId>,
    },
    Status {
        status: InspectionStatus,
        chapter: Option<ChapterId>,
    },
    Error {
        message: String,
        chapter: Option<ChapterId>,
    },
    /// Anything without the expected fields; ignored by the session
    Unrecognized(Value),
}

impl InboundFrame {
    /// Classify a text frame. Invalid JSON becomes `Unrecognized`.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_value(value),
            Err(_) => Self::Unrecognized(Value::String(text.to_string())),
        }
    }

    pub fn from_value(value: Value) -> Self {
        let chapter = value
            .get("chapter")
            .and_then(Value::as_str)
            .and_then(ChapterId::parse);

        if let Some(message) = value.get("error") {
            let message = match message {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Self::Error { message, chapter };
        }
        if let Some(status) = value.get("status").and_then(Value::as_str) {
            return Self::Status {
                status: InspectionStatus::parse(status),
                chapter,
            };
        }
        let original_text = value.get("original_text").and_then(Value::as_str);
        let comment = value.get("comment").and_then(Value::as_str);
        if let (Some(original_text), Some(comment)) = (original_text, comment) {
            let suggestion = value
                .get("suggestion")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            return Self::Annotation {
                annotation: Annotation {
                    original_text: original_text.to_string(),
                    comment: comment.to_string(),
                    suggestion,
                },
                chapter,
            };
        }
        Self::Unrecognized(value)
    }

    /// Chapter id echoed back by the backend, if any.
    pub fn chapter(&self) -> Option<ChapterId> {
        match self {
            Self::Annotation { chapter, .. }
            | Self::Status { chapter, .. }
            | Self::Error { chapter, .. } => *chapter,
            Self::Unrecognized(_) => None,
        }
    }
}

/// Sending side of the inspection channels.
///
/// Replies are not returned from `send`; the transport delivers them as
/// `(InspectionKind, InboundFrame)` pairs to whoever owns the receiver.
#[async_trait]
pub trait InspectionTransport: Send + Sync {
    async fn send(&self, kind: InspectionKind, frame: &OutboundFrame) -> Result<(), BackendError>;
}
