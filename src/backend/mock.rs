//! Mock backend for testing: preconfigured replies plus a call log

use super::{
    BackendError, DiscussionRequest, ExportRequest, InspectionKind, InspectionTransport,
    OutboundFrame, RefineRequest, StoryboardClient, StoryboardRequest,
};
use crate::book::ChapterSummaries;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// One recorded call to a `MockBackend`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Storyboard { chapter_number: usize },
    Refine { chapter_number: usize, previous: usize },
    Discuss { comments: Vec<String> },
    Export { filename: String },
}

/// Mock storyboard client.
///
/// Chapters without a registered reply get generated summaries derived from
/// their title, so sequencing tests only need to register failures.
pub struct MockBackend {
    available: bool,
    summaries: HashMap<usize, ChapterSummaries>,
    failures: HashSet<usize>,
    discussion_reply: String,
    export_bytes: Vec<u8>,
    calls: Mutex<Vec<BackendCall>>,
}

impl MockBackend {
    /// Create a mock backend that answers every call.
    pub fn available() -> Self {
        Self {
            available: true,
            summaries: HashMap::new(),
            failures: HashSet::new(),
            discussion_reply: String::new(),
            export_bytes: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock backend that fails every call.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::available()
        }
    }

    /// Register the summaries returned for a chapter number.
    pub fn with_summaries(mut self, chapter_number: usize, summaries: ChapterSummaries) -> Self {
        self.summaries.insert(chapter_number, summaries);
        self
    }

    /// Make refinement and storyboard calls for a chapter number fail.
    pub fn with_failure(mut self, chapter_number: usize) -> Self {
        self.failures.insert(chapter_number);
        self
    }

    pub fn with_discussion_reply(mut self, reply: impl Into<String>) -> Self {
        self.discussion_reply = reply.into();
        self
    }

    pub fn with_export_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.export_bytes = bytes;
        self
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: BackendCall) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push(call);
        if self.available {
            Ok(())
        } else {
            Err(BackendError::Unavailable(
                "mock backend configured as unavailable".to_string(),
            ))
        }
    }

    fn summaries_for(
        &self,
        chapter_number: usize,
        title: &str,
    ) -> Result<ChapterSummaries, BackendError> {
        if self.failures.contains(&chapter_number) {
            return Err(BackendError::Http {
                status: 500,
                body: format!("mock failure for chapter {}", chapter_number),
            });
        }
        Ok(self
            .summaries
            .get(&chapter_number)
            .cloned()
            .unwrap_or_else(|| generated_summaries(title)))
    }
}

/// Summaries the mock derives from a chapter title.
pub(crate) fn generated_summaries(title: &str) -> ChapterSummaries {
    ChapterSummaries {
        character_summary: format!("characters of {}\n", title),
        location_summary: format!("locations of {}\n", title),
        ..Default::default()
    }
}

#[async_trait]
impl StoryboardClient for MockBackend {
    async fn storyboard_chapter(
        &self,
        request: &StoryboardRequest,
    ) -> Result<ChapterSummaries, BackendError> {
        self.record(BackendCall::Storyboard {
            chapter_number: request.chapter_number,
        })?;
        self.summaries_for(request.chapter_number, &request.title)
    }

    async fn refine_chapter(
        &self,
        request: &RefineRequest,
    ) -> Result<ChapterSummaries, BackendError> {
        self.record(BackendCall::Refine {
            chapter_number: request.chapter_number,
            previous: request.previous_summaries.len(),
        })?;
        self.summaries_for(request.chapter_number, &request.title)
    }

    async fn discuss(&self, request: &DiscussionRequest) -> Result<String, BackendError> {
        self.record(BackendCall::Discuss {
            comments: request.comments.clone(),
        })?;
        Ok(self.discussion_reply.clone())
    }

    async fn export_docx(&self, request: &ExportRequest) -> Result<Vec<u8>, BackendError> {
        self.record(BackendCall::Export {
            filename: request.filename.clone(),
        })?;
        Ok(self.export_bytes.clone())
    }
}

/// Mock inspection transport that records every frame it is asked to send.
#[derive(Default)]
pub struct MockTransport {
    fail: bool,
    sent: Mutex<Vec<(InspectionKind, OutboundFrame)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose channels are all closed.
    pub fn disconnected() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(InspectionKind, OutboundFrame)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl InspectionTransport for MockTransport {
    async fn send(&self, kind: InspectionKind, frame: &OutboundFrame) -> Result<(), BackendError> {
        if self.fail {
            return Err(BackendError::ChannelClosed(kind));
        }
        self.sent.lock().unwrap().push((kind, frame.clone()));
        Ok(())
    }
}
