//! Storyboard clients for integration tests

use async_trait::async_trait;
use manuscript::backend::{
    DiscussionRequest, ExportRequest, RefineRequest, StoryboardClient, StoryboardRequest,
};
use manuscript::{BackendError, ChapterSummaries};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Semaphore;

/// One observed refine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineCall {
    pub chapter_number: usize,
    /// Character summaries the call received as context, in order
    pub previous_characters: Vec<String>,
}

/// Records refine calls in arrival order and notices overlapping calls.
///
/// Each call yields to the scheduler before answering, so a caller that
/// fired refinements without awaiting them would be caught overlapping.
#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<RefineCall>>,
    failures: HashSet<usize>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure(mut self, chapter_number: usize) -> Self {
        self.failures.insert(chapter_number);
        self
    }

    pub fn calls(&self) -> Vec<RefineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn refined_numbers(&self) -> Vec<usize> {
        self.calls().iter().map(|c| c.chapter_number).collect()
    }

    /// Highest number of refine calls in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoryboardClient for RecordingBackend {
    async fn storyboard_chapter(
        &self,
        request: &StoryboardRequest,
    ) -> Result<ChapterSummaries, BackendError> {
        Ok(super::summaries(
            &format!("c{} ", request.chapter_number),
            &format!("l{} ", request.chapter_number),
        ))
    }

    async fn refine_chapter(
        &self,
        request: &RefineRequest,
    ) -> Result<ChapterSummaries, BackendError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(RefineCall {
            chapter_number: request.chapter_number,
            previous_characters: request
                .previous_summaries
                .iter()
                .map(|s| s.character_summary.clone())
                .collect(),
        });

        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failures.contains(&request.chapter_number) {
            return Err(BackendError::Http {
                status: 502,
                body: "upstream model unavailable".to_string(),
            });
        }
        Ok(super::summaries(
            &format!("c{} ", request.chapter_number),
            &format!("l{} ", request.chapter_number),
        ))
    }

    async fn discuss(&self, _request: &DiscussionRequest) -> Result<String, BackendError> {
        Ok(String::new())
    }

    async fn export_docx(&self, _request: &ExportRequest) -> Result<Vec<u8>, BackendError> {
        Ok(Vec::new())
    }
}

/// Holds every discussion reply until the test calls `release`.
pub struct GatedBackend {
    gate: Semaphore,
    reply: String,
    discuss_calls: AtomicUsize,
}

impl GatedBackend {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            gate: Semaphore::new(0),
            reply: reply.into(),
            discuss_calls: AtomicUsize::new(0),
        }
    }

    /// Let one reply through, now or whenever it is next requested.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn discuss_calls(&self) -> usize {
        self.discuss_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoryboardClient for GatedBackend {
    async fn storyboard_chapter(
        &self,
        _request: &StoryboardRequest,
    ) -> Result<ChapterSummaries, BackendError> {
        Ok(ChapterSummaries::default())
    }

    async fn refine_chapter(
        &self,
        _request: &RefineRequest,
    ) -> Result<ChapterSummaries, BackendError> {
        Ok(ChapterSummaries::default())
    }

    async fn discuss(&self, _request: &DiscussionRequest) -> Result<String, BackendError> {
        self.discuss_calls.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        permit.forget();
        Ok(self.reply.clone())
    }

    async fn export_docx(&self, _request: &ExportRequest) -> Result<Vec<u8>, BackendError> {
        Ok(Vec::new())
    }
}
