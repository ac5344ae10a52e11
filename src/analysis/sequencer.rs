//! Incremental analysis sequencer
//!
//! Before a chapter is sent for logic inspection, every earlier chapter must
//! have cached character and location summaries. Missing ones are refined
//! one at a time in chapter order, each refinement awaited before the next
//! starts, because the backend receives all earlier summaries as context.
//! The summaries of chapters `0..N` are then concatenated and sent together
//! with chapter `N`'s text as a single logic-inspection frame.

use super::{notify, AnalysisError, BlockedFlag, Notice, NoticeLevel};
use crate::backend::{
    InspectionKind, InspectionTransport, OutboundFrame, RefineRequest, StoryboardClient,
};
use crate::book::{BookError, Chapter, ChapterId, SharedBook};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Result of refining one chapter.
#[derive(Debug, Clone)]
pub struct RefineOutcome {
    /// The chapter as it stands afterwards (unchanged if the call failed)
    pub chapter: Chapter,
    /// Whether the backend call succeeded
    pub refined: bool,
}

/// Computes and caches a chapter's summaries via the incremental endpoint.
#[derive(Clone)]
pub struct Refiner {
    client: Arc<dyn StoryboardClient>,
    notices: Option<broadcast::Sender<Notice>>,
}

impl Refiner {
    pub fn new(client: Arc<dyn StoryboardClient>) -> Self {
        Self {
            client,
            notices: None,
        }
    }

    pub fn with_notices(mut self, notices: broadcast::Sender<Notice>) -> Self {
        self.notices = Some(notices);
        self
    }

    /// Refine one chapter using the cached summaries of every chapter before it.
    ///
    /// A failed backend call is reported as a notice and yields the chapter's
    /// prior state; only a missing chapter is an error.
    pub async fn refine(
        &self,
        book: &SharedBook,
        id: ChapterId,
    ) -> Result<RefineOutcome, BookError> {
        let (request, prior) = {
            let book = book.read().await;
            let index = book.index_of(&id)?;
            let chapter = book.chapters()[index].clone();
            let request = RefineRequest {
                chapter_number: index,
                title: chapter.title.clone(),
                text: chapter.text.clone(),
                previous_summaries: book.chapters()[..index]
                    .iter()
                    .map(Chapter::summaries)
                    .collect(),
            };
            (request, chapter)
        };

        tracing::debug!(chapter = %id, number = request.chapter_number, "refining chapter");
        match self.client.refine_chapter(&request).await {
            Ok(summaries) => {
                let mut book = book.write().await;
                let chapter = match book.get_mut(&id) {
                    Some(stored) => {
                        stored.apply_summaries(&summaries);
                        stored.clone()
                    }
                    None => {
                        tracing::warn!(
                            chapter = %id,
                            "chapter removed while refining; result not stored"
                        );
                        let mut detached = prior;
                        detached.apply_summaries(&summaries);
                        detached
                    }
                };
                Ok(RefineOutcome {
                    chapter,
                    refined: true,
                })
            }
            Err(e) => {
                notify(
                    self.notices.as_ref(),
                    NoticeLevel::Error,
                    format!("Failed to refine chapter {}: {}", request.chapter_number + 1, e),
                );
                Ok(RefineOutcome {
                    chapter: prior,
                    refined: false,
                })
            }
        }
    }
}

/// The single logic-inspection request a sequence ends with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicRequest {
    pub chapter: ChapterId,
    /// Character summaries of every earlier chapter, concatenated in order
    pub character_summary: String,
    /// Location summaries of every earlier chapter, concatenated in order
    pub location_summary: String,
    /// Raw text of the target chapter
    pub text: String,
}

impl LogicRequest {
    pub fn to_frame(&self) -> OutboundFrame {
        OutboundFrame::Logic {
            character_summary: self.character_summary.clone(),
            location_summary: self.location_summary.clone(),
            text: self.text.clone(),
            chapter: Some(self.chapter),
        }
    }
}

/// What a sequence did on its way to the logic request.
#[derive(Debug, Clone)]
pub struct SequenceReport {
    pub request: LogicRequest,
    /// Chapters refined successfully, in call order
    pub refined: Vec<ChapterId>,
    /// Chapters whose refinement failed, in call order
    pub failed: Vec<ChapterId>,
}

/// Orders refinements and issues the logic inspection.
pub struct IncrementalSequencer {
    refiner: Refiner,
    transport: Arc<dyn InspectionTransport>,
    blocked: BlockedFlag,
}

impl IncrementalSequencer {
    pub fn new(
        refiner: Refiner,
        transport: Arc<dyn InspectionTransport>,
        blocked: BlockedFlag,
    ) -> Self {
        Self {
            refiner,
            transport,
            blocked,
        }
    }

    /// Refine what is missing and build the logic request for `target`,
    /// without sending anything.
    pub async fn prepare(
        &self,
        book: &SharedBook,
        target: ChapterId,
    ) -> Result<SequenceReport, BookError> {
        let earlier: Vec<ChapterId> = {
            let book = book.read().await;
            let index = book.index_of(&target)?;
            book.chapters()[..index].iter().map(|c| c.id).collect()
        };

        let mut refined = Vec::new();
        let mut failed = Vec::new();
        let mut character_summary = String::new();
        let mut location_summary = String::new();

        for id in earlier {
            let cached = {
                let book = book.read().await;
                book.get(&id).cloned()
            };
            let Some(cached) = cached else {
                tracing::warn!(chapter = %id, "chapter removed during sequence; skipped");
                continue;
            };

            let chapter = if cached.needs_refinement() {
                let outcome = self.refiner.refine(book, id).await?;
                if outcome.refined {
                    refined.push(id);
                } else {
                    failed.push(id);
                }
                outcome.chapter
            } else {
                cached
            };

            character_summary.push_str(&chapter.character_summary);
            location_summary.push_str(&chapter.location_summary);
        }

        // The target's own summaries are cached for later sequences but do
        // not feed this request's context.
        let needs_own = book.read().await.chapter(&target)?.needs_refinement();
        if needs_own {
            let outcome = self.refiner.refine(book, target).await?;
            if outcome.refined {
                refined.push(target);
            } else {
                failed.push(target);
            }
        }

        let text = book.read().await.chapter(&target)?.text.clone();
        Ok(SequenceReport {
            request: LogicRequest {
                chapter: target,
                character_summary,
                location_summary,
                text,
            },
            refined,
            failed,
        })
    }

    /// Run a full sequence for `target` and send the logic inspection.
    ///
    /// Sets the blocked flag for the whole sequence. On success the flag stays
    /// set until the session sees a terminal frame; on any failure here it is
    /// cleared before returning.
    pub async fn run(
        &self,
        book: &SharedBook,
        target: ChapterId,
    ) -> Result<SequenceReport, AnalysisError> {
        if !self.blocked.try_block() {
            return Err(AnalysisError::Blocked);
        }

        let report = match self.prepare(book, target).await {
            Ok(report) => report,
            Err(e) => {
                self.blocked.release();
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .transport
            .send(InspectionKind::Logic, &report.request.to_frame())
            .await
        {
            self.blocked.release();
            return Err(e.into());
        }

        tracing::info!(
            chapter = %target,
            refined = report.refined.len(),
            failed = report.failed.len(),
            "logic inspection sent"
        );
        Ok(report)
    }
}
