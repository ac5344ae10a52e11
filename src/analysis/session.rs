//! Analysis session: dispatches inspections and routes their replies
//!
//! Every outbound inspection is tied to a chapter id, recorded per channel
//! at dispatch time. Inbound annotation frames are routed to the chapter the
//! frame names, or else to the chapter recorded for its channel; the
//! "current" chapter plays no part, so switching chapters while a reply is
//! pending cannot misattribute it.

use super::sequencer::{IncrementalSequencer, Refiner, SequenceReport};
use super::{notify, AnalysisError, BlockedFlag, Notice, NoticeLevel};
use crate::annotation::{AnnotationOutcome, DiscussionCoordinator, DiscussionOutcome, Reconciler};
use crate::backend::{
    ExportRequest, InboundFrame, InspectionKind, InspectionStatus, InspectionTransport,
    OutboundFrame, StoryboardClient, StoryboardRequest,
};
use crate::book::{ChapterId, ChapterSummaries, SharedBook};
use crate::fingerprint::Fingerprint;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const NOTICE_CAPACITY: usize = 64;

/// What handling one inbound frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEffect {
    /// An annotation was anchored (or recorded) on a chapter
    Annotated {
        chapter: ChapterId,
        outcome: AnnotationOutcome,
    },
    /// A terminal status ended the inspection on a channel
    Finished {
        kind: InspectionKind,
        chapter: Option<ChapterId>,
    },
    /// A non-terminal status
    Status(InspectionStatus),
    /// The backend reported an error
    Failed { kind: InspectionKind, message: String },
    /// Nothing to do (unrecognised frame or no target chapter)
    Ignored,
}

/// Ties a book to a backend and keeps inspections one at a time.
pub struct AnalysisSession {
    book: SharedBook,
    client: Arc<dyn StoryboardClient>,
    transport: Arc<dyn InspectionTransport>,
    blocked: BlockedFlag,
    in_flight: DashMap<InspectionKind, ChapterId>,
    reconciler: Reconciler,
    sequencer: IncrementalSequencer,
    discussion: DiscussionCoordinator,
    notices: broadcast::Sender<Notice>,
}

impl AnalysisSession {
    pub fn new(
        book: SharedBook,
        client: Arc<dyn StoryboardClient>,
        transport: Arc<dyn InspectionTransport>,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let blocked = BlockedFlag::new();
        let refiner = Refiner::new(client.clone()).with_notices(notices.clone());
        Self {
            sequencer: IncrementalSequencer::new(refiner, transport.clone(), blocked.clone()),
            discussion: DiscussionCoordinator::new(client.clone()),
            book,
            client,
            transport,
            blocked,
            in_flight: DashMap::new(),
            reconciler: Reconciler::new(),
            notices,
        }
    }

    pub fn with_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn book(&self) -> &SharedBook {
        &self.book
    }

    /// Receive notices published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.is_blocked()
    }

    /// Chapter an inspection on `kind` is outstanding for.
    pub fn in_flight(&self, kind: InspectionKind) -> Option<ChapterId> {
        self.in_flight.get(&kind).map(|entry| *entry.value())
    }

    fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        notify(Some(&self.notices), level, message);
    }

    /// Send a chapter to the style channel.
    pub async fn inspect_style(&self, chapter: ChapterId) -> Result<(), AnalysisError> {
        self.dispatch_text(InspectionKind::Style, chapter).await
    }

    /// Send a chapter to the grammar channel.
    pub async fn inspect_grammar(&self, chapter: ChapterId) -> Result<(), AnalysisError> {
        self.dispatch_text(InspectionKind::Grammar, chapter).await
    }

    async fn dispatch_text(
        &self,
        kind: InspectionKind,
        chapter: ChapterId,
    ) -> Result<(), AnalysisError> {
        if !self.blocked.try_block() {
            return Err(AnalysisError::Blocked);
        }

        let text = match self.book.read().await.chapter(&chapter) {
            Ok(c) => c.text.clone(),
            Err(e) => {
                self.blocked.release();
                return Err(e.into());
            }
        };

        self.in_flight.insert(kind, chapter);
        let frame = OutboundFrame::Text {
            text,
            chapter: Some(chapter),
        };
        if let Err(e) = self.transport.send(kind, &frame).await {
            self.in_flight.remove(&kind);
            self.blocked.release();
            self.notify(NoticeLevel::Error, format!("Failed to start {} inspection: {}", kind, e));
            return Err(e.into());
        }
        tracing::info!(%chapter, channel = %kind, "inspection sent");
        Ok(())
    }

    /// Refine earlier chapters as needed and send the logic inspection.
    pub async fn inspect_logic(&self, chapter: ChapterId) -> Result<SequenceReport, AnalysisError> {
        if self.blocked.is_blocked() {
            return Err(AnalysisError::Blocked);
        }
        self.in_flight.insert(InspectionKind::Logic, chapter);
        match self.sequencer.run(&self.book, chapter).await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.in_flight.remove(&InspectionKind::Logic);
                if !matches!(e, AnalysisError::Blocked) {
                    self.notify(NoticeLevel::Error, format!("Logic inspection failed: {}", e));
                }
                Err(e)
            }
        }
    }

    /// Replace the style prompt and push it to the style channel.
    pub async fn update_style_prompt(
        &self,
        prompt: impl Into<String>,
    ) -> Result<(), AnalysisError> {
        let prompt = prompt.into();
        self.book.write().await.style_prompt = prompt.clone();
        self.transport
            .send(
                InspectionKind::Style,
                &OutboundFrame::StylePrompt {
                    style_prompt: prompt,
                },
            )
            .await?;
        Ok(())
    }

    /// Full storyboard for one chapter, stored on the chapter.
    pub async fn storyboard_chapter(
        &self,
        chapter: ChapterId,
    ) -> Result<ChapterSummaries, AnalysisError> {
        if !self.blocked.try_block() {
            return Err(AnalysisError::Blocked);
        }
        let result = self.storyboard_inner(chapter).await;
        self.blocked.release();
        match &result {
            Ok(_) => self.notify(NoticeLevel::Success, "Chapter analyzed"),
            Err(e) => self.notify(NoticeLevel::Error, format!("Chapter analysis failed: {}", e)),
        }
        result
    }

    async fn storyboard_inner(
        &self,
        chapter: ChapterId,
    ) -> Result<ChapterSummaries, AnalysisError> {
        let request = {
            let book = self.book.read().await;
            let index = book.index_of(&chapter)?;
            let c = &book.chapters()[index];
            StoryboardRequest {
                chapter_number: index,
                title: c.title.clone(),
                text: c.text.clone(),
            }
        };
        let summaries = self.client.storyboard_chapter(&request).await?;
        self.book
            .write()
            .await
            .chapter_mut(&chapter)?
            .apply_summaries(&summaries);
        Ok(summaries)
    }

    /// Accept a pending suggestion on a chapter.
    pub async fn apply_suggestion(
        &self,
        chapter: ChapterId,
        fingerprint: &Fingerprint,
        selection: Option<&str>,
    ) -> Result<(), AnalysisError> {
        let mut book = self.book.write().await;
        let target = book.chapter_mut(&chapter)?;
        self.reconciler.apply_suggestion(target, fingerprint, selection)?;
        drop(book);
        self.notify(NoticeLevel::Success, "Suggestion applied");
        Ok(())
    }

    /// Drop a comment and unwrap its marker.
    pub async fn remove_annotation(
        &self,
        chapter: ChapterId,
        fingerprint: &Fingerprint,
    ) -> Result<bool, AnalysisError> {
        let mut book = self.book.write().await;
        let target = book.chapter_mut(&chapter)?;
        Ok(self.reconciler.remove_annotation(target, fingerprint))
    }

    /// Add a follow-up to a comment thread and wait for the reply.
    pub async fn add_subcomment(
        &self,
        chapter: ChapterId,
        fingerprint: &Fingerprint,
        text: &str,
    ) -> Result<DiscussionOutcome, AnalysisError> {
        self.discussion
            .add_subcomment(&self.book, chapter, fingerprint, text)
            .await
            .map_err(|e| {
                self.notify(NoticeLevel::Error, format!("Failed to get a reply: {}", e));
                e.into()
            })
    }

    /// Export the whole book with comments as a DOCX document.
    pub async fn export_docx(
        &self,
        filename: impl Into<String>,
        author_name: impl Into<String>,
    ) -> Result<Vec<u8>, AnalysisError> {
        let request = {
            let book = self.book.read().await;
            ExportRequest {
                markdown_content: book.to_markdown(),
                filename: filename.into(),
                author_name: author_name.into(),
                comments: book.merged_comments(),
            }
        };
        match self.client.export_docx(&request).await {
            Ok(bytes) => {
                self.notify(NoticeLevel::Success, "Exported to DOCX");
                Ok(bytes)
            }
            Err(e) => {
                self.notify(NoticeLevel::Error, format!("Failed to export to DOCX: {}", e));
                Err(e.into())
            }
        }
    }

    /// End the inspection on `kind`; clear the flag once nothing is outstanding.
    ///
    /// A frame for a channel with nothing in flight leaves the flag alone, so
    /// it cannot unblock a storyboard run.
    fn finish(&self, kind: InspectionKind) -> Option<ChapterId> {
        let chapter = self.in_flight.remove(&kind).map(|(_, id)| id);
        if chapter.is_some() && self.in_flight.is_empty() {
            self.blocked.release();
        }
        chapter
    }

    /// Fold one frame received on `kind` into the book.
    pub async fn handle_inbound(&self, kind: InspectionKind, frame: InboundFrame) -> InboundEffect {
        match frame {
            InboundFrame::Annotation {
                annotation,
                chapter,
            } => {
                let Some(target) = chapter.or_else(|| self.in_flight(kind)) else {
                    tracing::warn!(
                        channel = %kind,
                        "annotation with no outstanding inspection; ignored"
                    );
                    return InboundEffect::Ignored;
                };
                let mut book = self.book.write().await;
                let Some(target_chapter) = book.get_mut(&target) else {
                    tracing::warn!(
                        chapter = %target,
                        channel = %kind,
                        "annotation for removed chapter; ignored"
                    );
                    return InboundEffect::Ignored;
                };
                let outcome = self.reconciler.annotate_chapter(target_chapter, &annotation);
                tracing::debug!(
                    chapter = %target,
                    fingerprint = %outcome.fingerprint,
                    "annotation applied"
                );
                InboundEffect::Annotated {
                    chapter: target,
                    outcome,
                }
            }
            InboundFrame::Status { status, .. } if status.is_terminal() => {
                let chapter = self.finish(kind);
                self.notify(NoticeLevel::Success, format!("{} inspection finished", kind));
                InboundEffect::Finished { kind, chapter }
            }
            InboundFrame::Status { status, .. } => {
                if status == InspectionStatus::StylePromptUpdated {
                    self.notify(NoticeLevel::Info, "Style prompt updated");
                } else {
                    tracing::debug!(channel = %kind, ?status, "unhandled status");
                }
                InboundEffect::Status(status)
            }
            InboundFrame::Error { message, .. } => {
                self.finish(kind);
                self.notify(NoticeLevel::Error, format!("{} inspection error: {}", kind, message));
                InboundEffect::Failed { kind, message }
            }
            InboundFrame::Unrecognized(value) => {
                tracing::debug!(channel = %kind, %value, "unrecognised frame ignored");
                InboundEffect::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Annotation;
    use crate::backend::{MockBackend, MockTransport};
    use crate::book::Book;
    use tokio::sync::RwLock;

    fn session_with(book: Book, transport: Arc<MockTransport>) -> AnalysisSession {
        AnalysisSession::new(
            Arc::new(RwLock::new(book)),
            Arc::new(MockBackend::available()),
            transport,
        )
    }

    #[tokio::test]
    async fn grammar_reply_lands_on_dispatched_chapter_after_switch() {
        let mut book = Book::new();
        let a = book.add_chapter("A", "The cat sat.");
        let b = book.add_chapter("B", "The cat sat.");
        let transport = Arc::new(MockTransport::new());
        let session = session_with(book, transport.clone());

        session.inspect_grammar(a).await.unwrap();
        session.book().write().await.select(&b).unwrap();

        let effect = session
            .handle_inbound(
                InspectionKind::Grammar,
                InboundFrame::Annotation {
                    annotation: Annotation::new("cat", "Which cat?"),
                    chapter: None,
                },
            )
            .await;

        assert!(matches!(effect, InboundEffect::Annotated { chapter, .. } if chapter == a));
        let book = session.book().read().await;
        assert!(book.chapter(&a).unwrap().text.contains("<comment"));
        assert_eq!(book.chapter(&b).unwrap().text, "The cat sat.");
    }

    #[tokio::test]
    async fn explicit_chapter_in_frame_wins() {
        let mut book = Book::new();
        let a = book.add_chapter("A", "alpha");
        let b = book.add_chapter("B", "beta");
        let session = session_with(book, Arc::new(MockTransport::new()));

        session.inspect_style(a).await.unwrap();
        let effect = session
            .handle_inbound(
                InspectionKind::Style,
                InboundFrame::Annotation {
                    annotation: Annotation::new("beta", "Greek?"),
                    chapter: Some(b),
                },
            )
            .await;
        assert!(matches!(effect, InboundEffect::Annotated { chapter, .. } if chapter == b));
    }

    #[tokio::test]
    async fn second_inspection_is_refused_until_done() {
        let mut book = Book::new();
        let a = book.add_chapter("A", "alpha");
        let transport = Arc::new(MockTransport::new());
        let session = session_with(book, transport.clone());

        session.inspect_grammar(a).await.unwrap();
        assert!(session.is_blocked());
        assert!(matches!(session.inspect_style(a).await, Err(AnalysisError::Blocked)));
        assert!(matches!(session.inspect_logic(a).await, Err(AnalysisError::Blocked)));
        assert!(matches!(session.storyboard_chapter(a).await, Err(AnalysisError::Blocked)));
        assert_eq!(session.in_flight(InspectionKind::Grammar), Some(a));

        let effect = session
            .handle_inbound(
                InspectionKind::Grammar,
                InboundFrame::Status {
                    status: InspectionStatus::Done,
                    chapter: None,
                },
            )
            .await;
        assert_eq!(
            effect,
            InboundEffect::Finished {
                kind: InspectionKind::Grammar,
                chapter: Some(a)
            }
        );
        assert!(!session.is_blocked());
        session.inspect_style(a).await.unwrap();
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn error_frame_unblocks_and_notifies() {
        let mut book = Book::new();
        let a = book.add_chapter("A", "alpha");
        let session = session_with(book, Arc::new(MockTransport::new()));
        let mut notices = session.subscribe();

        session.inspect_grammar(a).await.unwrap();
        let effect = session
            .handle_inbound(
                InspectionKind::Grammar,
                InboundFrame::Error {
                    message: "model overloaded".into(),
                    chapter: None,
                },
            )
            .await;

        assert!(matches!(effect, InboundEffect::Failed { .. }));
        assert!(!session.is_blocked());
        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(notice.message.contains("model overloaded"));
    }

    #[tokio::test]
    async fn style_prompt_update_is_not_terminal() {
        let mut book = Book::new();
        let a = book.add_chapter("A", "alpha");
        let transport = Arc::new(MockTransport::new());
        let session = session_with(book, transport.clone());

        session.inspect_style(a).await.unwrap();
        session.update_style_prompt("Terse, noir").await.unwrap();
        let effect = session
            .handle_inbound(
                InspectionKind::Style,
                InboundFrame::Status {
                    status: InspectionStatus::StylePromptUpdated,
                    chapter: None,
                },
            )
            .await;

        assert_eq!(effect, InboundEffect::Status(InspectionStatus::StylePromptUpdated));
        assert!(session.is_blocked());
        assert_eq!(session.book().read().await.style_prompt, "Terse, noir");
        assert_eq!(
            transport.sent()[1].1,
            OutboundFrame::StylePrompt {
                style_prompt: "Terse, noir".into()
            }
        );
    }

    #[tokio::test]
    async fn failed_send_releases_flag() {
        let mut book = Book::new();
        let a = book.add_chapter("A", "alpha");
        let session = session_with(book, Arc::new(MockTransport::disconnected()));

        assert!(session.inspect_grammar(a).await.is_err());
        assert!(!session.is_blocked());
        assert_eq!(session.in_flight(InspectionKind::Grammar), None);
    }

    #[tokio::test]
    async fn annotation_without_target_is_ignored() {
        let mut book = Book::new();
        book.add_chapter("A", "alpha");
        let session = session_with(book, Arc::new(MockTransport::new()));

        let effect = session
            .handle_inbound(
                InspectionKind::Logic,
                InboundFrame::Annotation {
                    annotation: Annotation::new("alpha", "?"),
                    chapter: None,
                },
            )
            .await;
        assert_eq!(effect, InboundEffect::Ignored);
    }

    #[tokio::test]
    async fn storyboard_stores_summaries_and_releases() {
        let mut book = Book::new();
        let a = book.add_chapter("Dawn", "alpha");
        let session = session_with(book, Arc::new(MockTransport::new()));

        let summaries = session.storyboard_chapter(a).await.unwrap();
        assert_eq!(summaries.character_summary, "characters of Dawn\n");
        assert!(!session.is_blocked());
        assert!(!session.book().read().await.chapter(&a).unwrap().needs_refinement());
    }

    #[tokio::test]
    async fn stray_frames_do_not_release_a_storyboard_hold() {
        let mut book = Book::new();
        book.add_chapter("Dawn", "alpha");
        let session = session_with(book, Arc::new(MockTransport::new()));

        // Held the way storyboard_chapter holds it: no channel in flight.
        assert!(session.blocked.try_block());
        session
            .handle_inbound(
                InspectionKind::Logic,
                InboundFrame::Error {
                    message: "connection closed".into(),
                    chapter: None,
                },
            )
            .await;
        let effect = session
            .handle_inbound(InspectionKind::Style, InboundFrame::parse(r#"{"status":"done"}"#))
            .await;

        assert!(matches!(effect, InboundEffect::Finished { chapter: None, .. }));
        assert!(session.is_blocked());
        session.blocked.release();
        assert!(!session.is_blocked());
    }

    #[tokio::test]
    async fn export_sends_markdown_and_comments() {
        let mut book = Book::new();
        book.add_chapter("Dawn", "alpha");
        let backend = Arc::new(MockBackend::available().with_export_bytes(b"PK".to_vec()));
        let session = AnalysisSession::new(
            Arc::new(RwLock::new(book)),
            backend.clone(),
            Arc::new(MockTransport::new()),
        );

        let bytes = session.export_docx("draft", "Author").await.unwrap();
        assert_eq!(bytes, b"PK");
        assert_eq!(
            backend.calls(),
            vec![crate::backend::BackendCall::Export {
                filename: "draft".into()
            }]
        );
    }
}
