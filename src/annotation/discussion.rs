//! Comment discussion threads
//!
//! A reader's follow-up is appended to the thread at once, then the whole
//! thread goes to the discussion endpoint and a non-empty reply is appended
//! too. Identical follow-ups issued while the first is still in flight are
//! dropped. The pending set lives in memory only and is best-effort. Blank
//! follow-ups are refused since the thread encoding cannot hold them.

use crate::backend::{BackendError, DiscussionRequest, StoryboardClient};
use crate::book::{BookError, ChapterId, SharedBook, Subcomment};
use crate::fingerprint::Fingerprint;
use dashmap::DashSet;
use std::sync::Arc;
use thiserror::Error;

/// Errors from discussion handling
#[derive(Debug, Error)]
pub enum DiscussionError {
    #[error("follow-up text is blank")]
    BlankFollowUp,

    #[error(transparent)]
    Book(#[from] BookError),

    #[error("discussion request failed: {0}")]
    Backend(#[from] BackendError),
}

/// What happened to one `add_subcomment` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscussionOutcome {
    /// The same follow-up was already in flight; nothing was sent
    Duplicate,
    /// The backend replied and the reply was appended
    Replied(Subcomment),
    /// The reply was empty or repeated the last entry
    NoReply,
}

/// Comment and follow-up text of one in-flight request.
type PendingKey = (Fingerprint, String);

/// Removes a pending key when the request settles, whatever the outcome.
struct PendingGuard<'a> {
    pending: &'a DashSet<PendingKey>,
    key: PendingKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.key);
    }
}

/// Sends comment threads to the backend and records replies.
pub struct DiscussionCoordinator {
    client: Arc<dyn StoryboardClient>,
    pending: DashSet<PendingKey>,
}

impl DiscussionCoordinator {
    pub fn new(client: Arc<dyn StoryboardClient>) -> Self {
        Self {
            client,
            pending: DashSet::new(),
        }
    }

    /// Whether a follow-up with this text is in flight for the comment.
    pub fn is_pending(&self, fingerprint: &Fingerprint, text: &str) -> bool {
        self.pending.contains(&(fingerprint.clone(), text.to_string()))
    }

    /// Append `text` to the thread of `fingerprint` and ask for a reply.
    ///
    /// The reader's entry stays in the thread even if the request fails.
    /// Blank text is refused before anything is recorded or sent.
    pub async fn add_subcomment(
        &self,
        book: &SharedBook,
        chapter: ChapterId,
        fingerprint: &Fingerprint,
        text: &str,
    ) -> Result<DiscussionOutcome, DiscussionError> {
        if text.trim().is_empty() {
            return Err(DiscussionError::BlankFollowUp);
        }
        let key = (fingerprint.clone(), text.to_string());
        if !self.pending.insert(key.clone()) {
            tracing::debug!(%fingerprint, "identical follow-up already in flight; dropped");
            return Ok(DiscussionOutcome::Duplicate);
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            key,
        };

        let request = {
            let mut book = book.write().await;
            let chapter = book.chapter_mut(&chapter)?;
            let thread = chapter
                .comments
                .push_subcomment(fingerprint, Subcomment::new(text));
            let original = chapter
                .comments
                .comment(fingerprint)
                .unwrap_or_default()
                .to_string();
            DiscussionRequest {
                comments: std::iter::once(original)
                    .chain(thread.into_iter().map(|s| s.text))
                    .collect(),
                storyboard: format!(
                    "{}\n{}",
                    chapter.character_summary, chapter.location_summary
                ),
            }
        };

        let reply = self.client.discuss(&request).await?;
        if reply.trim().is_empty() {
            return Ok(DiscussionOutcome::NoReply);
        }

        let mut book = book.write().await;
        let Some(chapter) = book.get_mut(&chapter) else {
            tracing::warn!(
                %chapter,
                %fingerprint,
                "chapter removed before discussion reply arrived"
            );
            return Ok(DiscussionOutcome::NoReply);
        };
        let thread = chapter.comments.subcomments(fingerprint);
        if thread.last().map(|s| s.text.as_str()) == Some(reply.as_str()) {
            tracing::debug!(%fingerprint, "reply repeats the last entry; not appended");
            return Ok(DiscussionOutcome::NoReply);
        }

        let entry = Subcomment::new(reply);
        chapter.comments.push_subcomment(fingerprint, entry.clone());
        Ok(DiscussionOutcome::Replied(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, MockBackend};
    use crate::book::Book;
    use tokio::sync::RwLock;

    fn book_with_comment() -> (SharedBook, ChapterId, Fingerprint) {
        let mut book = Book::new();
        let id = book.add_chapter("One", "text");
        let fp = Fingerprint::of("text");
        book.chapter_mut(&id).unwrap().comments.set_comment(&fp, "Too short.");
        (Arc::new(RwLock::new(book)), id, fp)
    }

    #[tokio::test]
    async fn reply_is_appended_after_reader_entry() {
        let (book, id, fp) = book_with_comment();
        let backend =
            Arc::new(MockBackend::available().with_discussion_reply("Add a second clause."));
        let coordinator = DiscussionCoordinator::new(backend.clone());

        let outcome = coordinator.add_subcomment(&book, id, &fp, "How?").await.unwrap();
        assert!(matches!(outcome, DiscussionOutcome::Replied(_)));

        let thread = book.read().await.chapter(&id).unwrap().comments.subcomments(&fp);
        let texts: Vec<_> = thread.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["How?", "Add a second clause."]);
        assert_eq!(
            backend.calls(),
            vec![BackendCall::Discuss {
                comments: vec!["Too short.".to_string(), "How?".to_string()]
            }]
        );
        assert!(!coordinator.is_pending(&fp, "How?"));
    }

    #[tokio::test]
    async fn echoed_reply_is_not_appended() {
        let (book, id, fp) = book_with_comment();
        let backend = Arc::new(MockBackend::available().with_discussion_reply("Same words"));
        let coordinator = DiscussionCoordinator::new(backend);

        let outcome = coordinator.add_subcomment(&book, id, &fp, "Same words").await.unwrap();
        assert_eq!(outcome, DiscussionOutcome::NoReply);
        assert_eq!(book.read().await.chapter(&id).unwrap().comments.subcomments(&fp).len(), 1);
    }

    #[tokio::test]
    async fn empty_reply_is_not_appended() {
        let (book, id, fp) = book_with_comment();
        let coordinator = DiscussionCoordinator::new(Arc::new(MockBackend::available()));

        let outcome = coordinator.add_subcomment(&book, id, &fp, "Thoughts?").await.unwrap();
        assert_eq!(outcome, DiscussionOutcome::NoReply);
    }

    #[tokio::test]
    async fn failure_keeps_reader_entry_and_clears_pending() {
        let (book, id, fp) = book_with_comment();
        let coordinator = DiscussionCoordinator::new(Arc::new(MockBackend::unavailable()));

        let err = coordinator.add_subcomment(&book, id, &fp, "Hello?").await.unwrap_err();
        assert!(matches!(err, DiscussionError::Backend(_)));
        assert!(!coordinator.is_pending(&fp, "Hello?"));
        assert_eq!(book.read().await.chapter(&id).unwrap().comments.subcomments(&fp).len(), 1);
    }

    #[tokio::test]
    async fn unknown_chapter_is_an_error() {
        let (book, _, fp) = book_with_comment();
        let coordinator = DiscussionCoordinator::new(Arc::new(MockBackend::available()));

        let err = coordinator
            .add_subcomment(&book, ChapterId::new(), &fp, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, DiscussionError::Book(BookError::ChapterNotFound(_))));
        assert!(!coordinator.is_pending(&fp, "x"));
    }

    #[tokio::test]
    async fn blank_follow_up_is_refused_without_a_request() {
        let (book, id, fp) = book_with_comment();
        let backend = Arc::new(MockBackend::available().with_discussion_reply("Anything"));
        let coordinator = DiscussionCoordinator::new(backend.clone());

        for blank in ["", "   \n"] {
            let err = coordinator.add_subcomment(&book, id, &fp, blank).await.unwrap_err();
            assert!(matches!(err, DiscussionError::BlankFollowUp));
        }
        assert!(backend.calls().is_empty());
        assert!(book.read().await.chapter(&id).unwrap().comments.subcomments(&fp).is_empty());
    }

    #[tokio::test]
    async fn pending_follow_ups_are_keyed_by_full_text() {
        let (_, _, fp) = book_with_comment();
        let coordinator = DiscussionCoordinator::new(Arc::new(MockBackend::available()));
        let key = (fp.clone(), "Why this word?".to_string());
        coordinator.pending.insert(key.clone());
        let _guard = PendingGuard {
            pending: &coordinator.pending,
            key,
        };

        assert!(coordinator.is_pending(&fp, "Why this word?"));
        assert!(!coordinator.is_pending(&fp, "Why this word"));
        assert!(!coordinator.is_pending(&Fingerprint::of("other"), "Why this word?"));
    }
}
