//! Analysis orchestration
//!
//! The sequencer prepares cross-chapter context, the session dispatches
//! inspections and folds their replies back into the book, and the blocked
//! flag keeps at most one analysis outstanding.

mod blocked;
pub mod sequencer;
pub mod session;

pub use blocked::BlockedFlag;
pub use sequencer::{IncrementalSequencer, LogicRequest, RefineOutcome, Refiner, SequenceReport};
pub use session::{AnalysisSession, InboundEffect};

use crate::annotation::{DiscussionError, ReconcileError};
use crate::backend::BackendError;
use crate::book::BookError;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors from analysis operations
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("another analysis is still running")]
    Blocked,

    #[error(transparent)]
    Book(#[from] BookError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Discussion(#[from] DiscussionError),
}

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A one-shot message for the reader (the CLI prints these).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Log a notice and publish it to subscribers, if any.
pub(crate) fn notify(
    notices: Option<&broadcast::Sender<Notice>>,
    level: NoticeLevel,
    message: impl Into<String>,
) {
    let message = message.into();
    match level {
        NoticeLevel::Error => tracing::warn!(notice = %message),
        NoticeLevel::Info | NoticeLevel::Success => tracing::info!(notice = %message),
    }
    if let Some(tx) = notices {
        // No subscribers is fine.
        let _ = tx.send(Notice { level, message });
    }
}
