//! Annotation reconciler: anchors backend critique into chapter text
//!
//! An inbound `(original_text, comment, suggestion?)` triple becomes a marker
//! around the first occurrence of `original_text` plus entries in the
//! chapter's comment map, joined by the fingerprint of `original_text`.

use super::marker::{find_marker, find_markers, find_unmarked, render_marker};
use crate::book::Chapter;
use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One critique item produced by an inspection channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Verbatim span of chapter text the comment is about
    pub original_text: String,
    pub comment: String,
    /// Replacement text for the span, if the inspector proposed one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Annotation {
    pub fn new(original_text: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            original_text: original_text.into(),
            comment: comment.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Result of anchoring one annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationOutcome {
    /// Text after the marker was inserted (unchanged if not anchored)
    pub text: String,
    pub fingerprint: Fingerprint,
    /// Whether `original_text` was found and is now wrapped by a marker
    pub anchored: bool,
}

/// Errors from suggestion handling
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("no pending suggestion for comment {0}")]
    NoSuggestion(Fingerprint),

    #[error("selection for comment {fingerprint} not found in chapter text: {selection:?}")]
    SelectionNotFound {
        fingerprint: Fingerprint,
        selection: String,
    },
}

/// Applies annotations and suggestions to chapters.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    /// Copy the comment into the marker's `comment` attribute
    inline_comments: bool,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inline_comments(mut self, inline: bool) -> Self {
        self.inline_comments = inline;
        self
    }

    /// Wrap the first occurrence of `annotation.original_text` in a marker.
    ///
    /// If the text is absent the input comes back unchanged with
    /// `anchored = false`. A span already wrapped by a marker with the same
    /// fingerprint is left as is.
    pub fn annotate(&self, text: &str, annotation: &Annotation) -> AnnotationOutcome {
        let fingerprint = Fingerprint::of(&annotation.original_text);

        if find_marker(text, &fingerprint).is_some() {
            return AnnotationOutcome {
                text: text.to_string(),
                fingerprint,
                anchored: true,
            };
        }

        match find_unmarked(text, &annotation.original_text) {
            Some(start) => {
                let end = start + annotation.original_text.len();
                let inline = self.inline_comments.then_some(annotation.comment.as_str());
                let marker = render_marker(&fingerprint, &text[start..end], inline);
                let mut annotated = String::with_capacity(text.len() + marker.len());
                annotated.push_str(&text[..start]);
                annotated.push_str(&marker);
                annotated.push_str(&text[end..]);
                AnnotationOutcome {
                    text: annotated,
                    fingerprint,
                    anchored: true,
                }
            }
            None => AnnotationOutcome {
                text: text.to_string(),
                fingerprint,
                anchored: false,
            },
        }
    }

    /// Anchor an annotation in a chapter and record it in the comment map.
    ///
    /// The comment is recorded even when the span could not be found; such
    /// entries have no marker pointing at them.
    pub fn annotate_chapter(
        &self,
        chapter: &mut Chapter,
        annotation: &Annotation,
    ) -> AnnotationOutcome {
        let outcome = self.annotate(&chapter.text, annotation);
        if !outcome.anchored {
            tracing::warn!(
                chapter = %chapter.id,
                fingerprint = %outcome.fingerprint,
                "annotation target not found in chapter text; comment recorded without marker"
            );
        }

        chapter.text = outcome.text.clone();
        chapter
            .comments
            .set_comment(&outcome.fingerprint, annotation.comment.clone());
        if let Some(suggestion) = &annotation.suggestion {
            chapter
                .comments
                .set_suggestion(&outcome.fingerprint, suggestion.clone());
        }
        outcome
    }

    /// Accept the pending suggestion for `fingerprint`.
    ///
    /// `selection` is the span the reader last picked; `None` uses the text
    /// wrapped by the marker. Inside that span the stored comment text is
    /// substituted with the suggestion; when the comment does not occur in the
    /// span the whole span is replaced by the suggestion. Afterwards the
    /// comment slot holds the suggestion and the suggestion slot is empty.
    ///
    /// Markers nested inside the replaced span that do not survive the
    /// replacement lose their comment entries.
    pub fn apply_suggestion(
        &self,
        chapter: &mut Chapter,
        fingerprint: &Fingerprint,
        selection: Option<&str>,
    ) -> Result<(), ReconcileError> {
        let suggestion = chapter
            .comments
            .suggestion(fingerprint)
            .ok_or_else(|| ReconcileError::NoSuggestion(fingerprint.clone()))?
            .to_string();
        let comment = chapter
            .comments
            .comment(fingerprint)
            .unwrap_or_default()
            .to_string();

        let marker = find_marker(&chapter.text, fingerprint);
        let selection = match (selection, &marker) {
            (Some(s), _) => s.to_string(),
            (None, Some(m)) => m.inner_text(&chapter.text).to_string(),
            (None, None) => String::new(),
        };
        let not_found = || ReconcileError::SelectionNotFound {
            fingerprint: fingerprint.clone(),
            selection: selection.clone(),
        };
        if selection.is_empty() {
            return Err(not_found());
        }

        // Prefer the occurrence inside this fingerprint's marker.
        let start = marker
            .as_ref()
            .and_then(|m| {
                m.inner_text(&chapter.text)
                    .find(selection.as_str())
                    .map(|offset| m.inner.start + offset)
            })
            .or_else(|| find_unmarked(&chapter.text, &selection))
            .ok_or_else(not_found)?;

        let end = start + selection.len();
        let replacement = if !comment.is_empty() && selection.contains(comment.as_str()) {
            selection.replacen(comment.as_str(), &suggestion, 1)
        } else {
            suggestion.clone()
        };
        let covered: Vec<Fingerprint> = find_markers(&chapter.text)
            .into_iter()
            .filter(|m| &m.fingerprint != fingerprint)
            .filter(|m| start <= m.outer.start && m.outer.end <= end)
            .map(|m| m.fingerprint)
            .collect();
        chapter.text.replace_range(start..end, &replacement);

        for nested in covered {
            if find_marker(&chapter.text, &nested).is_some() {
                continue;
            }
            if chapter.comments.remove(&nested) {
                tracing::debug!(
                    chapter = %chapter.id,
                    fingerprint = %nested,
                    "nested comment replaced along with its span"
                );
            }
        }

        chapter.comments.set_comment(fingerprint, suggestion);
        chapter.comments.clear_suggestion(fingerprint);
        tracing::debug!(chapter = %chapter.id, %fingerprint, "suggestion applied");
        Ok(())
    }

    /// Unwrap the marker for `fingerprint` and forget its comment entries.
    ///
    /// Returns whether anything changed.
    pub fn remove_annotation(&self, chapter: &mut Chapter, fingerprint: &Fingerprint) -> bool {
        let mut changed = false;
        if let Some(marker) = find_marker(&chapter.text, fingerprint) {
            let inner = marker.inner_text(&chapter.text).to_string();
            chapter.text.replace_range(marker.outer, &inner);
            changed = true;
        }
        changed |= chapter.comments.remove(fingerprint);
        changed
    }
}
