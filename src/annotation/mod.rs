//! Annotation layer
//!
//! Anchors critique comments into chapter text with fingerprint-keyed
//! markers, applies suggestions and runs comment discussions.

pub mod discussion;
pub mod marker;
mod reconciler;

pub use discussion::{DiscussionCoordinator, DiscussionError, DiscussionOutcome};
pub use marker::{find_marker, find_markers, render_marker, strip_markers, MarkerSpan};
pub use reconciler::{Annotation, AnnotationOutcome, ReconcileError, Reconciler};
