//! Per-chapter comment map
//!
//! One string namespace holds three key shapes per fingerprint:
//! `<fp>` (comment), `<fp>_suggestion` (replacement text, empty once
//! applied) and `<fp>_subcomments` (serialized discussion thread).

use crate::fingerprint::{Fingerprint, SUBCOMMENTS_SUFFIX, SUGGESTION_SUFFIX};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Separator between serialized subcomment records.
pub const RECORD_SEPARATOR: &str = "|||";

/// Separator between the id and text of one record.
pub const FIELD_SEPARATOR: char = ':';

const ESCAPE: char = '\\';

/// One follow-up entry in a comment's discussion thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subcomment {
    pub id: String,
    pub text: String,
}

impl Subcomment {
    /// Create an entry with a fresh id.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
        }
    }

    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

fn escape_field(field: &str, out: &mut String) {
    for c in field.chars() {
        if c == ESCAPE || c == FIELD_SEPARATOR || c == '|' {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

/// Serialize a thread as `id:text` records joined by `|||`.
///
/// Backslash, `:` and `|` inside either field are escaped with a backslash,
/// so separators in the text survive a round trip through
/// [`decode_subcomments`]. Entries with an empty id or empty text are not
/// representable: they encode, but the decoder drops them.
pub fn encode_subcomments(entries: &[Subcomment]) -> String {
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            out.push_str(RECORD_SEPARATOR);
        }
        escape_field(&entry.id, &mut out);
        out.push(FIELD_SEPARATOR);
        escape_field(&entry.text, &mut out);
    }
    out
}

fn push_char(id: &mut String, text: &mut Option<String>, c: char) {
    match text {
        Some(body) => body.push(c),
        None => id.push(c),
    }
}

fn finish_record(id: &mut String, text: &mut Option<String>, out: &mut Vec<Subcomment>) {
    let record_id = std::mem::take(id);
    match text.take() {
        Some(body) if !record_id.is_empty() && !body.is_empty() => {
            out.push(Subcomment {
                id: record_id,
                text: body,
            });
        }
        body => {
            tracing::warn!(
                id = %record_id,
                has_text = body.is_some(),
                "dropping malformed subcomment record"
            );
        }
    }
}

/// Parse a serialized thread back into ordered entries.
///
/// Unescaped `|||` ends a record, the first unescaped `:` splits id from
/// text. Records missing either field are dropped with a warning. Strings
/// written before escaping existed decode the same way as long as they hold
/// no backslashes.
pub fn decode_subcomments(serialized: &str) -> Vec<Subcomment> {
    let mut out = Vec::new();
    if serialized.is_empty() {
        return out;
    }

    let chars: Vec<char> = serialized.chars().collect();
    let mut id = String::new();
    let mut text: Option<String> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == ESCAPE {
            if let Some(&next) = chars.get(i + 1) {
                push_char(&mut id, &mut text, next);
            }
            i += 2;
            continue;
        }
        if c == '|' && chars.get(i + 1) == Some(&'|') && chars.get(i + 2) == Some(&'|') {
            finish_record(&mut id, &mut text, &mut out);
            i += 3;
            continue;
        }
        if c == FIELD_SEPARATOR && text.is_none() {
            text = Some(String::new());
        } else {
            push_char(&mut id, &mut text, c);
        }
        i += 1;
    }
    finish_record(&mut id, &mut text, &mut out);
    out
}

/// Comment map attached to a chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentStore {
    entries: BTreeMap<String, String>,
}

impl CommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn comment(&self, fp: &Fingerprint) -> Option<&str> {
        self.entries.get(fp.as_str()).map(String::as_str)
    }

    pub fn set_comment(&mut self, fp: &Fingerprint, comment: impl Into<String>) {
        self.entries.insert(fp.as_str().to_string(), comment.into());
    }

    /// The pending suggestion, if one is stored and not yet applied.
    pub fn suggestion(&self, fp: &Fingerprint) -> Option<&str> {
        self.entries
            .get(&fp.suggestion_key())
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn set_suggestion(&mut self, fp: &Fingerprint, suggestion: impl Into<String>) {
        self.entries.insert(fp.suggestion_key(), suggestion.into());
    }

    /// Mark the suggestion as consumed. The slot stays present but empty.
    pub fn clear_suggestion(&mut self, fp: &Fingerprint) {
        self.entries.insert(fp.suggestion_key(), String::new());
    }

    pub fn subcomments(&self, fp: &Fingerprint) -> Vec<Subcomment> {
        self.entries
            .get(&fp.subcomments_key())
            .map(|s| decode_subcomments(s))
            .unwrap_or_default()
    }

    pub fn set_subcomments(&mut self, fp: &Fingerprint, entries: &[Subcomment]) {
        self.entries
            .insert(fp.subcomments_key(), encode_subcomments(entries));
    }

    /// Append one entry to the thread and return the thread as stored.
    pub fn push_subcomment(&mut self, fp: &Fingerprint, entry: Subcomment) -> Vec<Subcomment> {
        let mut thread = self.subcomments(fp);
        thread.push(entry);
        self.set_subcomments(fp, &thread);
        thread
    }

    /// Drop all three entries for a fingerprint. Returns whether a comment existed.
    pub fn remove(&mut self, fp: &Fingerprint) -> bool {
        self.entries.remove(&fp.suggestion_key());
        self.entries.remove(&fp.subcomments_key());
        self.entries.remove(fp.as_str()).is_some()
    }

    /// Fingerprints that have a base comment entry.
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.entries
            .keys()
            .filter(|k| !k.ends_with(SUGGESTION_SUFFIX) && !k.ends_with(SUBCOMMENTS_SUFFIX))
            .filter_map(|k| Fingerprint::parse(k))
            .collect()
    }

    /// Raw key/value view, as handed to the export endpoint.
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
