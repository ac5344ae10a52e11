//! Inline annotation markers
//!
//! A marker wraps a commented span of chapter text:
//!
//! ```text
//! <comment id="a1b2c3d4">quoted span</comment>
//! <comment id="a1b2c3d4" comment="escaped comment text">quoted span</comment>
//! ```
//!
//! The `id` is the fingerprint of the span as first quoted. Markers written by
//! older clients used an unquoted id; both forms are recognised.

use crate::fingerprint::Fingerprint;
use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

/// Element name used for markers.
pub const MARKER_TAG: &str = "comment";

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<(/?)comment\b([^>]*)>").expect("tag pattern is valid"))
}

fn id_regex() -> &'static Regex {
    static ID: OnceLock<Regex> = OnceLock::new();
    ID.get_or_init(|| {
        Regex::new(r#"^\s+id=["']?([0-9a-f]{8})["']?(?:\s+comment="[^"]*")?\s*$"#)
            .expect("id pattern is valid")
    })
}

/// An opening tag matched with its own closing tag.
struct TagPair {
    /// `None` when the opening tag carries no usable id
    fingerprint: Option<Fingerprint>,
    open: Range<usize>,
    close: Range<usize>,
}

/// Pair marker tags by nesting depth. Stray closing tags and unclosed
/// opening tags are left out.
fn pair_tags(text: &str) -> Vec<TagPair> {
    let mut open: Vec<(Option<Fingerprint>, Range<usize>)> = Vec::new();
    let mut pairs = Vec::new();
    for caps in tag_regex().captures_iter(text) {
        let Some(tag) = caps.get(0) else { continue };
        let closing = caps.get(1).is_some_and(|slash| slash.as_str() == "/");
        if closing {
            if let Some((fingerprint, open_range)) = open.pop() {
                pairs.push(TagPair {
                    fingerprint,
                    open: open_range,
                    close: tag.range(),
                });
            }
        } else {
            let attributes = caps.get(2).map_or("", |m| m.as_str());
            let fingerprint = id_regex()
                .captures(attributes)
                .and_then(|id| Fingerprint::parse(id.get(1)?.as_str()));
            open.push((fingerprint, tag.range()));
        }
    }
    pairs
}

/// Location of one marker inside a text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSpan {
    pub fingerprint: Fingerprint,
    /// Byte range of the whole marker, tags included
    pub outer: Range<usize>,
    /// Byte range of the wrapped text
    pub inner: Range<usize>,
}

impl MarkerSpan {
    pub fn inner_text<'a>(&self, text: &'a str) -> &'a str {
        &text[self.inner.clone()]
    }
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Wrap `inner` in a marker carrying `fingerprint`.
pub fn render_marker(
    fingerprint: &Fingerprint,
    inner: &str,
    inline_comment: Option<&str>,
) -> String {
    match inline_comment {
        Some(comment) => format!(
            "<{tag} id=\"{fingerprint}\" comment=\"{}\">{inner}</{tag}>",
            escape_attribute(comment),
            tag = MARKER_TAG,
        ),
        None => format!("<{tag} id=\"{fingerprint}\">{inner}</{tag}>", tag = MARKER_TAG),
    }
}

/// All markers in document order. An enclosing marker comes before the
/// markers nested inside it.
pub fn find_markers(text: &str) -> Vec<MarkerSpan> {
    let mut markers: Vec<MarkerSpan> = pair_tags(text)
        .into_iter()
        .filter_map(|pair| {
            Some(MarkerSpan {
                fingerprint: pair.fingerprint?,
                outer: pair.open.start..pair.close.end,
                inner: pair.open.end..pair.close.start,
            })
        })
        .collect();
    markers.sort_by_key(|m| m.outer.start);
    markers
}

/// First marker carrying `fingerprint`.
pub fn find_marker(text: &str, fingerprint: &Fingerprint) -> Option<MarkerSpan> {
    find_markers(text)
        .into_iter()
        .find(|m| &m.fingerprint == fingerprint)
}

/// Byte offset of the first occurrence of `needle` that does not overlap a
/// marker tag. Text already wrapped by a marker still counts as an occurrence.
pub fn find_unmarked(text: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let tags: Vec<Range<usize>> = tag_regex().find_iter(text).map(|m| m.range()).collect();
    text.match_indices(needle).map(|(pos, _)| pos).find(|&pos| {
        let end = pos + needle.len();
        !tags.iter().any(|tag| pos < tag.end && tag.start < end)
    })
}

/// Replace every marker with the text it wraps.
pub fn strip_markers(text: &str) -> String {
    let mut tags: Vec<Range<usize>> = pair_tags(text)
        .into_iter()
        .filter(|pair| pair.fingerprint.is_some())
        .flat_map(|pair| [pair.open, pair.close])
        .collect();
    tags.sort_by_key(|tag| tag.start);

    let mut stripped = String::with_capacity(text.len());
    let mut cursor = 0;
    for tag in tags {
        stripped.push_str(&text[cursor..tag.start]);
        cursor = tag.end;
    }
    stripped.push_str(&text[cursor..]);
    stripped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_and_find_round_trip() {
        let fp = Fingerprint::of("quiet");
        let text = format!("A {} night.", render_marker(&fp, "quiet", None));

        let markers = find_markers(&text);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].fingerprint, fp);
        assert_eq!(markers[0].inner_text(&text), "quiet");
    }

    #[test]
    fn inline_comment_is_attribute_escaped() {
        let fp = Fingerprint::of("x");
        let rendered = render_marker(&fp, "x", Some("say \"no\" <here>"));
        assert!(rendered.contains("comment=\"say &quot;no&quot; &lt;here&gt;\""));
        assert_eq!(find_marker(&rendered, &fp).unwrap().inner_text(&rendered), "x");
    }

    #[test]
    fn legacy_unquoted_ids_are_recognised() {
        let text = "Before <comment id=0123abcd>the storm</comment> after";
        let marker = find_marker(text, &Fingerprint::parse("0123abcd").unwrap()).unwrap();
        assert_eq!(marker.inner_text(text), "the storm");
    }

    #[test]
    fn find_unmarked_skips_tag_attributes() {
        let fp = Fingerprint::of("late");
        let text = format!("{} and comment", render_marker(&fp, "late", Some("comment")));
        let pos = find_unmarked(&text, "comment").unwrap();
        assert_eq!(&text[pos..], "comment");
    }

    #[test]
    fn strip_markers_keeps_inner_text() {
        let text = "A <comment id=\"0123abcd\">b</comment> c <comment id=\"89abcdef\" comment=\"n\">d</comment>";
        assert_eq!(strip_markers(text), "A b c d");
    }

    #[test]
    fn nested_markers_pair_with_their_own_closing_tags() {
        let outer = Fingerprint::parse("fe638f50").unwrap();
        let inner = Fingerprint::parse("0ca5329b").unwrap();
        let text = format!(
            "{} home.",
            render_marker(
                &outer,
                &format!("The {} walked slowly", render_marker(&inner, "old man", None)),
                None,
            )
        );

        let markers = find_markers(&text);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].fingerprint, outer);
        assert_eq!(markers[1].fingerprint, inner);
        assert_eq!(markers[1].inner_text(&text), "old man");
        assert_eq!(
            markers[0].inner_text(&text),
            "The <comment id=\"0ca5329b\">old man</comment> walked slowly"
        );
        assert_eq!(find_marker(&text, &inner).unwrap().inner_text(&text), "old man");
        assert_eq!(strip_markers(&text), "The old man walked slowly home.");
    }

    #[test]
    fn stray_tags_are_not_markers() {
        let text = "a </comment> <comment id=\"0123abcd\">b</comment> <comment id=\"89abcdef\">c";
        let markers = find_markers(text);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].inner_text(text), "b");
        assert_eq!(
            strip_markers(text),
            "a </comment> b <comment id=\"89abcdef\">c"
        );
    }
}
