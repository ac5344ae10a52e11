//! Content fingerprints: the join key between a marker and its comments
//!
//! A fingerprint is the first 8 hex characters of the SHA-256 digest of the
//! exact quoted text. It is a pure function of the bytes: identical quotes
//! always collide, which is why the reconciler only ever touches the first
//! occurrence of a quote.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the digest.
pub const FINGERPRINT_LEN: usize = 8;

/// Key suffix for the proposed replacement text.
pub const SUGGESTION_SUFFIX: &str = "_suggestion";

/// Key suffix for the serialized discussion thread.
pub const SUBCOMMENTS_SUFFIX: &str = "_subcomments";

/// Short deterministic digest of a text span.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint the UTF-8 bytes of `text`.
    pub fn of(text: &str) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(FINGERPRINT_LEN);
        Self(encoded)
    }

    /// Accept an existing fingerprint string (e.g. from a marker `id` or CLI).
    ///
    /// Returns `None` unless the value is exactly 8 lowercase hex characters.
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == FINGERPRINT_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Comment-map key holding the suggestion for this fingerprint.
    pub fn suggestion_key(&self) -> String {
        format!("{}{}", self.0, SUGGESTION_SUFFIX)
    }

    /// Comment-map key holding the discussion thread for this fingerprint.
    pub fn subcomments_key(&self) -> String {
        format!("{}{}", self.0, SUBCOMMENTS_SUFFIX)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Free-function form of [`Fingerprint::of`].
pub fn fingerprint(text: &str) -> Fingerprint {
    Fingerprint::of(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let quote = "I am Ubik. Before the universe was, I am.";
        assert_eq!(fingerprint(quote), fingerprint(quote));
    }

    #[test]
    fn fingerprint_is_eight_hex_chars() {
        let fp = fingerprint("She closed the door.");
        assert_eq!(fp.as_str().len(), FINGERPRINT_LEN);
        assert!(Fingerprint::parse(fp.as_str()).is_some());
    }

    #[test]
    fn fingerprint_matches_sha256_prefix() {
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(fingerprint("abc").as_str(), "ba7816bf");
    }

    #[test]
    fn distinct_quotes_in_one_chapter_do_not_collide() {
        let quotes = [
            "He walked home.",
            "He walked home",
            "he walked home.",
            "The rain had stopped by noon.",
            "Marta never spoke of the war again.",
            "",
        ];
        let mut seen = std::collections::HashSet::new();
        for q in quotes {
            assert!(seen.insert(fingerprint(q)), "collision for {:?}", q);
        }
    }

    #[test]
    fn parse_rejects_malformed_values() {
        assert!(Fingerprint::parse("ABCDEF12").is_none());
        assert!(Fingerprint::parse("abc").is_none());
        assert!(Fingerprint::parse("abcdefg1").is_none());
        assert!(Fingerprint::parse("0123abcd").is_some());
    }

    #[test]
    fn derived_keys_share_namespace() {
        let fp = Fingerprint::parse("0123abcd").unwrap();
        assert_eq!(fp.suggestion_key(), "0123abcd_suggestion");
        assert_eq!(fp.subcomments_key(), "0123abcd_subcomments");
    }
}
