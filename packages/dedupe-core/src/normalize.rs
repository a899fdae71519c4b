//! Text normalization and word-shingle extraction.
//!
//! Normalization rules, applied in order: Unicode NFKC, lowercase, strip
//! control characters, replace punctuation with space, collapse whitespace
//! runs to one ASCII space, trim. Shingles are overlapping k-word windows
//! over the normalized token stream, hashed to stable 64-bit values.

use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;

use crate::hash;

/// Normalized view of a document's OCR text, ready for signature building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextProfile {
    pub normalized_text: String,
    pub word_count: usize,
    pub shingles: HashSet<u64>,
    /// False when the word count is below the `min_words` gate. Ineligible
    /// documents carry an empty shingle set and never join a group.
    pub eligible: bool,
}

impl TextProfile {
    /// Normalize `full_text` and extract k-word shingles. Documents under
    /// `min_words` get an empty shingle set and `eligible = false`.
    pub fn build(full_text: &str, shingle_size: usize, min_words: usize) -> Self {
        let normalized_text = normalize(full_text);
        let word_count = normalized_text.split_ascii_whitespace().count();

        if word_count < min_words {
            return Self {
                normalized_text,
                word_count,
                shingles: HashSet::new(),
                eligible: false,
            };
        }

        let shingles = shingles(&normalized_text, shingle_size);
        Self {
            normalized_text,
            word_count,
            shingles,
            eligible: true,
        }
    }
}

/// Normalize text for similarity comparison. Idempotent.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.nfkc() {
        if ch.is_control() {
            continue;
        }
        if ch.is_whitespace() || !ch.is_alphanumeric() {
            // Punctuation and whitespace both become a single separator.
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        for lower in ch.to_lowercase() {
            out.push(lower);
        }
    }

    out
}

/// Overlapping k-word shingles over already-normalized text, as a set of
/// stable hashes. Fewer than `k` words yields the empty set.
pub fn shingles(normalized: &str, k: usize) -> HashSet<u64> {
    let words: Vec<&str> = normalized.split_ascii_whitespace().collect();
    if k == 0 || words.len() < k {
        return HashSet::new();
    }

    let mut set = HashSet::with_capacity(words.len() - k + 1);
    for window in words.windows(k) {
        set.insert(hash::hash_str(&window.join(" ")));
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases_and_strips_punctuation() {
        assert_eq!(normalize("Hello, World!"), "hello world");
        assert_eq!(normalize("A-B_C"), "a b c");
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("a   b\t\nc"), "a b c");
        assert_eq!(normalize("  padded  "), "padded");
    }

    #[test]
    fn test_normalize_strips_control_characters() {
        assert_eq!(normalize("in\u{0000}voice\u{0007}"), "invoice");
    }

    #[test]
    fn test_normalize_applies_nfkc() {
        // Fullwidth forms fold to ASCII under NFKC.
        assert_eq!(normalize("ＡＢＣ１２３"), "abc123");
        // Ligature fi decomposes.
        assert_eq!(normalize("ﬁle"), "file");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for text in [
            "Hello, World!",
            "  MIXED   Case\twith\npunct; marks? ",
            "ＡＢＣ ﬁle",
            "",
        ] {
            let once = normalize(text);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_case_and_whitespace_equivalence() {
        let a = shingles(&normalize("the quick brown fox jumps"), 3);
        let b = shingles(&normalize("THE QUICK BROWN FOX JUMPS"), 3);
        let c = shingles(&normalize("the  quick\tbrown\n\nfox jumps"), 3);
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_shingle_count_and_overlap() {
        let set = shingles("a b c d e", 3);
        // "a b c", "b c d", "c d e"
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_shingles_suppress_duplicates() {
        let set = shingles("x y x y x y", 2);
        // "x y" and "y x" only.
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_shingles_short_input_is_empty() {
        assert!(shingles("one two", 3).is_empty());
        assert!(shingles("", 3).is_empty());
    }

    #[test]
    fn test_profile_min_words_gate() {
        let nineteen = vec!["word"; 19].join(" ");
        let profile = TextProfile::build(&nineteen, 3, 20);
        assert!(!profile.eligible);
        assert!(profile.shingles.is_empty());
        assert_eq!(profile.word_count, 19);

        let twenty = vec!["word"; 20].join(" ");
        let profile = TextProfile::build(&twenty, 3, 20);
        assert!(profile.eligible);
        assert!(!profile.shingles.is_empty());
    }

    #[test]
    fn test_profile_word_count_matches_normalized_tokens() {
        let profile = TextProfile::build("One, two... THREE!", 2, 1);
        assert_eq!(profile.word_count, 3);
        assert_eq!(profile.normalized_text, "one two three");
    }
}
