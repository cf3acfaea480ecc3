//! Text normalization shared by the indexer and the query engine.
//!
//! Both sides of a match go through [`normalize`], so a record field and a
//! query term are always compared under the same rules:
//!
//! 1. Unicode canonical decomposition (NFD)
//! 2. Combining marks removed (`é` becomes `e`)
//! 3. Lowercased
//! 4. Anything outside `[0-9a-z]` and whitespace becomes a space
//! 5. Whitespace runs collapsed to one space, ends trimmed
//!
//! Devanagari text does not survive step 4. It reaches the search surface
//! only through [`crate::translit`].

use crate::translit::transliterate_lossy;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalize text for substring matching.
///
/// The output contains only `[0-9a-z]` and single spaces, so normalizing it
/// again is a no-op.
///
/// # Example
/// ```
/// use matdar_core::normalize::normalize;
/// assert_eq!(normalize("  Ráma,  Bhavan-12 "), "rama bhavan 12");
/// ```
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.nfd().filter(|c| !is_combining_mark(*c)) {
        for lower in c.to_lowercase() {
            if lower.is_ascii_lowercase() || lower.is_ascii_digit() {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(lower);
            } else {
                pending_space = true;
            }
        }
    }

    out
}

/// Split a user query into normalized search terms.
///
/// Devanagari input is romanized first so it can meet the transliterated
/// names on the index side; Latin input passes through that step untouched.
/// Duplicate terms are dropped, order of first occurrence is kept.
pub fn search_terms(query: &str) -> Vec<String> {
    let normalized = normalize(&transliterate_lossy(query));
    let mut terms: Vec<String> = Vec::new();
    for term in normalized.split_whitespace() {
        if !terms.iter().any(|t| t == term) {
            terms.push(term.to_string());
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "",
        "   ",
        "Ram",
        "  Shyam   KUMAR ",
        "Ráma Bhāvan, Dadar (W)",
        "Booth #12 / Part-3",
        "राम",
        "राम Ram",
        "Ñandú\tçafé\n",
        "İstanbul",
        "ǅemal",
        "ﬁle",
        "12-A/3, Shivaji Park",
        "Straße",
        "\u{301}leading combining mark",
    ];

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize("Shyam"), "shyam");
        assert_eq!(normalize("  Shyam   KUMAR "), "shyam kumar");
        assert_eq!(normalize("Booth #12 / Part-3"), "booth 12 part 3");
        assert_eq!(normalize("Ráma Bhāvan"), "rama bhavan");
        assert_eq!(normalize("çafé"), "cafe");
    }

    #[test]
    fn test_normalize_strips_devanagari() {
        assert_eq!(normalize("राम"), "");
        assert_eq!(normalize("राम A1"), "a1");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for sample in SAMPLES {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn test_normalize_output_alphabet() {
        for sample in SAMPLES {
            let out = normalize(sample);
            assert!(out
                .chars()
                .all(|c| c == ' ' || c.is_ascii_lowercase() || c.is_ascii_digit()));
            assert!(!out.contains("  "));
            assert_eq!(out.trim(), out);
        }
    }

    #[test]
    fn test_search_terms() {
        assert_eq!(search_terms("Mumbai  booth 12"), vec!["mumbai", "booth", "12"]);
        assert_eq!(search_terms("ram RAM Ram"), vec!["ram"]);
        assert!(search_terms("   ").is_empty());
        assert!(search_terms("!!!").is_empty());
    }

    #[test]
    fn test_search_terms_devanagari_query() {
        assert_eq!(search_terms("राम"), vec!["ram"]);
        assert_eq!(search_terms("श्याम 7"), vec!["shyam", "7"]);
    }
}
