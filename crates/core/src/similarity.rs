use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use strsim::normalized_levenshtein;

/// Character-sequence similarity ratio in `[0, 1]`.
///
/// Comparison is case-insensitive. Identical non-empty strings score 1.0;
/// if either side is empty the ratio is 0.0.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase())
}

static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z][a-zA-Z0-9_-]*").expect("valid regex"));

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do", "does",
        "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can", "need",
        "this", "that", "these", "those", "it", "we", "they", "what", "which", "who", "where",
        "when", "why", "how", "all", "each", "every", "both", "few", "more", "most", "other",
        "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than", "too", "very",
        "just", "also", "now", "here", "using", "used", "use", "new", "first", "last", "next",
        "then",
    ]
    .into_iter()
    .collect()
});

/// Lowercased, stop-word-filtered, lightly stemmed terms of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.len() >= 3 && !STOP_WORDS.contains(w.as_str()))
        .map(|w| stem(&w))
        .collect()
}

/// Suffix-stripping stemmer; collapses inflected forms onto a shared key.
fn stem(word: &str) -> String {
    const SUFFIXES: [&str; 24] = [
        "ization", "ational", "iveness", "fulness", "ousness", "ation", "ement", "ment", "able",
        "ible", "ness", "ical", "ings", "ing", "ies", "ive", "ful", "ous", "ity", "ed", "ly",
        "er", "es", "s",
    ];
    for suffix in SUFFIXES {
        if word.len() > suffix.len() + 2 && word.ends_with(suffix) {
            return word[..word.len() - suffix.len()].to_string();
        }
    }
    word.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_one() {
        assert_eq!(similarity_ratio("hello world", "hello world"), 1.0);
    }

    #[test]
    fn empty_side_scores_zero() {
        assert_eq!(similarity_ratio("", "anything"), 0.0);
        assert_eq!(similarity_ratio("anything", ""), 0.0);
        assert_eq!(similarity_ratio("", ""), 0.0);
    }

    #[test]
    fn ratio_ignores_case() {
        assert_eq!(similarity_ratio("Gameplan", "gameplan"), 1.0);
    }

    #[test]
    fn ratio_is_symmetric() {
        let a = "python machine learning guide";
        let b = "python machine learning tutorial";
        assert_eq!(similarity_ratio(a, b), similarity_ratio(b, a));
    }

    #[test]
    fn tokenize_strips_stop_words_and_stems() {
        let terms = tokenize("The quick indexing of documents");
        assert!(terms.contains(&"quick".to_string()));
        assert!(terms.contains(&"index".to_string()));
        assert!(terms.contains(&"document".to_string()));
        assert!(!terms.iter().any(|t| t == "the" || t == "of"));
    }

    #[test]
    fn tokenize_drops_short_words() {
        assert!(tokenize("go to db").iter().all(|t| t != "go" && t != "db"));
    }
}
