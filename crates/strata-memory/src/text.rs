//! Lexical helpers shared by the store, index, and distillation code

use std::collections::HashSet;

/// Tokens shorter than this are ignored by keyword scoring
pub const MIN_KEYWORD_LEN: usize = 3;

/// Lowercased whitespace tokens of at least [`MIN_KEYWORD_LEN`] characters,
/// deduplicated in first-seen order
pub fn keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| t.chars().count() >= MIN_KEYWORD_LEN)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Fraction of the query's unique keywords that occur in `target`.
///
/// Always in [0, 1]; 0 when the query has no usable keywords.
pub fn keyword_score(query: &str, target: &str) -> f32 {
    let tokens = keywords(query);
    if tokens.is_empty() {
        return 0.0;
    }

    let haystack = target.to_lowercase();
    let found = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
    found as f32 / tokens.len() as f32
}

/// Truncate to at most `max_chars` characters, appending `...` when cut
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_drop_short_and_duplicate_tokens() {
        assert_eq!(
            keywords("I do like Rust and rust is ok"),
            vec!["like", "rust", "and"]
        );
    }

    #[test]
    fn test_keyword_score_fraction() {
        let score = keyword_score("User dislikes dark mode", "User prefers dark mode");
        assert!((score - 0.75).abs() < 1e-6);
        assert_eq!(keyword_score("a b", "a b"), 0.0);
        assert_eq!(keyword_score("postgres", "We run Postgres"), 1.0);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("hello world", 5), "hello...");
    }
}
