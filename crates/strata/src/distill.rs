//! Turning a raw utterance into the pieces `remember` stores
//!
//! Everything here is lexical: no model is consulted. Callers that know
//! better can pass the fact type and entities explicitly.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use strata_memory::text::truncate;
use strata_memory::FactType;

/// Longest episode summary, in characters
pub const MAX_SUMMARY_CHARS: usize = 200;

/// Capitalized words that are never entities
const STOP_WORDS: &[&str] = &[
    "A", "An", "And", "Are", "As", "At", "But", "By", "For", "From", "He", "Her", "His", "How",
    "I", "I'm", "If", "In", "Is", "It", "Its", "My", "No", "Not", "Of", "On", "Or", "Our", "She",
    "So", "That", "The", "Their", "Then", "There", "These", "They", "This", "To", "We", "What",
    "When", "Where", "Which", "Who", "Why", "With", "Yes", "You", "Your",
];

fn capitalized() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][A-Za-z0-9'_-]*").ok())
        .as_ref()
}

/// Keyword patterns in priority order
fn fact_patterns() -> &'static [(FactType, Regex)] {
    static PATTERNS: OnceLock<Vec<(FactType, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: [(FactType, &[&str]); 4] = [
            (
                FactType::Preference,
                &[
                    "prefer", "prefers", "preferred", "like", "likes", "love", "loves", "enjoy",
                    "enjoys", "dislike", "dislikes", "hate", "hates", "favorite", "favourite",
                ],
            ),
            (
                FactType::Goal,
                &[
                    "want to", "wants to", "plan to", "plans to", "going to", "goal", "goals",
                    "aim to", "hope to", "trying to",
                ],
            ),
            (
                FactType::Constraint,
                &[
                    "must", "cannot", "can't", "should not", "shouldn't", "never", "always",
                    "required", "requires", "only",
                ],
            ),
            (
                FactType::Event,
                &[
                    "yesterday", "today", "tomorrow", "last week", "last month", "happened",
                    "met", "went", "attended", "launched", "released", "deployed",
                ],
            ),
        ];
        table
            .into_iter()
            .filter_map(|(fact_type, words)| {
                let pattern = format!(r"(?i)\b(?:{})\b", words.join("|"));
                Regex::new(&pattern).ok().map(|re| (fact_type, re))
            })
            .collect()
    })
}

/// First sentence of `content`, capped at [`MAX_SUMMARY_CHARS`]
pub fn summarize(content: &str) -> String {
    let trimmed = content.trim();
    let mut end = trimmed.len();
    let mut chars = trimmed.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if at_boundary {
                end = i + c.len_utf8();
                break;
            }
        }
    }
    truncate(&trimmed[..end], MAX_SUMMARY_CHARS)
}

/// Guess the fact type from keywords.
///
/// Checked in order preference, goal, constraint, event; anything else is a
/// plain fact.
pub fn infer_fact_type(content: &str) -> FactType {
    fact_patterns()
        .iter()
        .find(|(_, pattern)| pattern.is_match(content))
        .map_or(FactType::Fact, |(fact_type, _)| *fact_type)
}

/// Capitalized tokens that are not stop-words, deduplicated
/// case-insensitively in order of appearance
pub fn extract_entities(content: &str) -> Vec<String> {
    let Some(pattern) = capitalized() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    pattern
        .find_iter(content)
        .map(|m| m.as_str().trim_end_matches(['\'', '-', '_']))
        .filter(|token| !token.is_empty() && !STOP_WORDS.contains(token))
        .filter(|token| seen.insert(token.to_lowercase()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_is_first_sentence() {
        assert_eq!(
            summarize("We moved to Postgres. It was painful."),
            "We moved to Postgres."
        );
        assert_eq!(summarize("  no terminator here  "), "no terminator here");
        assert_eq!(summarize("Version 1.5 shipped! Great"), "Version 1.5 shipped!");
    }

    #[test]
    fn test_summary_is_capped() {
        let long = "word ".repeat(100);
        let summary = summarize(&long);
        assert!(summary.ends_with("..."));
        assert!(summary.chars().count() <= MAX_SUMMARY_CHARS + 3);
    }

    #[test]
    fn test_fact_type_inference() {
        assert_eq!(infer_fact_type("User prefers dark mode"), FactType::Preference);
        assert_eq!(infer_fact_type("I hate long meetings"), FactType::Preference);
        assert_eq!(infer_fact_type("We plan to migrate in Q3"), FactType::Goal);
        assert_eq!(infer_fact_type("Builds must pass CI"), FactType::Constraint);
        assert_eq!(infer_fact_type("We met Bob yesterday"), FactType::Event);
        assert_eq!(infer_fact_type("Postgres runs on port 5432"), FactType::Fact);
        // "likely" is not "like"
        assert_eq!(infer_fact_type("Rain is likely"), FactType::Fact);
    }

    #[test]
    fn test_entities_skip_stop_words_and_repeats() {
        assert_eq!(
            extract_entities("The team at Acme uses Postgres. Acme also uses Redis."),
            vec!["Acme", "Postgres", "Redis"]
        );
        assert_eq!(extract_entities("User prefers dark mode"), vec!["User"]);
        assert!(extract_entities("nothing capitalized here").is_empty());
    }
}
