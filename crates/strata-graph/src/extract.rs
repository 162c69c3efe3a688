//! Keyword heuristics for typing entities and relations

use crate::types::{EntityType, RelationType};

const PERSON_NAMES: &[&str] = &["user", "i", "me", "he", "she", "they", "him", "her", "them"];
const PERSON_WORDS: &[&str] = &["user", "he", "she", "his", "him", "her", "they", "them"];

/// Type a brand-new entity from its name and the fact it appeared in.
///
/// A name that is a pronoun, or that contains a person word ("user's
/// office"), is a `Person`. Otherwise the first matching keyword group in
/// the content decides, falling back to `Concept`.
pub fn infer_entity_type(name: &str, content: &str) -> EntityType {
    let name = name.trim().to_lowercase();
    if PERSON_NAMES.contains(&name.as_str()) || words(&name).any(|w| PERSON_WORDS.contains(&w)) {
        return EntityType::Person;
    }

    let text = format!(" {} ", content.to_lowercase());
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&["company", "team", "organization", "organisation"]) {
        EntityType::Organization
    } else if has(&["located", " at ", " in "]) {
        EntityType::Location
    } else if has(&["happened", "occurred"]) {
        EntityType::Event
    } else if has(&["prefer", "like", "want"]) {
        EntityType::Topic
    } else if words(&text).any(|w| PERSON_WORDS.contains(&w)) {
        EntityType::Person
    } else {
        EntityType::Concept
    }
}

/// Type the relation between entities co-occurring in `content`
pub fn infer_relation_type(content: &str) -> RelationType {
    let text = format!(" {} ", content.to_lowercase());
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    // "dislike" contains "like", so it is checked first
    if has(&["dislike", "hate"]) {
        RelationType::Dislikes
    } else if has(&["prefer", "like"]) {
        RelationType::Prefers
    } else if has(&["part of", "belongs to"]) {
        RelationType::PartOf
    } else if has(&["located", " in "]) {
        RelationType::LocatedIn
    } else if has(&["caused", "because"]) {
        RelationType::CausedBy
    } else {
        RelationType::RelatedTo
    }
}

/// Single words and adjacent bigrams, the candidates for entity lookup
pub fn candidate_phrases(query: &str) -> Vec<String> {
    let tokens: Vec<&str> = query
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '\''))
        .filter(|t| !t.is_empty())
        .collect();

    let mut phrases: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
    phrases.extend(tokens.windows(2).map(|pair| format!("{} {}", pair[0], pair[1])));
    phrases
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty())
}
