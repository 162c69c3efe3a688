//! The four record levels of the memory hierarchy
//!
//! ```text
//! Theme ──► Semantic ──► Episode ──► Original
//! ```
//!
//! Each level points to the level below by id list, never by embedded copy.
//! [`MemoryRecord`] is the tagged union over the four levels; everything that
//! needs "any memory" goes through it rather than probing fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hierarchy level discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLevel {
    /// Raw utterance
    Original,
    /// Block of related utterances
    Episode,
    /// Distilled fact
    Semantic,
    /// Cluster of facts
    Theme,
}

impl MemoryLevel {
    /// All levels, leaf first
    pub const ALL: [MemoryLevel; 4] = [
        MemoryLevel::Original,
        MemoryLevel::Episode,
        MemoryLevel::Semantic,
        MemoryLevel::Theme,
    ];

    /// Stable lowercase name used in storage keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Episode => "episode",
            Self::Semantic => "semantic",
            Self::Theme => "theme",
        }
    }

    /// Prefix used when minting record ids
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Original => "orig",
            Self::Episode => "ep",
            Self::Semantic => "sem",
            Self::Theme => "theme",
        }
    }

    /// Level referenced by this level's id list
    pub fn child_level(&self) -> Option<MemoryLevel> {
        match self {
            Self::Original => None,
            Self::Episode => Some(Self::Original),
            Self::Semantic => Some(Self::Episode),
            Self::Theme => Some(Self::Semantic),
        }
    }
}

impl fmt::Display for MemoryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mint a record id: `{level-prefix}-{creation-millis}-{random suffix}`
pub fn generate_id(level: MemoryLevel) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        level.id_prefix(),
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

/// Who produced an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerRole {
    #[default]
    User,
    Assistant,
    System,
}

/// What closed an episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryType {
    #[default]
    Time,
    Topic,
    Intent,
}

/// Kind of distilled fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FactType {
    #[default]
    Fact,
    Preference,
    Goal,
    Constraint,
    Event,
}

impl FactType {
    /// Fixed importance weight contributed by the fact type
    pub fn importance_weight(&self) -> f64 {
        match self {
            Self::Goal => 0.35,
            Self::Fact => 0.3,
            Self::Constraint => 0.3,
            Self::Preference => 0.25,
            Self::Event => 0.2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Goal => "goal",
            Self::Constraint => "constraint",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for FactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open-ended validity window of a fact
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidityPeriod {
    pub start: DateTime<Utc>,

    /// `None` means the fact is still valid
    pub end: Option<DateTime<Utc>>,
}

impl ValidityPeriod {
    pub fn new(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Whether two periods share any instant. Periods that merely touch
    /// (one ends exactly where the other starts) do not overlap.
    pub fn overlaps(&self, other: &ValidityPeriod) -> bool {
        let self_before_other_ends = other.end.map_or(true, |end| self.start < end);
        let other_before_self_ends = self.end.map_or(true, |end| other.start < end);
        self_before_other_ends && other_before_self_ends
    }
}

/// One raw utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalMemory {
    pub id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub role: SpeakerRole,

    /// Sentiment in [-1, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<f64>,

    /// Caller-supplied importance in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
}

impl OriginalMemory {
    pub fn new(content: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            id: generate_id(MemoryLevel::Original),
            content: content.into(),
            timestamp: Utc::now(),
            session_id: session_id.into(),
            role: SpeakerRole::User,
            sentiment: None,
            importance: None,
        }
    }

    pub fn with_role(mut self, role: SpeakerRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_sentiment(mut self, sentiment: f64) -> Self {
        self.sentiment = Some(sentiment.clamp(-1.0, 1.0));
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance.clamp(0.0, 1.0));
        self
    }
}

/// A summarized block of related utterances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMemory {
    pub id: String,
    pub summary: String,
    pub original_ids: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub boundary: BoundaryType,

    /// Coherence in [0, 1]
    pub coherence: f64,
}

impl EpisodeMemory {
    pub fn new(summary: impl Into<String>, original_ids: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(MemoryLevel::Episode),
            summary: summary.into(),
            original_ids,
            start_time: now,
            end_time: now,
            boundary: BoundaryType::default(),
            coherence: 1.0,
        }
    }

    pub fn with_span(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = start;
        self.end_time = end.max(start);
        self
    }

    pub fn with_boundary(mut self, boundary: BoundaryType) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_coherence(mut self, coherence: f64) -> Self {
        self.coherence = coherence.clamp(0.0, 1.0);
        self
    }
}

/// A reusable, typed fact distilled from episodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMemory {
    pub id: String,
    pub content: String,
    pub fact_type: FactType,

    /// Confidence in [0, 1]
    pub confidence: f64,
    pub entities: Vec<String>,
    pub episode_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity: Option<ValidityPeriod>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts_with: Vec<String>,

    pub created_at: DateTime<Utc>,
}

impl SemanticMemory {
    pub fn new(content: impl Into<String>, fact_type: FactType) -> Self {
        Self {
            id: generate_id(MemoryLevel::Semantic),
            content: content.into(),
            fact_type,
            confidence: 0.5,
            entities: Vec::new(),
            episode_ids: Vec::new(),
            validity: None,
            conflicts_with: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_episodes(mut self, episode_ids: Vec<String>) -> Self {
        self.episode_ids = episode_ids;
        self
    }

    pub fn with_validity(mut self, validity: ValidityPeriod) -> Self {
        self.validity = Some(validity);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Trimmed, lowercased content used for equality checks
    pub fn normalized_content(&self) -> String {
        self.content.trim().to_lowercase()
    }

    /// Case-insensitive entity overlap
    pub fn shares_entity_with(&self, other: &SemanticMemory) -> bool {
        self.entities.iter().any(|a| {
            other
                .entities
                .iter()
                .any(|b| a.trim().eq_ignore_ascii_case(b.trim()))
        })
    }
}

/// A named cluster of semantics sharing an entity or topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeMemory {
    pub id: String,
    pub name: String,
    pub description: String,
    pub semantic_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<String>,

    /// Coherence in [0, 1]
    pub coherence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ThemeMemory {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(MemoryLevel::Theme),
            name: name.into(),
            description: description.into(),
            semantic_ids: Vec::new(),
            parent_id: None,
            child_ids: Vec::new(),
            coherence: 1.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_coherence(mut self, coherence: f64) -> Self {
        self.coherence = coherence.clamp(0.0, 1.0);
        self
    }

    /// Whether the theme's name or description mentions `entity`
    /// (case-insensitive substring match)
    pub fn mentions(&self, entity: &str) -> bool {
        let needle = entity.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.name.to_lowercase().contains(&needle)
            || self.description.to_lowercase().contains(&needle)
    }

    /// Append a semantic id, keeping the list free of duplicates.
    /// Returns `false` if the id was already present.
    pub fn append_semantic(&mut self, semantic_id: &str, confidence: f64) -> bool {
        if self.semantic_ids.iter().any(|id| id == semantic_id) {
            return false;
        }
        // Coherence tracks the running mean confidence of members
        let n = self.semantic_ids.len() as f64;
        self.coherence = ((self.coherence * n + confidence.clamp(0.0, 1.0)) / (n + 1.0))
            .clamp(0.0, 1.0);
        self.semantic_ids.push(semantic_id.to_string());
        self.updated_at = Utc::now();
        true
    }
}

/// Any record of the hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum MemoryRecord {
    Original(OriginalMemory),
    Episode(EpisodeMemory),
    Semantic(SemanticMemory),
    Theme(ThemeMemory),
}

impl MemoryRecord {
    pub fn id(&self) -> &str {
        match self {
            Self::Original(m) => &m.id,
            Self::Episode(m) => &m.id,
            Self::Semantic(m) => &m.id,
            Self::Theme(m) => &m.id,
        }
    }

    pub fn level(&self) -> MemoryLevel {
        match self {
            Self::Original(_) => MemoryLevel::Original,
            Self::Episode(_) => MemoryLevel::Episode,
            Self::Semantic(_) => MemoryLevel::Semantic,
            Self::Theme(_) => MemoryLevel::Theme,
        }
    }

    /// The text a record is searched and embedded by
    pub fn primary_text(&self) -> &str {
        match self {
            Self::Original(m) => &m.content,
            Self::Episode(m) => &m.summary,
            Self::Semantic(m) => &m.content,
            Self::Theme(m) => &m.description,
        }
    }

    /// Text fed to the index; themes include their name
    pub fn index_text(&self) -> String {
        match self {
            Self::Theme(m) => format!("{} {}", m.name, m.description),
            other => other.primary_text().to_string(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Original(m) => m.timestamp,
            Self::Episode(m) => m.start_time,
            Self::Semantic(m) => m.created_at,
            Self::Theme(m) => m.created_at,
        }
    }

    /// Ids of the records one level down
    pub fn child_ids(&self) -> &[String] {
        match self {
            Self::Original(_) => &[],
            Self::Episode(m) => &m.original_ids,
            Self::Semantic(m) => &m.episode_ids,
            Self::Theme(m) => &m.semantic_ids,
        }
    }

    /// Confidence where the level carries one
    pub fn confidence(&self) -> Option<f64> {
        match self {
            Self::Semantic(m) => Some(m.confidence),
            Self::Original(m) => m.importance,
            _ => None,
        }
    }

    pub fn as_original(&self) -> Option<&OriginalMemory> {
        match self {
            Self::Original(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_episode(&self) -> Option<&EpisodeMemory> {
        match self {
            Self::Episode(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_semantic(&self) -> Option<&SemanticMemory> {
        match self {
            Self::Semantic(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_theme(&self) -> Option<&ThemeMemory> {
        match self {
            Self::Theme(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_semantic(self) -> Option<SemanticMemory> {
        match self {
            Self::Semantic(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_theme(self) -> Option<ThemeMemory> {
        match self {
            Self::Theme(m) => Some(m),
            _ => None,
        }
    }
}

impl From<OriginalMemory> for MemoryRecord {
    fn from(m: OriginalMemory) -> Self {
        Self::Original(m)
    }
}

impl From<EpisodeMemory> for MemoryRecord {
    fn from(m: EpisodeMemory) -> Self {
        Self::Episode(m)
    }
}

impl From<SemanticMemory> for MemoryRecord {
    fn from(m: SemanticMemory) -> Self {
        Self::Semantic(m)
    }
}

impl From<ThemeMemory> for MemoryRecord {
    fn from(m: ThemeMemory) -> Self {
        Self::Theme(m)
    }
}

/// Access-tracking counters maintained by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessStats {
    pub access_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,

    /// Soft-demotion score used for ordering; halved on archive
    pub retention_score: f64,
}

impl Default for AccessStats {
    fn default() -> Self {
        Self {
            access_count: 0,
            last_accessed: None,
            retention_score: 1.0,
        }
    }
}

/// A record together with its access counters, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMemory {
    pub record: MemoryRecord,
    #[serde(default)]
    pub access: AccessStats,
}

impl StoredMemory {
    pub fn new(record: MemoryRecord) -> Self {
        Self {
            record,
            access: AccessStats::default(),
        }
    }

    /// Reference instant for decay: last access, else creation
    pub fn last_touched(&self) -> DateTime<Utc> {
        self.access
            .last_accessed
            .unwrap_or_else(|| self.record.created_at())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_generated_ids_carry_level_prefix() {
        let id = generate_id(MemoryLevel::Semantic);
        assert!(id.starts_with("sem-"));
        assert_ne!(id, generate_id(MemoryLevel::Semantic));
    }

    #[test]
    fn test_scores_are_clamped() {
        let sem = SemanticMemory::new("x", FactType::Fact).with_confidence(1.7);
        assert_eq!(sem.confidence, 1.0);
        let ep = EpisodeMemory::new("x", vec![]).with_coherence(-0.2);
        assert_eq!(ep.coherence, 0.0);
    }

    #[test]
    fn test_record_round_trips_through_tagged_json() {
        let record = MemoryRecord::from(
            SemanticMemory::new("User prefers dark mode", FactType::Preference)
                .with_entities(vec!["User".to_string()]),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["level"], "semantic");
        let back: MemoryRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_primary_text_per_level() {
        let ep = MemoryRecord::from(EpisodeMemory::new("summary text", vec![]));
        assert_eq!(ep.primary_text(), "summary text");
        let theme = MemoryRecord::from(ThemeMemory::new("Postgres", "Memories about Postgres"));
        assert_eq!(theme.primary_text(), "Memories about Postgres");
        assert_eq!(theme.index_text(), "Postgres Memories about Postgres");
    }

    #[test]
    fn test_validity_overlap() {
        let t0 = Utc::now();
        let a = ValidityPeriod::new(t0, Some(t0 + Duration::days(10)));
        let b = ValidityPeriod::new(t0 + Duration::days(5), None);
        let c = ValidityPeriod::new(t0 + Duration::days(10), Some(t0 + Duration::days(20)));

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn test_theme_mentions_and_append() {
        let mut theme = ThemeMemory::new("Postgres", "Memories about Postgres");
        assert!(theme.mentions("postgres"));
        assert!(!theme.mentions("mysql"));
        assert!(!theme.mentions("  "));

        assert!(theme.append_semantic("sem-1", 0.5));
        assert!(!theme.append_semantic("sem-1", 0.5));
        assert_eq!(theme.semantic_ids.len(), 1);
        assert!((theme.coherence - 0.5).abs() < 1e-9);
    }
}
