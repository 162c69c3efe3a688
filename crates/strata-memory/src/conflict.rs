//! Conflict detection between semantic facts
//!
//! A new fact is compared against every stored fact the index scores above
//! the similarity threshold. Pairs are classified as factual, preference, or
//! temporal conflicts, graded by how far apart their confidences are, and
//! given a resolution proposal.

use crate::config::ConflictConfig;
use crate::error::MemoryResult;
use crate::index::{IndexOptions, MemoryIndex};
use crate::store::MemoryStore;
use crate::types::{FactType, MemoryLevel, SemanticMemory};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Words that flip the polarity of a preference. Besides plain negations,
/// "dislike" and "hate" count, since they state the opposite of "prefer".
const NEGATION_MARKERS: &[&str] = &[
    "not", "don't", "doesn't", "never", "no", "dislike", "dislikes", "hate", "hates",
];

/// Kind of tension between two facts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Two different facts about a shared entity
    Factual,
    /// One preference negates the other
    Preference,
    /// Validity periods overlap
    Temporal,
}

/// How ambiguous a conflict is, graded by the confidence gap.
///
/// `Low` means one side is clearly preferable and the conflict is easy to
/// settle automatically; `High` means the two sides are nearly tied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

/// A detected conflict between two semantics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub id: String,

    /// The earlier-stored side
    pub first: SemanticMemory,

    /// The newer or incoming side
    pub second: SemanticMemory,

    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    pub similarity: f32,
    pub description: String,
    pub detected_at: DateTime<Utc>,
}

/// Proposed way to settle a conflict
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Resolution {
    /// Confidence gap is decisive
    KeepHigherConfidence { keep: String, discard: String },

    /// Facts were recorded far enough apart that the newer one wins
    KeepNewer { keep: String, discard: String },

    /// Too close to call; a person has to decide
    NeedsReview { reason: String },

    /// Keep the first id; both contents still need reconciling
    Merge { keep: String, merged: String },
}

impl Resolution {
    /// Id deleted when this resolution is applied, if any
    pub fn discarded(&self) -> Option<&str> {
        match self {
            Self::KeepHigherConfidence { discard, .. } | Self::KeepNewer { discard, .. } => {
                Some(discard)
            }
            Self::NeedsReview { .. } | Self::Merge { .. } => None,
        }
    }

    pub fn is_destructive(&self) -> bool {
        self.discarded().is_some()
    }
}

/// Finds and resolves contradictions between semantic facts
pub struct ConflictDetector {
    store: Arc<MemoryStore>,
    index: Arc<MemoryIndex>,
    config: ConflictConfig,
}

impl ConflictDetector {
    pub fn new(store: Arc<MemoryStore>, index: Arc<MemoryIndex>, config: ConflictConfig) -> Self {
        Self {
            store,
            index,
            config,
        }
    }

    pub fn config(&self) -> &ConflictConfig {
        &self.config
    }

    /// Conflicts between `incoming` and stored semantics.
    ///
    /// `incoming` need not be stored yet; if it is, it is skipped as a candidate.
    pub async fn detect(&self, incoming: &SemanticMemory) -> MemoryResult<Vec<Conflict>> {
        let options = IndexOptions::new()
            .with_level(MemoryLevel::Semantic)
            .with_limit(usize::MAX)
            .with_min_score(self.config.similarity_threshold);
        let candidates = self.index.search(&incoming.content, &options).await?;

        let conflicts: Vec<Conflict> = candidates
            .into_iter()
            .filter(|hit| hit.record.id() != incoming.id)
            .filter_map(|hit| {
                let score = hit.score;
                hit.record
                    .into_semantic()
                    .and_then(|existing| self.analyze_conflict(&existing, incoming, score))
            })
            .collect();

        if !conflicts.is_empty() {
            tracing::debug!(id = %incoming.id, count = conflicts.len(), "Conflicts detected");
        }
        Ok(conflicts)
    }

    /// Classify a pair already known to be similar. `None` if they agree.
    pub fn analyze_conflict(
        &self,
        first: &SemanticMemory,
        second: &SemanticMemory,
        similarity: f32,
    ) -> Option<Conflict> {
        let (conflict_type, description) = classify(first, second)?;
        Some(Conflict {
            id: format!("conflict-{}-{}", first.id, second.id),
            first: first.clone(),
            second: second.clone(),
            conflict_type,
            severity: self.severity(first.confidence, second.confidence),
            similarity,
            description,
            detected_at: Utc::now(),
        })
    }

    /// Grade by confidence gap: above `confidence_gap` is Low, at least
    /// `ambiguity_gap` is Medium, anything smaller is High
    pub fn severity(&self, a: f64, b: f64) -> ConflictSeverity {
        let gap = confidence_gap(a, b);
        if gap > self.config.confidence_gap {
            ConflictSeverity::Low
        } else if gap >= self.config.ambiguity_gap {
            ConflictSeverity::Medium
        } else {
            ConflictSeverity::High
        }
    }

    /// Propose a resolution without applying it
    pub fn resolve(&self, conflict: &Conflict) -> Resolution {
        let (first, second) = (&conflict.first, &conflict.second);

        if confidence_gap(first.confidence, second.confidence) > self.config.confidence_gap {
            let (keep, discard) = if first.confidence >= second.confidence {
                (first, second)
            } else {
                (second, first)
            };
            return Resolution::KeepHigherConfidence {
                keep: keep.id.clone(),
                discard: discard.id.clone(),
            };
        }

        let window = chrono::Duration::seconds(self.config.recency_window_secs as i64);
        if (first.created_at - second.created_at).abs() > window {
            let (keep, discard) = if first.created_at >= second.created_at {
                (first, second)
            } else {
                (second, first)
            };
            return Resolution::KeepNewer {
                keep: keep.id.clone(),
                discard: discard.id.clone(),
            };
        }

        if conflict.severity == ConflictSeverity::High {
            return Resolution::NeedsReview {
                reason: format!(
                    "confidences {:.2} and {:.2} are too close to choose",
                    first.confidence, second.confidence
                ),
            };
        }

        Resolution::Merge {
            keep: first.id.clone(),
            merged: second.id.clone(),
        }
    }

    /// Apply every destructive resolution, deleting the losing side.
    ///
    /// Returns the applied resolutions keyed by conflict id; review and
    /// merge proposals are left for the caller. Conflicts touching a record
    /// already discarded earlier in the same call are skipped.
    pub async fn auto_resolve(&self, conflicts: &[Conflict]) -> MemoryResult<HashMap<String, Resolution>> {
        let mut applied = HashMap::new();
        let mut gone: HashSet<String> = HashSet::new();

        for conflict in conflicts {
            if gone.contains(&conflict.first.id) || gone.contains(&conflict.second.id) {
                continue;
            }
            let resolution = self.resolve(conflict);
            let Some(discard) = resolution.discarded() else {
                continue;
            };

            self.store.delete(discard).await?;
            gone.insert(discard.to_string());
            tracing::info!(conflict = %conflict.id, discarded = %discard, "Conflict auto-resolved");
            applied.insert(conflict.id.clone(), resolution);
        }

        Ok(applied)
    }

    /// Exhaustive pairwise scan over every stored semantic
    pub async fn get_all_conflicts(&self) -> MemoryResult<Vec<Conflict>> {
        let semantics: Vec<SemanticMemory> = self
            .store
            .list(Some(MemoryLevel::Semantic))
            .await?
            .into_iter()
            .filter_map(|s| s.record.into_semantic())
            .collect();

        // `list` yields oldest first, so `second` is the newer side and plays
        // the query role, as the incoming fact does in `detect`
        let mut conflicts = Vec::new();
        for (i, first) in semantics.iter().enumerate() {
            for second in &semantics[i + 1..] {
                let similarity = self
                    .index
                    .score_pair(&second.clone().into(), &first.clone().into())
                    .await?;
                if similarity < self.config.similarity_threshold {
                    continue;
                }
                if let Some(conflict) = self.analyze_conflict(first, second, similarity) {
                    conflicts.push(conflict);
                }
            }
        }

        tracing::info!(semantics = semantics.len(), conflicts = conflicts.len(), "Conflict scan complete");
        Ok(conflicts)
    }
}

/// Absolute confidence difference, rounded to 1e-6 so decimal boundaries
/// like 0.9 - 0.85 compare as written
fn confidence_gap(a: f64, b: f64) -> f64 {
    ((a - b).abs() * 1e6).round() / 1e6
}

fn classify(a: &SemanticMemory, b: &SemanticMemory) -> Option<(ConflictType, String)> {
    if a.fact_type == FactType::Fact
        && b.fact_type == FactType::Fact
        && a.normalized_content() != b.normalized_content()
        && a.shares_entity_with(b)
    {
        return Some((
            ConflictType::Factual,
            format!("'{}' contradicts '{}'", a.content, b.content),
        ));
    }

    if a.fact_type == FactType::Preference
        && b.fact_type == FactType::Preference
        && has_negation(&a.content) != has_negation(&b.content)
    {
        return Some((
            ConflictType::Preference,
            format!("'{}' and '{}' express opposite preferences", a.content, b.content),
        ));
    }

    if let (Some(va), Some(vb)) = (&a.validity, &b.validity) {
        if va.overlaps(vb) {
            return Some((
                ConflictType::Temporal,
                format!("'{}' and '{}' claim overlapping validity", a.content, b.content),
            ));
        }
    }

    None
}

fn has_negation(text: &str) -> bool {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .any(|token| NEGATION_MARKERS.contains(&token))
}
