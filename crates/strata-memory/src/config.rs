//! Tuning knobs for the memory hierarchy
//!
//! Every field has a default, so a partial config file (or none at all)
//! deserializes cleanly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the memory hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Workspace the store is scoped to
    pub workspace_id: String,

    pub theme: ThemeConfig,
    pub retrieval: RetrievalConfig,
    pub conflict: ConflictConfig,
    pub forgetting: ForgettingConfig,
    pub reflection: ReflectionConfig,

    /// Index score at which a new fact counts as a near-duplicate
    pub duplicate_threshold: f64,

    /// `remember` calls whose fact confidence is below this are rejected
    pub write_confidence_threshold: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            workspace_id: "default".to_string(),
            theme: ThemeConfig::default(),
            retrieval: RetrievalConfig::default(),
            conflict: ConflictConfig::default(),
            forgetting: ForgettingConfig::default(),
            reflection: ReflectionConfig::default(),
            duplicate_threshold: 0.95,
            write_confidence_threshold: 0.0,
        }
    }
}

impl MemoryConfig {
    /// Create a configuration for a workspace with default knobs
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            ..Self::default()
        }
    }

    /// Set theme knobs
    pub fn with_theme(mut self, theme: ThemeConfig) -> Self {
        self.theme = theme;
        self
    }

    /// Set retrieval knobs
    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = retrieval;
        self
    }

    /// Set conflict knobs
    pub fn with_conflict(mut self, conflict: ConflictConfig) -> Self {
        self.conflict = conflict;
        self
    }

    /// Set forgetting knobs
    pub fn with_forgetting(mut self, forgetting: ForgettingConfig) -> Self {
        self.forgetting = forgetting;
        self
    }

    /// Set reflection knobs
    pub fn with_reflection(mut self, reflection: ReflectionConfig) -> Self {
        self.reflection = reflection;
        self
    }

    /// Set the near-duplicate threshold
    pub fn with_duplicate_threshold(mut self, threshold: f64) -> Self {
        self.duplicate_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the minimum confidence for semantic writes
    pub fn with_write_confidence_threshold(mut self, threshold: f64) -> Self {
        self.write_confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }
}

/// Theme clustering knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeConfig {
    /// Themes above this many semantics are reported as oversized
    pub max_size: usize,

    /// Themes below this coherence are reported as weak
    pub min_coherence: f64,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            max_size: 50,
            min_coherence: 0.3,
        }
    }
}

/// Top-down retrieval knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k_themes: usize,
    pub top_k_semantics: usize,
    pub top_k_episodes: usize,

    /// Hits scoring below this are dropped
    pub min_score: f32,

    /// A recall whose best hit scores below this is flagged uncertain
    pub uncertainty_threshold: f32,

    /// Rough cap on the rendered answer, in whitespace tokens
    pub max_answer_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k_themes: 5,
            top_k_semantics: 10,
            top_k_episodes: 5,
            min_score: 0.1,
            uncertainty_threshold: 0.3,
            max_answer_tokens: 512,
        }
    }
}

impl RetrievalConfig {
    pub fn with_top_k(mut self, themes: usize, semantics: usize, episodes: usize) -> Self {
        self.top_k_themes = themes;
        self.top_k_semantics = semantics;
        self.top_k_episodes = episodes;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score.clamp(0.0, 1.0);
        self
    }

    pub fn with_uncertainty_threshold(mut self, threshold: f32) -> Self {
        self.uncertainty_threshold = threshold.clamp(0.0, 1.0);
        self
    }
}

/// Conflict detection and resolution knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Minimum index score for two facts to be compared at all
    pub similarity_threshold: f32,

    /// Confidence gap above which the higher-confidence fact wins outright
    pub confidence_gap: f64,

    /// Confidence gap below which a conflict is considered ambiguous
    pub ambiguity_gap: f64,

    /// Creation-time gap above which the newer fact wins
    pub recency_window_secs: u64,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            confidence_gap: 0.1,
            ambiguity_gap: 0.05,
            recency_window_secs: 3600,
        }
    }
}

impl ConflictConfig {
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_recency_window(mut self, window: Duration) -> Self {
        self.recency_window_secs = window.as_secs();
        self
    }

    pub fn recency_window(&self) -> Duration {
        Duration::from_secs(self.recency_window_secs)
    }
}

/// Decay and archive policy knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgettingConfig {
    /// Retention never decays below this floor
    pub min_retention: f64,

    /// Combined score below which a record is deleted
    pub delete_threshold: f64,

    /// Combined score below which a record is archived (retention halved)
    pub archive_threshold: f64,

    /// Stability gained per access, in days
    pub stability_per_access: f64,
}

impl Default for ForgettingConfig {
    fn default() -> Self {
        Self {
            min_retention: 0.1,
            delete_threshold: 0.1,
            archive_threshold: 0.3,
            stability_per_access: 0.5,
        }
    }
}

impl ForgettingConfig {
    pub fn with_min_retention(mut self, floor: f64) -> Self {
        self.min_retention = floor.clamp(0.0, 1.0);
        self
    }

    pub fn with_thresholds(mut self, delete: f64, archive: f64) -> Self {
        self.delete_threshold = delete;
        self.archive_threshold = archive;
        self
    }
}

/// Background reflection knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    pub auto_reflect: bool,
    pub interval_minutes: u64,

    /// Themes larger than this get a rule proposal
    pub rule_min_theme_size: usize,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            auto_reflect: false,
            interval_minutes: 60,
            rule_min_theme_size: 5,
        }
    }
}

impl ReflectionConfig {
    pub fn with_auto_reflect(mut self, enabled: bool) -> Self {
        self.auto_reflect = enabled;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_minutes = (interval.as_secs() / 60).max(1);
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MemoryConfig::default();
        assert_eq!(config.theme.max_size, 50);
        assert_eq!(config.retrieval.top_k_themes, 5);
        assert_eq!(config.conflict.recency_window(), Duration::from_secs(3600));
        assert_eq!(config.reflection.interval(), Duration::from_secs(3600));
        assert!(!config.reflection.auto_reflect);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: MemoryConfig = serde_json::from_str(
            r#"{"workspace_id": "ws1", "conflict": {"similarity_threshold": 0.7}}"#,
        )
        .unwrap();
        assert_eq!(config.workspace_id, "ws1");
        assert!((config.conflict.similarity_threshold - 0.7).abs() < 1e-6);
        assert!((config.conflict.confidence_gap - 0.1).abs() < 1e-9);
        assert!((config.duplicate_threshold - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_builders_clamp() {
        let config = MemoryConfig::new("ws")
            .with_duplicate_threshold(1.5)
            .with_conflict(ConflictConfig::default().with_similarity_threshold(-1.0));
        assert_eq!(config.duplicate_threshold, 1.0);
        assert_eq!(config.conflict.similarity_threshold, 0.0);
    }
}
