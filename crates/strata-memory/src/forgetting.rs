//! Forgetting engine - decay scoring and archive/delete policy
//!
//! Retention follows an exponential decay curve whose stability grows with
//! each access. Importance is a weighted composite that ignores age. The two
//! are combined (with an access bonus) to decide whether a record is kept,
//! archived (its stored retention score halved), or deleted outright.

use crate::config::ForgettingConfig;
use crate::error::MemoryResult;
use crate::store::MemoryStore;
use crate::types::{MemoryLevel, MemoryRecord, StoredMemory};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Outcome of one archive/delete sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForgettingReport {
    pub archived: usize,
    pub deleted: usize,
    pub retained: usize,
}

/// Point-in-time view of the store's decay state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForgettingStats {
    pub total: usize,

    /// Records whose retention score has been demoted at least once
    pub archived: usize,

    /// Records deleted by this engine since it was created
    pub deleted: usize,
    pub retained: usize,

    /// Records currently below the archive threshold
    pub candidates_for_archive: usize,
}

/// A record scored by the forgetting policy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtRiskMemory {
    pub id: String,
    pub level: MemoryLevel,
    pub preview: String,
    pub retention: f64,
    pub importance: f64,
    pub combined: f64,
}

/// Applies decay scoring and the archive/delete policy to a store
pub struct ForgettingEngine {
    store: Arc<MemoryStore>,
    config: ForgettingConfig,
    deleted_total: AtomicUsize,
}

impl ForgettingEngine {
    pub fn new(store: Arc<MemoryStore>, config: ForgettingConfig) -> Self {
        Self {
            store,
            config,
            deleted_total: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &ForgettingConfig {
        &self.config
    }

    /// `exp(-age_days / stability)` floored at the configured minimum.
    ///
    /// Age is measured from the last access, or creation if never accessed.
    pub fn calculate_retention(&self, stored: &StoredMemory, now: DateTime<Utc>) -> f64 {
        let age_days = ((now - stored.last_touched()).num_milliseconds() as f64 / MILLIS_PER_DAY).max(0.0);
        let stability = 1.0 + stored.access.access_count as f64 * self.config.stability_per_access;
        (-age_days / stability)
            .exp()
            .clamp(self.config.min_retention, 1.0)
    }

    /// Age-independent value of a record.
    ///
    /// `theme_memberships` is how many themes list the record (semantics only).
    pub fn calculate_importance(&self, record: &MemoryRecord, theme_memberships: usize) -> f64 {
        let mut importance = 0.5;

        if let Some(confidence) = record.confidence() {
            importance += confidence.clamp(0.0, 1.0) * 0.2;
        }

        if let MemoryRecord::Semantic(semantic) = record {
            importance += semantic.fact_type.importance_weight();
            importance += semantic.entities.len().min(5) as f64 / 5.0 * 0.2;
            importance += theme_memberships.min(3) as f64 / 3.0 * 0.15;
        }

        importance.clamp(0.0, 1.0)
    }

    /// Retention × importance, boosted logarithmically by access count
    pub fn combined_score(&self, retention: f64, importance: f64, access_count: u64) -> f64 {
        retention * importance * (1.0 + (1.0 + access_count as f64).log10() / 2.0)
    }

    /// Sweep every record: delete below the delete threshold, halve the
    /// retention score below `threshold`, keep the rest untouched.
    pub async fn archive_low_value(&self, threshold: f64) -> MemoryResult<ForgettingReport> {
        let now = Utc::now();
        let all = self.store.list(None).await?;
        let memberships = theme_memberships(&all);
        let mut report = ForgettingReport::default();

        for stored in &all {
            let combined = self.score(stored, &memberships, now).combined;
            let id = stored.record.id();

            if combined < self.config.delete_threshold {
                // A concurrent delete may have won; that is still a deletion
                self.store.delete(id).await?;
                report.deleted += 1;
                tracing::debug!(id = %id, combined = combined, "Forgot memory");
            } else if combined < threshold {
                let demoted = stored.access.retention_score / 2.0;
                self.store
                    .set_retention(id, stored.record.level(), demoted)
                    .await?;
                report.archived += 1;
                tracing::debug!(id = %id, combined = combined, retention = demoted, "Archived memory");
            } else {
                report.retained += 1;
            }
        }

        self.deleted_total.fetch_add(report.deleted, AtomicOrdering::Relaxed);
        tracing::info!(
            archived = report.archived,
            deleted = report.deleted,
            retained = report.retained,
            threshold = threshold,
            "Forgetting sweep complete"
        );
        Ok(report)
    }

    /// Sweep with the configured archive threshold
    pub async fn cleanup(&self) -> MemoryResult<ForgettingReport> {
        self.archive_low_value(self.config.archive_threshold).await
    }

    pub async fn get_stats(&self) -> MemoryResult<ForgettingStats> {
        let now = Utc::now();
        let all = self.store.list(None).await?;
        let memberships = theme_memberships(&all);

        let archived = all
            .iter()
            .filter(|s| s.access.retention_score < 1.0)
            .count();
        let candidates_for_archive = all
            .iter()
            .filter(|s| self.score(s, &memberships, now).combined < self.config.archive_threshold)
            .count();

        Ok(ForgettingStats {
            total: all.len(),
            archived,
            deleted: self.deleted_total.load(AtomicOrdering::Relaxed),
            retained: all.len() - archived,
            candidates_for_archive,
        })
    }

    /// Records whose combined score is below `threshold`, weakest first
    pub async fn get_at_risk_memories(&self, threshold: f64) -> MemoryResult<Vec<AtRiskMemory>> {
        let now = Utc::now();
        let all = self.store.list(None).await?;
        let memberships = theme_memberships(&all);

        let mut at_risk: Vec<AtRiskMemory> = all
            .iter()
            .map(|s| self.score(s, &memberships, now))
            .filter(|r| r.combined < threshold)
            .collect();
        at_risk.sort_by(|a, b| a.combined.partial_cmp(&b.combined).unwrap_or(Ordering::Equal));
        Ok(at_risk)
    }

    fn score(
        &self,
        stored: &StoredMemory,
        memberships: &HashMap<String, usize>,
        now: DateTime<Utc>,
    ) -> AtRiskMemory {
        let record = &stored.record;
        let retention = self.calculate_retention(stored, now);
        let importance = self.calculate_importance(
            record,
            memberships.get(record.id()).copied().unwrap_or(0),
        );
        AtRiskMemory {
            id: record.id().to_string(),
            level: record.level(),
            preview: crate::text::truncate(record.primary_text(), 80),
            retention,
            importance,
            combined: self.combined_score(retention, importance, stored.access.access_count),
        }
    }
}

/// semantic id -> number of themes listing it
fn theme_memberships(all: &[StoredMemory]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for theme in all.iter().filter_map(|s| s.record.as_theme()) {
        for id in &theme.semantic_ids {
            *counts.entry(id.clone()).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::types::{AccessStats, FactType, OriginalMemory, SemanticMemory, ThemeMemory};
    use chrono::Duration;

    fn engine() -> (Arc<MemoryStore>, ForgettingEngine) {
        let store = Arc::new(MemoryStore::new(Arc::new(InMemoryStorage::new()), "forget"));
        let engine = ForgettingEngine::new(store.clone(), ForgettingConfig::default());
        (store, engine)
    }

    fn aged(days: i64, access_count: u64) -> StoredMemory {
        let created = Utc::now() - Duration::days(days);
        let mut stored = StoredMemory::new(
            SemanticMemory::new("fact", FactType::Fact)
                .with_created_at(created)
                .into(),
        );
        stored.access = AccessStats {
            access_count,
            last_accessed: None,
            retention_score: 1.0,
        };
        stored
    }

    #[test]
    fn test_retention_decays_with_age() {
        let (_, engine) = engine();
        let now = Utc::now();
        let mut previous = f64::MAX;
        for days in [0, 1, 2, 5, 30] {
            let r = engine.calculate_retention(&aged(days, 0), now);
            assert!(r <= previous);
            assert!((0.1..=1.0).contains(&r));
            previous = r;
        }
        // Far in the past, the floor holds
        assert!((engine.calculate_retention(&aged(365, 0), now) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_access_slows_decay() {
        let (_, engine) = engine();
        let now = Utc::now();
        let cold = engine.calculate_retention(&aged(2, 0), now);
        let warm = engine.calculate_retention(&aged(2, 4), now);
        assert!(warm > cold);
        // stability 3.0 at four accesses
        assert!((warm - (-2.0f64 / 3.0).exp()).abs() < 1e-3);
    }

    #[test]
    fn test_importance_weights() {
        let (_, engine) = engine();
        let plain = SemanticMemory::new("x", FactType::Fact).with_confidence(0.5);
        assert!((engine.calculate_importance(&plain.into(), 0) - 0.9).abs() < 1e-9);

        let event = SemanticMemory::new("x", FactType::Event)
            .with_confidence(0.0)
            .with_entities(vec!["A".into(), "B".into()]);
        // 0.5 + 0.2 + 0.08 + 0.05
        assert!((engine.calculate_importance(&event.into(), 1) - 0.83).abs() < 1e-9);

        let rich = SemanticMemory::new("x", FactType::Goal)
            .with_confidence(1.0)
            .with_entities((0..8).map(|i| i.to_string()).collect());
        assert_eq!(engine.calculate_importance(&rich.into(), 10), 1.0);

        let original = OriginalMemory::new("x", "s");
        assert!((engine.calculate_importance(&original.into(), 0) - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_year_old_fact_is_deleted_not_archived() {
        let (store, engine) = engine();
        let old = SemanticMemory::new("Office is on floor three", FactType::Fact)
            .with_created_at(Utc::now() - Duration::days(365));
        store.save(&old.clone().into()).await.unwrap();

        let stored = store.peek(&old.id, MemoryLevel::Semantic).await.unwrap().unwrap();
        let retention = engine.calculate_retention(&stored, Utc::now());
        let importance = engine.calculate_importance(&stored.record, 0);
        assert!(retention < 0.3);
        assert!(engine.combined_score(retention, importance, 0) < 0.1);

        let report = engine.archive_low_value(0.3).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.archived, 0);
        assert!(store.peek(&old.id, MemoryLevel::Semantic).await.unwrap().is_none());
        assert_eq!(engine.get_stats().await.unwrap().deleted, 1);
    }

    #[tokio::test]
    async fn test_middle_band_is_archived() {
        let (store, engine) = engine();
        // 36h old: retention ~0.22, combined ~0.2
        let fading = SemanticMemory::new("Build takes ten minutes", FactType::Fact)
            .with_created_at(Utc::now() - Duration::hours(36));
        let fresh = SemanticMemory::new("Deploys happen on Fridays", FactType::Fact);
        store.save(&fading.clone().into()).await.unwrap();
        store.save(&fresh.clone().into()).await.unwrap();

        let at_risk = engine.get_at_risk_memories(0.3).await.unwrap();
        assert_eq!(at_risk.len(), 1);
        assert_eq!(at_risk[0].id, fading.id);

        let report = engine.cleanup().await.unwrap();
        assert_eq!(
            report,
            ForgettingReport {
                archived: 1,
                deleted: 0,
                retained: 1
            }
        );

        let stored = store.peek(&fading.id, MemoryLevel::Semantic).await.unwrap().unwrap();
        assert!((stored.access.retention_score - 0.5).abs() < 1e-9);

        let stats = engine.get_stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.archived, 1);
        assert_eq!(stats.candidates_for_archive, 1);
    }

    #[tokio::test]
    async fn test_theme_membership_raises_importance() {
        let (store, engine) = engine();
        let sem = SemanticMemory::new("fact", FactType::Fact).with_confidence(0.5);
        let mut theme = ThemeMemory::new("T", "about T");
        theme.append_semantic(&sem.id, 0.5);
        store.save(&sem.clone().into()).await.unwrap();
        store.save(&theme.into()).await.unwrap();

        let at_risk = engine.get_at_risk_memories(2.0).await.unwrap();
        let scored = at_risk.iter().find(|r| r.id == sem.id).unwrap();
        assert!((scored.importance - 0.95).abs() < 1e-9);
    }
}
