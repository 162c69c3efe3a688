//! Vector/keyword index over the memory store
//!
//! Scores stored records against a query. With an [`EmbeddingProvider`]
//! configured, scores are cosine similarities of embeddings; without one (or
//! when the provider fails for a call) they fall back to keyword overlap.
//!
//! Embeddings are persisted through the store and mirrored in an in-process
//! cache that lives until [`MemoryIndex::clear_cache`].

use crate::error::MemoryResult;
use crate::store::MemoryStore;
use crate::text::keyword_score;
use crate::types::{MemoryLevel, MemoryRecord};
use crate::vector::{cosine_similarity, EmbeddingProvider};
use dashmap::DashMap;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

/// A record together with its relevance score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub score: f32,
}

/// Filters for index queries
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub level: Option<MemoryLevel>,
    pub limit: usize,
    pub min_score: f32,

    /// Drop the queried record itself from `find_similar` results
    pub exclude_self: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            level: None,
            limit: 10,
            min_score: 0.0,
            exclude_self: true,
        }
    }
}

impl IndexOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: MemoryLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_exclude_self(mut self, exclude: bool) -> Self {
        self.exclude_self = exclude;
        self
    }
}

/// Similarity index backed by a [`MemoryStore`]
pub struct MemoryIndex {
    store: Arc<MemoryStore>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    cache: DashMap<String, Vec<f32>>,
}

impl MemoryIndex {
    /// Create a keyword-only index
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            provider: None,
            cache: DashMap::new(),
        }
    }

    /// Attach an embedding provider
    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Score every record (of the requested level) against free text
    pub async fn search(&self, query: &str, options: &IndexOptions) -> MemoryResult<Vec<ScoredMemory>> {
        if let Some(provider) = &self.provider {
            match provider.embed(query).await {
                Ok(embedding) => {
                    match self.search_by_embedding(&embedding.vector, options).await {
                        Ok(results) => return Ok(results),
                        Err(e) => {
                            tracing::warn!(error = %e, "Embedding search failed, using keyword scoring");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        provider = provider.model_name(),
                        error = %e,
                        "Query embedding failed, using keyword scoring"
                    );
                }
            }
        }

        self.keyword_search(query, options).await
    }

    /// Score every record (of the requested level) against a vector
    pub async fn search_by_embedding(
        &self,
        vector: &[f32],
        options: &IndexOptions,
    ) -> MemoryResult<Vec<ScoredMemory>> {
        let mut scored = Vec::new();
        for stored in self.store.list(options.level).await? {
            let Some(candidate) = self.vector_for(&stored.record).await? else {
                continue;
            };
            let score = cosine_similarity(vector, &candidate);
            if score >= options.min_score {
                scored.push(ScoredMemory {
                    record: stored.record,
                    score,
                });
            }
        }
        Ok(rank(scored, options.limit))
    }

    /// Records similar to the stored record `id`
    pub async fn find_similar(&self, id: &str, options: &IndexOptions) -> MemoryResult<Vec<ScoredMemory>> {
        let Some(level) = self.store.locate(id).await? else {
            return Ok(Vec::new());
        };
        let Some(stored) = self.store.peek(id, level).await? else {
            return Ok(Vec::new());
        };

        // Over-fetch by one so excluding self still fills `limit`
        let widened = IndexOptions {
            limit: options.limit.saturating_add(1),
            ..options.clone()
        };

        let embedded = match self.vector_for(&stored.record).await {
            Ok(Some(vector)) => match self.search_by_embedding(&vector, &widened).await {
                Ok(results) => Some(results),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Embedding search failed, using keyword scoring");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Embedding unavailable, using keyword scoring");
                None
            }
        };
        let results = match embedded {
            Some(results) => results,
            None => {
                self.keyword_search(&stored.record.index_text(), &widened)
                    .await?
            }
        };

        Ok(results
            .into_iter()
            .filter(|s| !(options.exclude_self && s.record.id() == id))
            .take(options.limit)
            .collect())
    }

    /// Same-level records scoring at least `threshold` against `id`
    pub async fn find_duplicates(&self, id: &str, threshold: f32) -> MemoryResult<Vec<MemoryRecord>> {
        let Some(level) = self.store.locate(id).await? else {
            return Ok(Vec::new());
        };
        let options = IndexOptions::new()
            .with_level(level)
            .with_limit(usize::MAX - 1)
            .with_min_score(threshold);
        Ok(self
            .find_similar(id, &options)
            .await?
            .into_iter()
            .map(|s| s.record)
            .collect())
    }

    /// Compute, persist, and cache the embedding for one record.
    ///
    /// Returns `false` when no provider is configured.
    pub async fn index_memory(&self, id: &str, text: &str) -> MemoryResult<bool> {
        let Some(provider) = &self.provider else {
            return Ok(false);
        };
        let embedding = provider.embed(text).await?;
        self.store.update_embedding(id, &embedding.vector).await?;
        self.cache.insert(id.to_string(), embedding.vector);
        tracing::debug!(id = %id, model = provider.model_name(), "Indexed memory");
        Ok(true)
    }

    /// Index several `(id, text)` pairs with one batched embedding call
    pub async fn index_batch(&self, items: &[(String, String)]) -> MemoryResult<usize> {
        let Some(provider) = &self.provider else {
            return Ok(0);
        };
        let texts: Vec<String> = items.iter().map(|(_, text)| text.clone()).collect();
        let embeddings = provider.embed_batch(&texts).await?;

        for ((id, _), embedding) in items.iter().zip(embeddings) {
            self.store.update_embedding(id, &embedding.vector).await?;
            self.cache.insert(id.clone(), embedding.vector);
        }
        tracing::info!(count = items.len(), "Indexed memory batch");
        Ok(items.len())
    }

    /// Similarity between two records, embedding-based when possible
    pub async fn score_pair(&self, a: &MemoryRecord, b: &MemoryRecord) -> MemoryResult<f32> {
        if self.provider.is_some() {
            match (self.vector_for(a).await, self.vector_for(b).await) {
                (Ok(Some(va)), Ok(Some(vb))) => return Ok(cosine_similarity(&va, &vb)),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(error = %e, "Embedding unavailable, using keyword scoring");
                }
                _ => {}
            }
        }
        Ok(keyword_score(&a.index_text(), &b.index_text()))
    }

    /// Drop every cached vector
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    async fn keyword_search(&self, query: &str, options: &IndexOptions) -> MemoryResult<Vec<ScoredMemory>> {
        let scored = self
            .store
            .list(options.level)
            .await?
            .into_iter()
            .filter_map(|stored| {
                let score = keyword_score(query, &stored.record.index_text());
                (score > 0.0 && score >= options.min_score).then_some(ScoredMemory {
                    record: stored.record,
                    score,
                })
            })
            .collect();
        Ok(rank(scored, options.limit))
    }

    /// Cached, persisted, or freshly computed vector for a record
    async fn vector_for(&self, record: &MemoryRecord) -> MemoryResult<Option<Vec<f32>>> {
        let id = record.id();
        if let Some(vector) = self.cache.get(id) {
            return Ok(Some(vector.clone()));
        }
        if let Some(vector) = self.store.get_embedding(id).await? {
            self.cache.insert(id.to_string(), vector.clone());
            return Ok(Some(vector));
        }
        if self.provider.is_none() {
            return Ok(None);
        }

        self.index_memory(id, &record.index_text()).await?;
        Ok(self.cache.get(id).map(|v| v.clone()))
    }
}

fn rank(mut scored: Vec<ScoredMemory>, limit: usize) -> Vec<ScoredMemory> {
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryError;
    use crate::storage::InMemoryStorage;
    use crate::types::{FactType, SemanticMemory, ThemeMemory};
    use crate::vector::{Embedding, HashEmbeddingProvider};
    use async_trait::async_trait;

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        async fn embed(&self, _text: &str) -> MemoryResult<Embedding> {
            Err(MemoryError::embedding("failing", "offline"))
        }

        fn model_name(&self) -> &str {
            "failing"
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    /// Embeds only texts mentioning "prefers"
    struct PartialProvider;

    #[async_trait]
    impl EmbeddingProvider for PartialProvider {
        async fn embed(&self, text: &str) -> MemoryResult<Embedding> {
            if text.contains("prefers") {
                HashEmbeddingProvider::new(16).embed(text).await
            } else {
                Err(MemoryError::embedding("partial", "offline"))
            }
        }

        fn model_name(&self) -> &str {
            "partial"
        }

        fn dimensions(&self) -> usize {
            16
        }
    }

    async fn seeded() -> (Arc<MemoryStore>, Vec<SemanticMemory>) {
        let store = Arc::new(MemoryStore::new(Arc::new(InMemoryStorage::new()), "idx"));
        let facts = vec![
            SemanticMemory::new("User prefers dark mode", FactType::Preference),
            SemanticMemory::new("User dislikes dark mode", FactType::Preference),
            SemanticMemory::new("Team deploys on Fridays", FactType::Fact),
        ];
        for fact in &facts {
            store.save(&fact.clone().into()).await.unwrap();
        }
        store
            .save(&ThemeMemory::new("Postgres", "Memories about Postgres").into())
            .await
            .unwrap();
        (store, facts)
    }

    #[tokio::test]
    async fn test_keyword_search_scores_and_filters() {
        let (store, facts) = seeded().await;
        let index = MemoryIndex::new(store);

        let results = index
            .search(
                "prefers dark mode",
                &IndexOptions::new().with_level(MemoryLevel::Semantic),
            )
            .await
            .unwrap();

        assert_eq!(results[0].record.id(), facts[0].id);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        // "dark mode" matches 2 of 3 tokens; the deploy fact matches nothing
        assert_eq!(results.len(), 2);
        assert!((results[1].score - 2.0 / 3.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_theme_name_is_searchable() {
        let (store, _) = seeded().await;
        let index = MemoryIndex::new(store);
        let results = index
            .search(
                "postgres preference",
                &IndexOptions::new().with_level(MemoryLevel::Theme),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_failing_provider_falls_back_to_keywords() {
        let (store, facts) = seeded().await;
        let index = MemoryIndex::new(store).with_provider(Arc::new(FailingProvider));

        let results = index
            .search("deploys fridays", &IndexOptions::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.id(), facts[2].id);
    }

    #[tokio::test]
    async fn test_embedding_search_finds_identical_text() {
        let (store, facts) = seeded().await;
        let index = MemoryIndex::new(store.clone()).with_provider(Arc::new(HashEmbeddingProvider::new(32)));

        let results = index
            .search("Team deploys on Fridays", &IndexOptions::new().with_limit(1))
            .await
            .unwrap();
        assert_eq!(results[0].record.id(), facts[2].id);
        assert!((results[0].score - 1.0).abs() < 1e-4);

        // Vectors were computed lazily and persisted
        assert!(store.get_embedding(&facts[0].id).await.unwrap().is_some());
        assert!(index.cached_len() >= 3);
        index.clear_cache();
        assert_eq!(index.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_find_similar_excludes_self() {
        let (store, facts) = seeded().await;
        let index = MemoryIndex::new(store);

        let similar = index
            .find_similar(
                &facts[0].id,
                &IndexOptions::new().with_level(MemoryLevel::Semantic),
            )
            .await
            .unwrap();
        assert!(similar.iter().all(|s| s.record.id() != facts[0].id));
        assert_eq!(similar[0].record.id(), facts[1].id);

        let with_self = index
            .find_similar(
                &facts[0].id,
                &IndexOptions::new()
                    .with_level(MemoryLevel::Semantic)
                    .with_exclude_self(false),
            )
            .await
            .unwrap();
        assert_eq!(with_self[0].record.id(), facts[0].id);

        assert!(index
            .find_similar("sem-missing", &IndexOptions::new())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_find_duplicates_uses_threshold() {
        let (store, facts) = seeded().await;
        let copy = SemanticMemory::new("user prefers DARK mode", FactType::Preference);
        store.save(&copy.clone().into()).await.unwrap();
        let index = MemoryIndex::new(store);

        let dupes = index.find_duplicates(&facts[0].id, 0.95).await.unwrap();
        assert_eq!(dupes.len(), 1);
        assert_eq!(dupes[0].id(), copy.id);
    }

    #[tokio::test]
    async fn test_index_without_provider_is_noop() {
        let (store, facts) = seeded().await;
        let index = MemoryIndex::new(store);
        assert!(!index.index_memory(&facts[0].id, "text").await.unwrap());
        assert_eq!(
            index
                .index_batch(&[(facts[0].id.clone(), "text".to_string())])
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_score_pair_keyword_fallback() {
        let (store, facts) = seeded().await;
        let index = MemoryIndex::new(store);
        let score = index
            .score_pair(&facts[1].clone().into(), &facts[0].clone().into())
            .await
            .unwrap();
        assert!((score - 0.75).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_provider_failing_mid_search_falls_back_to_keywords() {
        let (store, facts) = seeded().await;
        let index = MemoryIndex::new(store).with_provider(Arc::new(PartialProvider));
        let semantic = IndexOptions::new().with_level(MemoryLevel::Semantic);

        let similar = index.find_similar(&facts[0].id, &semantic).await.unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].record.id(), facts[1].id);
        assert!((similar[0].score - 0.75).abs() < 1e-6);

        let dupes = index.find_duplicates(&facts[0].id, 0.5).await.unwrap();
        assert_eq!(dupes.len(), 1);
        assert_eq!(dupes[0].id(), facts[1].id);

        let results = index.search("prefers dark mode", &semantic).await.unwrap();
        assert_eq!(results[0].record.id(), facts[0].id);
        assert_eq!(results.len(), 2);

        let score = index
            .score_pair(&facts[0].clone().into(), &facts[1].clone().into())
            .await
            .unwrap();
        assert!((score - 0.75).abs() < 1e-6);
    }
}
