//! The host-facing memory engine
//!
//! [`MemoryEngine`] owns one workspace's store and every component built on
//! top of it, and exposes the ten named operations. `remember` and
//! `consolidate` read theme and fact state before writing it back, so both
//! run behind a single async writer lock.

use crate::distill::{extract_entities, infer_fact_type, summarize};
use crate::error::{StrataError, StrataResult};
use crate::evolve::RulesFile;
use crate::scheduler::{ScheduledFn, ScheduledTask, Scheduler};
use crate::tools::{
    render_recall, ConsolidateResult, EvolveParams, EvolveResult, ForgetParams, ForgetResult,
    GraphOutput, GraphQuery, IntrospectParams, IntrospectResult, Operation, ReasonParams,
    RecallParams, RecallResult, ReflectResult, RelationView, RememberParams, RememberResult,
    RuleProposal, StatusResult, ThemeSummary, ToolResponse,
};
use chrono::Utc;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strata_graph::{
    AnalogyResult, CausalResult, InferenceRule, KnowledgeGraph, ReasoningEngine, ReasoningResult,
};
use strata_memory::text::keyword_score;
use strata_memory::{
    Conflict, ConflictDetector, EmbeddingProvider, EpisodeMemory, FactType, ForgettingEngine,
    InMemoryStorage, IndexOptions, Memory, MemoryConfig, MemoryIndex, MemoryLevel, MemoryRecord,
    MemoryStore, OriginalMemory, ScoredMemory, SemanticMemory, ThemeMemory,
};
use tokio::sync::Mutex;

/// Confidence given to facts when the caller supplies none
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Theme for facts that name no entity
const GENERAL_THEME: &str = "General";

/// Share of a theme's score inherited by its member facts during recall
const THEME_MEMBER_WEIGHT: f32 = 0.8;

/// Facts listed per theme by `reflect`
const TOP_FACTS_PER_THEME: usize = 3;

/// Builder for [`MemoryEngine`]
pub struct MemoryEngineBuilder {
    config: MemoryConfig,
    storage: Option<Arc<dyn Memory>>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    rules_file: Option<PathBuf>,
    rules: Vec<InferenceRule>,
}

impl Default for MemoryEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngineBuilder {
    /// Create a builder with default configuration and in-memory storage
    pub fn new() -> Self {
        Self {
            config: MemoryConfig::default(),
            storage: None,
            provider: None,
            rules_file: None,
            rules: Vec::new(),
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: MemoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the storage backend
    pub fn with_storage(mut self, storage: Arc<dyn Memory>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Enable embedding search. Without a provider the index scores by
    /// keyword overlap.
    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the rules file `evolve` appends to
    pub fn with_rules_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.rules_file = Some(path.into());
        self
    }

    /// Add an inference rule on top of the defaults
    pub fn with_inference_rule(mut self, rule: InferenceRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Build the engine, rebuilding the knowledge graph from stored facts
    pub async fn build(self) -> StrataResult<MemoryEngine> {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()) as Arc<dyn Memory>);
        let store = Arc::new(MemoryStore::new(storage, &self.config.workspace_id));

        let mut index = MemoryIndex::new(store.clone());
        if let Some(provider) = self.provider {
            index = index.with_provider(provider);
        }
        let index = Arc::new(index);

        let forgetting = ForgettingEngine::new(store.clone(), self.config.forgetting.clone());
        let conflicts =
            ConflictDetector::new(store.clone(), index.clone(), self.config.conflict.clone());

        let graph = Arc::new(KnowledgeGraph::new());
        let ingested = graph.rebuild(&store).await?;

        let reasoning = ReasoningEngine::new(graph.clone(), index.clone(), store.clone());
        for rule in self.rules {
            reasoning.add_rule(rule)?;
        }

        tracing::info!(
            workspace = %self.config.workspace_id,
            semantics = ingested,
            embeddings = index.has_provider(),
            "Memory engine ready"
        );

        Ok(MemoryEngine {
            config: self.config,
            store,
            index,
            forgetting,
            conflicts,
            graph,
            reasoning,
            rules_file: self.rules_file.map(RulesFile::new),
            write_lock: Mutex::new(()),
        })
    }
}

/// One workspace's memory, exposed as named operations
pub struct MemoryEngine {
    config: MemoryConfig,
    store: Arc<MemoryStore>,
    index: Arc<MemoryIndex>,
    forgetting: ForgettingEngine,
    conflicts: ConflictDetector,
    graph: Arc<KnowledgeGraph>,
    reasoning: ReasoningEngine,
    rules_file: Option<RulesFile>,
    write_lock: Mutex<()>,
}

impl MemoryEngine {
    /// Start building an engine
    pub fn builder() -> MemoryEngineBuilder {
        MemoryEngineBuilder::new()
    }

    /// Get the configuration
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Get the memory store
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Get the vector/keyword index
    pub fn index(&self) -> &Arc<MemoryIndex> {
        &self.index
    }

    /// Get the knowledge graph
    pub fn knowledge_graph(&self) -> &Arc<KnowledgeGraph> {
        &self.graph
    }

    /// Get the reasoning engine
    pub fn reasoning(&self) -> &ReasoningEngine {
        &self.reasoning
    }

    /// Get the forgetting engine
    pub fn forgetting(&self) -> &ForgettingEngine {
        &self.forgetting
    }

    /// Get the conflict detector
    pub fn conflict_detector(&self) -> &ConflictDetector {
        &self.conflicts
    }

    /// Get the rules file, if one is configured
    pub fn rules_file(&self) -> Option<&RulesFile> {
        self.rules_file.as_ref()
    }

    /// Run an operation by name with JSON parameters.
    ///
    /// Operation names may carry a `memory_` prefix. Parameterless operations
    /// accept `null`.
    pub async fn invoke(
        &self,
        operation: &str,
        params: serde_json::Value,
    ) -> StrataResult<ToolResponse> {
        let op: Operation = operation.parse()?;
        let response = match op {
            Operation::Remember => {
                ToolResponse::from_output(op, &self.remember(parse_params(op, params)?).await?)
            }
            Operation::Recall => {
                ToolResponse::from_output(op, &self.recall(parse_params(op, params)?).await?)
            }
            Operation::Reflect => ToolResponse::from_output(op, &self.reflect().await?),
            Operation::Introspect => {
                let params = parse_params_or_default(op, params)?;
                ToolResponse::from_output(op, &self.introspect(params).await?)
            }
            Operation::Consolidate => ToolResponse::from_output(op, &self.consolidate().await?),
            Operation::Status => ToolResponse::from_output(op, &self.status().await?),
            Operation::Evolve => {
                ToolResponse::from_output(op, &self.evolve(parse_params(op, params)?).await?)
            }
            Operation::Forget => {
                ToolResponse::from_output(op, &self.forget(parse_params(op, params)?).await?)
            }
            Operation::Reason => {
                ToolResponse::from_output(op, &self.reason(parse_params(op, params)?).await?)
            }
            Operation::Graph => {
                ToolResponse::from_output(op, &self.graph(parse_params(op, params)?))
            }
        };
        Ok(response)
    }

    /// Store an utterance at every level of the hierarchy.
    ///
    /// Always writes one Original and one Episode. The fact becomes a new
    /// Semantic unless a near-duplicate exists, in which case the duplicate
    /// is reinforced instead. The Semantic joins exactly one Theme, created
    /// if no existing theme names one of its entities. All writes commit
    /// together or not at all.
    pub async fn remember(&self, params: RememberParams) -> StrataResult<RememberResult> {
        let content = params.content.trim();
        if content.is_empty() {
            return Err(StrataError::invalid_params("remember", "content is empty"));
        }
        let confidence = params
            .confidence
            .unwrap_or(DEFAULT_CONFIDENCE)
            .clamp(0.0, 1.0);
        if confidence < self.config.write_confidence_threshold {
            return Err(StrataError::invalid_params(
                "remember",
                format!(
                    "confidence {:.2} is below the write threshold {:.2}",
                    confidence, self.config.write_confidence_threshold
                ),
            ));
        }
        let fact_type = params
            .fact_type
            .unwrap_or_else(|| infer_fact_type(content));
        let entities = match &params.entities {
            Some(given) => clean_entities(given),
            None => extract_entities(content),
        };

        let _writer = self.write_lock.lock().await;

        let mut original = OriginalMemory::new(content, params.session_id.as_str())
            .with_role(params.role);
        if let Some(importance) = params.importance {
            original = original.with_importance(importance);
        }
        if let Some(sentiment) = params.sentiment {
            original = original.with_sentiment(sentiment);
        }
        let episode = EpisodeMemory::new(summarize(content), vec![original.id.clone()])
            .with_span(original.timestamp, original.timestamp);

        let (semantic, consolidated, conflicts) =
            match self.find_duplicate(content, fact_type).await? {
                Some(mut existing) => {
                    existing.confidence = existing.confidence.max(confidence);
                    existing.episode_ids.push(episode.id.clone());
                    for entity in &entities {
                        if !existing
                            .entities
                            .iter()
                            .any(|e| e.eq_ignore_ascii_case(entity))
                        {
                            existing.entities.push(entity.clone());
                        }
                    }
                    (existing, true, Vec::new())
                }
                None => {
                    let mut fresh = SemanticMemory::new(content, fact_type)
                        .with_confidence(confidence)
                        .with_entities(entities)
                        .with_episodes(vec![episode.id.clone()]);
                    if let Some(validity) = params.validity {
                        fresh = fresh.with_validity(validity);
                    }
                    let conflicts = self.conflicts.detect(&fresh).await?;
                    fresh.conflicts_with = conflicts.iter().map(|c| c.first.id.clone()).collect();
                    (fresh, false, conflicts)
                }
            };

        let (theme, theme_created) = self.assign_theme(&semantic).await?;

        let records: [MemoryRecord; 4] = [
            original.into(),
            episode.into(),
            semantic.clone().into(),
            theme.clone().into(),
        ];
        let mut tx = self.store.begin();
        for record in &records {
            tx.save(record).await?;
        }
        for conflict in &conflicts {
            let mut other = conflict.first.clone();
            if !other.conflicts_with.contains(&semantic.id) {
                other.conflicts_with.push(semantic.id.clone());
                tx.save(&other.into()).await?;
            }
        }
        tx.commit().await?;

        let update = self.graph.update(&semantic);
        if self.index.has_provider() {
            let items: Vec<(String, String)> = records
                .iter()
                .map(|r| (r.id().to_string(), r.index_text()))
                .collect();
            if let Err(e) = self.index.index_batch(&items).await {
                tracing::warn!(error = %e, "Embedding new memories failed, keyword search still applies");
            }
        }

        tracing::info!(
            semantic = %semantic.id,
            theme = %theme.id,
            theme_created,
            consolidated,
            conflicts = conflicts.len(),
            new_entities = update.new_entities,
            "Memory stored"
        );

        Ok(RememberResult {
            original_id: records[0].id().to_string(),
            episode_id: records[1].id().to_string(),
            semantic_id: semantic.id,
            theme_id: theme.id,
            theme_name: theme.name,
            theme_created,
            consolidated,
            fact_type: semantic.fact_type,
            entities: semantic.entities,
            conflicts,
        })
    }

    /// Top-down retrieval: themes, then facts, then optionally episodes.
    ///
    /// Facts are direct index hits plus members of matched themes, which
    /// inherit part of their theme's score. Every returned record counts as
    /// accessed.
    pub async fn recall(&self, params: RecallParams) -> StrataResult<RecallResult> {
        let query = params.query.trim();
        if query.is_empty() {
            return Err(StrataError::invalid_params("recall", "query is empty"));
        }
        let retrieval = &self.config.retrieval;
        let top_themes = params.top_k_themes.unwrap_or(retrieval.top_k_themes);
        let top_semantics = params.top_k_semantics.unwrap_or(retrieval.top_k_semantics);
        let top_episodes = params.top_k_episodes.unwrap_or(retrieval.top_k_episodes);

        let themes = self
            .index
            .search(
                query,
                &IndexOptions::new()
                    .with_level(MemoryLevel::Theme)
                    .with_limit(top_themes)
                    .with_min_score(retrieval.min_score),
            )
            .await?;

        let direct = self
            .index
            .search(
                query,
                &IndexOptions::new()
                    .with_level(MemoryLevel::Semantic)
                    .with_limit(usize::MAX),
            )
            .await?;
        let mut direct_scores: HashMap<String, f32> = HashMap::new();
        let mut candidates: HashMap<String, ScoredMemory> = HashMap::new();
        for hit in direct {
            direct_scores.insert(hit.record.id().to_string(), hit.score);
            if hit.score >= retrieval.min_score {
                candidates.insert(hit.record.id().to_string(), hit);
            }
        }

        for theme_hit in &themes {
            let Some(theme) = theme_hit.record.as_theme() else {
                continue;
            };
            let inherited = theme_hit.score * THEME_MEMBER_WEIGHT;
            for id in &theme.semantic_ids {
                if let Some(existing) = candidates.get_mut(id) {
                    existing.score = existing.score.max(inherited);
                    continue;
                }
                let own = direct_scores.get(id).copied().unwrap_or(0.0);
                if let Some(stored) = self.store.peek(id, MemoryLevel::Semantic).await? {
                    candidates.insert(
                        id.clone(),
                        ScoredMemory {
                            record: stored.record,
                            score: own.max(inherited),
                        },
                    );
                }
            }
        }

        let mut semantics: Vec<ScoredMemory> = candidates.into_values().collect();
        semantics.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.record.id().cmp(b.record.id()))
        });
        semantics.truncate(top_semantics);

        let mut episodes = Vec::new();
        if params.include_episodes {
            let mut seen = HashSet::new();
            'facts: for hit in &semantics {
                let Some(fact) = hit.record.as_semantic() else {
                    continue;
                };
                for id in &fact.episode_ids {
                    if episodes.len() >= top_episodes {
                        break 'facts;
                    }
                    if !seen.insert(id.clone()) {
                        continue;
                    }
                    if let Some(stored) = self.store.peek(id, MemoryLevel::Episode).await? {
                        episodes.push(ScoredMemory {
                            record: stored.record,
                            score: hit.score,
                        });
                    }
                }
            }
        }

        for hit in themes.iter().chain(&semantics).chain(&episodes) {
            self.store.get(hit.record.id(), hit.record.level()).await?;
        }

        let best_score = themes
            .iter()
            .chain(&semantics)
            .map(|hit| hit.score)
            .fold(0.0_f32, f32::max);
        let uncertain = best_score < retrieval.uncertainty_threshold;
        let answer = render_recall(
            query,
            &themes,
            &semantics,
            &episodes,
            uncertain,
            retrieval.max_answer_tokens,
        );

        tracing::debug!(
            query = %query,
            themes = themes.len(),
            semantics = semantics.len(),
            episodes = episodes.len(),
            best_score,
            "Recall complete"
        );

        Ok(RecallResult {
            query: query.to_string(),
            themes,
            semantics,
            episodes,
            best_score,
            uncertain,
            answer,
        })
    }

    /// Summarize every theme and propose rules for the large ones
    pub async fn reflect(&self) -> StrataResult<ReflectResult> {
        let mut result = ReflectResult::default();

        for theme in self.themes().await? {
            let mut facts = Vec::new();
            for id in &theme.semantic_ids {
                if let Some(fact) = self.semantic(id).await? {
                    facts.push(fact);
                }
            }
            facts.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(Ordering::Equal)
            });
            let top_facts: Vec<String> = facts
                .iter()
                .take(TOP_FACTS_PER_THEME)
                .map(|f| f.content.clone())
                .collect();
            let size = facts.len();

            if size > self.config.theme.max_size {
                result.oversized.push(theme.name.clone());
            }
            if theme.coherence < self.config.theme.min_coherence {
                result.low_coherence.push(theme.name.clone());
            }
            if size > self.config.reflection.rule_min_theme_size {
                result.proposals.push(RuleProposal {
                    theme_id: theme.id.clone(),
                    theme_name: theme.name.clone(),
                    text: format!(
                        "When {} comes up, keep in mind: {}",
                        theme.name,
                        top_facts.join("; ")
                    ),
                });
            }

            result.themes.push(ThemeSummary {
                id: theme.id,
                name: theme.name,
                size,
                coherence: theme.coherence,
                top_facts,
            });
        }

        result.themes.sort_by(|a, b| b.size.cmp(&a.size));
        tracing::debug!(
            themes = result.themes.len(),
            proposals = result.proposals.len(),
            "Reflection complete"
        );
        Ok(result)
    }

    /// Store, decay, graph, and conflict health in one report
    pub async fn introspect(&self, params: IntrospectParams) -> StrataResult<IntrospectResult> {
        let threshold = params
            .at_risk_threshold
            .unwrap_or(self.config.forgetting.archive_threshold);
        Ok(IntrospectResult {
            store: self.store.stats().await?,
            forgetting: self.forgetting.get_stats().await?,
            at_risk: self.forgetting.get_at_risk_memories(threshold).await?,
            graph: self.graph.get_stats(),
            conflicts: self.conflicts.get_all_conflicts().await?,
        })
    }

    /// Resolve what can be resolved automatically and tidy themes.
    ///
    /// Runs the exhaustive conflict scan and applies destructive
    /// resolutions, then folds same-named themes into the oldest one and
    /// drops theme members whose facts no longer exist.
    pub async fn consolidate(&self) -> StrataResult<ConsolidateResult> {
        let _writer = self.write_lock.lock().await;

        let conflicts = self.conflicts.get_all_conflicts().await?;
        let applied = self.conflicts.auto_resolve(&conflicts).await?;
        let gone: HashSet<&str> = applied.values().filter_map(|r| r.discarded()).collect();
        let pending: Vec<Conflict> = conflicts
            .iter()
            .filter(|c| !applied.contains_key(&c.id))
            .filter(|c| !gone.contains(c.first.id.as_str()) && !gone.contains(c.second.id.as_str()))
            .cloned()
            .collect();

        let (themes_merged, dangling_pruned) = self.merge_themes().await?;
        if !applied.is_empty() {
            self.graph.rebuild(&self.store).await?;
        }

        let result = ConsolidateResult {
            conflicts_found: conflicts.len(),
            resolved: applied.into_iter().collect(),
            pending,
            themes_merged,
            dangling_pruned,
        };
        tracing::info!(
            conflicts = result.conflicts_found,
            resolved = result.resolved.len(),
            pending = result.pending.len(),
            themes_merged,
            dangling_pruned,
            "Consolidation complete"
        );
        Ok(result)
    }

    /// Record counts per level and graph size
    pub async fn status(&self) -> StrataResult<StatusResult> {
        let mut per_level = BTreeMap::new();
        for level in MemoryLevel::ALL {
            per_level.insert(level, self.store.count(Some(level)).await?);
        }
        let stats = self.graph.get_stats();
        Ok(StatusResult {
            workspace_id: self.config.workspace_id.clone(),
            total: per_level.values().sum(),
            per_level,
            entities: stats.entity_count,
            relations: stats.relation_count,
            rules_file: self.rules_file.as_ref().map(|r| r.path().to_path_buf()),
        })
    }

    /// Append rules to the rules file.
    ///
    /// Proposals from reflection that are already in the file are skipped;
    /// explicit rules are always appended.
    pub async fn evolve(&self, params: EvolveParams) -> StrataResult<EvolveResult> {
        let Some(rules) = &self.rules_file else {
            return Err(StrataError::invalid_params("evolve", "no rules file configured"));
        };

        let texts = match params {
            EvolveParams::AddRule { content } => vec![content],
            EvolveParams::FromReflection => {
                let existing: HashSet<String> = rules
                    .read_rules()
                    .await?
                    .iter()
                    .filter_map(|line| line.split_once("] ").map(|(_, text)| text.to_string()))
                    .collect();
                self.reflect()
                    .await?
                    .proposals
                    .into_iter()
                    .map(|p| p.text)
                    .filter(|text| !existing.contains(text))
                    .collect()
            }
        };

        let mut appended = Vec::with_capacity(texts.len());
        for text in texts {
            appended.push(rules.append(&text).await?);
        }
        Ok(EvolveResult { appended })
    }

    /// Delete one record, or sweep the store with the forgetting policy
    pub async fn forget(&self, params: ForgetParams) -> StrataResult<ForgetResult> {
        let result = match params {
            ForgetParams::ById { id } => {
                let id = id.trim();
                if id.is_empty() {
                    return Err(StrataError::invalid_params("forget", "id is empty"));
                }
                let level = self.store.locate(id).await?;
                let deleted = self.store.delete(id).await?;
                if deleted && level == Some(MemoryLevel::Semantic) {
                    self.graph.rebuild(&self.store).await?;
                }
                ForgetResult {
                    deleted: usize::from(deleted),
                    ..ForgetResult::default()
                }
            }
            ForgetParams::LowValue { threshold } => {
                let threshold = threshold.unwrap_or(self.config.forgetting.archive_threshold);
                let report = self.forgetting.archive_low_value(threshold).await?;
                if report.deleted > 0 {
                    self.graph.rebuild(&self.store).await?;
                }
                ForgetResult {
                    deleted: report.deleted,
                    archived: report.archived,
                    retained: report.retained,
                }
            }
        };
        Ok(result)
    }

    /// Multi-hop reasoning over the knowledge graph
    pub async fn reason(&self, params: ReasonParams) -> StrataResult<ReasoningResult> {
        Ok(self
            .reasoning
            .reason(params.query.trim(), params.max_hops)
            .await?)
    }

    /// Knowledge transferable from themes sharing entities with `theme_name`
    pub async fn analogy(&self, theme_name: &str) -> StrataResult<AnalogyResult> {
        Ok(self.reasoning.analogy(theme_name).await?)
    }

    /// Causes and effects of an event, from causal relations in the graph
    pub async fn causal_inference(&self, event: &str) -> StrataResult<CausalResult> {
        Ok(self.reasoning.causal_inference(event).await?)
    }

    /// Query the knowledge graph
    pub fn graph(&self, query: GraphQuery) -> GraphOutput {
        match query {
            GraphQuery::Entity { name } => {
                let entity = self.graph.get_entity(&name);
                let relations = entity
                    .as_ref()
                    .map(|entity| {
                        self.graph
                            .get_entity_relations(&entity.id)
                            .into_iter()
                            .filter_map(|relation| {
                                let other = relation
                                    .other_end(&entity.id)
                                    .and_then(|id| self.graph.get_entity_by_id(id))?;
                                Some(RelationView {
                                    relation_type: relation.relation_type,
                                    other: other.name,
                                    weight: relation.weight,
                                    evidence: relation.evidence,
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                GraphOutput::Entity { entity, relations }
            }
            GraphQuery::Path {
                source,
                target,
                max_hops,
            } => GraphOutput::Path {
                path: self.graph.find_path(&source, &target, max_hops),
            },
            GraphQuery::Related { name, max_depth } => {
                let entities = self
                    .graph
                    .get_entity(&name)
                    .map(|entity| self.graph.get_related_entities(&entity.id, max_depth))
                    .unwrap_or_default();
                GraphOutput::Related { name, entities }
            }
            GraphQuery::Stats => GraphOutput::Stats {
                stats: self.graph.get_stats(),
            },
        }
    }

    /// Run reflect then evolve on the configured interval.
    ///
    /// Returns `None` when auto-reflection is disabled. The job holds only a
    /// weak reference, so it stops doing work once the engine is dropped.
    pub fn start_auto_reflection(self: &Arc<Self>, scheduler: &dyn Scheduler) -> Option<ScheduledTask> {
        if !self.config.reflection.auto_reflect {
            return None;
        }
        let engine = Arc::downgrade(self);
        let task: ScheduledFn = Arc::new(move || {
            let engine = engine.clone();
            async move {
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                match engine.evolve(EvolveParams::FromReflection).await {
                    Ok(result) => {
                        tracing::info!(appended = result.appended.len(), "Auto-reflection complete")
                    }
                    Err(e) => tracing::warn!(error = %e, "Auto-reflection failed"),
                }
            }
            .boxed()
        });
        let interval = self.config.reflection.interval();
        tracing::info!(interval_secs = interval.as_secs(), "Auto-reflection scheduled");
        Some(scheduler.every(interval, task))
    }

    /// Run the low-value sweep every `period`
    pub fn start_forgetting_sweep(
        self: &Arc<Self>,
        scheduler: &dyn Scheduler,
        period: Duration,
    ) -> ScheduledTask {
        let engine = Arc::downgrade(self);
        let task: ScheduledFn = Arc::new(move || {
            let engine = engine.clone();
            async move {
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                match engine.forget(ForgetParams::LowValue { threshold: None }).await {
                    Ok(result) => tracing::info!(
                        deleted = result.deleted,
                        archived = result.archived,
                        "Forgetting sweep complete"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Forgetting sweep failed"),
                }
            }
            .boxed()
        });
        scheduler.every(period, task)
    }

    /// Existing fact with the same type that scores as a near-duplicate in
    /// both directions
    async fn find_duplicate(
        &self,
        content: &str,
        fact_type: FactType,
    ) -> StrataResult<Option<SemanticMemory>> {
        let threshold = self.config.duplicate_threshold as f32;
        let normalized = content.trim().to_lowercase();
        let hits = self
            .index
            .search(
                content,
                &IndexOptions::new()
                    .with_level(MemoryLevel::Semantic)
                    .with_limit(usize::MAX)
                    .with_min_score(threshold),
            )
            .await?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| hit.record.into_semantic())
            .find(|existing| {
                existing.fact_type == fact_type
                    && (existing.normalized_content() == normalized
                        || keyword_score(&existing.content, content) >= threshold)
            }))
    }

    /// The theme `semantic` belongs in, plus whether it is new.
    ///
    /// Preference order:
    ///
    /// 1. a theme already holding the fact (consolidated duplicates stay put)
    /// 2. a theme whose name equals one of its entities, case-insensitively
    /// 3. the first theme whose name or description mentions one
    /// 4. the single "General" theme, reused by every entity-less fact
    /// 5. a new theme named after the first entity
    ///
    /// An exact name match outranks an older theme that only mentions the
    /// entity in its description.
    async fn assign_theme(&self, semantic: &SemanticMemory) -> StrataResult<(ThemeMemory, bool)> {
        let themes = self.themes().await?;

        let existing = themes
            .iter()
            .find(|t| t.semantic_ids.contains(&semantic.id))
            .or_else(|| {
                semantic.entities.iter().find_map(|entity| {
                    themes
                        .iter()
                        .find(|t| t.name.trim().eq_ignore_ascii_case(entity.trim()))
                })
            })
            .or_else(|| {
                semantic
                    .entities
                    .iter()
                    .find_map(|entity| themes.iter().find(|t| t.mentions(entity)))
            })
            .or_else(|| {
                if semantic.entities.is_empty() {
                    themes.iter().find(|t| t.name == GENERAL_THEME)
                } else {
                    None
                }
            });

        let (mut theme, created) = match existing {
            Some(theme) => (theme.clone(), false),
            None => {
                let theme = match semantic.entities.first() {
                    Some(name) => ThemeMemory::new(
                        name.clone(),
                        format!("Memories about {}", semantic.entities.join(", ")),
                    ),
                    None => ThemeMemory::new(GENERAL_THEME, "Memories without a named entity"),
                };
                (theme, true)
            }
        };
        theme.append_semantic(&semantic.id, semantic.confidence);
        Ok((theme, created))
    }

    /// Fold same-named themes into the oldest and drop dangling members.
    /// Returns `(themes merged, members pruned)`.
    async fn merge_themes(&self) -> StrataResult<(usize, usize)> {
        let mut groups: BTreeMap<String, Vec<ThemeMemory>> = BTreeMap::new();
        for theme in self.themes().await? {
            groups
                .entry(theme.name.trim().to_lowercase())
                .or_default()
                .push(theme);
        }

        let mut merged = 0;
        let mut pruned = 0;
        let mut tx = self.store.begin();
        for group in groups.into_values() {
            let mut group = group.into_iter();
            let Some(mut target) = group.next() else {
                continue;
            };
            let mut changed = false;

            for duplicate in group {
                for id in &duplicate.semantic_ids {
                    if let Some(fact) = self.semantic(id).await? {
                        changed |= target.append_semantic(id, fact.confidence);
                    }
                }
                tx.delete(&duplicate.id, MemoryLevel::Theme).await?;
                merged += 1;
            }

            let mut live = Vec::with_capacity(target.semantic_ids.len());
            for id in &target.semantic_ids {
                if self.store.peek(id, MemoryLevel::Semantic).await?.is_some() {
                    live.push(id.clone());
                }
            }
            if live.len() != target.semantic_ids.len() {
                pruned += target.semantic_ids.len() - live.len();
                target.semantic_ids = live;
                changed = true;
            }

            if changed {
                target.updated_at = Utc::now();
                tx.save(&target.into()).await?;
            }
        }
        if !tx.is_empty() {
            tx.commit().await?;
        }
        Ok((merged, pruned))
    }

    /// All themes, oldest first
    async fn themes(&self) -> StrataResult<Vec<ThemeMemory>> {
        Ok(self
            .store
            .list(Some(MemoryLevel::Theme))
            .await?
            .into_iter()
            .filter_map(|stored| stored.record.into_theme())
            .collect())
    }

    /// A stored fact without counting the read as an access
    async fn semantic(&self, id: &str) -> StrataResult<Option<SemanticMemory>> {
        Ok(self
            .store
            .peek(id, MemoryLevel::Semantic)
            .await?
            .and_then(|stored| stored.record.into_semantic()))
    }
}

/// Trim, drop blanks, and deduplicate case-insensitively
fn clean_entities(entities: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    entities
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty() && seen.insert(e.to_lowercase()))
        .map(str::to_string)
        .collect()
}

fn parse_params<T: DeserializeOwned>(op: Operation, params: serde_json::Value) -> StrataResult<T> {
    serde_json::from_value(params)
        .map_err(|e| StrataError::invalid_params(op.as_str(), e.to_string()))
}

fn parse_params_or_default<T: DeserializeOwned + Default>(
    op: Operation,
    params: serde_json::Value,
) -> StrataResult<T> {
    if params.is_null() {
        Ok(T::default())
    } else {
        parse_params(op, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_memory::HashEmbeddingProvider;

    async fn engine() -> MemoryEngine {
        MemoryEngine::builder()
            .with_config(MemoryConfig::new("engine-test"))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_remember_writes_one_record_per_level() {
        let engine = engine().await;
        let result = engine
            .remember(RememberParams::new("We moved the billing service to Postgres. It went well."))
            .await
            .unwrap();

        assert!(result.theme_created);
        assert!(!result.consolidated);
        assert_eq!(result.fact_type, FactType::Event);
        assert_eq!(result.entities, vec!["Postgres"]);

        let status = engine.status().await.unwrap();
        assert_eq!(status.total, 4);
        for level in MemoryLevel::ALL {
            assert_eq!(status.per_level[&level], 1);
        }

        let episode = engine
            .store()
            .peek(&result.episode_id, MemoryLevel::Episode)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            episode.record.primary_text(),
            "We moved the billing service to Postgres."
        );
    }

    #[tokio::test]
    async fn test_second_fact_joins_existing_theme() {
        let engine = engine().await;
        let first = engine
            .remember(RememberParams::new("Postgres runs on port 5432").with_entities(["Postgres"]))
            .await
            .unwrap();
        let second = engine
            .remember(RememberParams::new("Postgres backups run nightly").with_entities(["postgres"]))
            .await
            .unwrap();

        assert!(first.theme_created);
        assert!(!second.theme_created);
        assert_eq!(first.theme_id, second.theme_id);

        let theme = engine
            .store()
            .peek(&first.theme_id, MemoryLevel::Theme)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(theme.record.child_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_entityless_facts_share_general_theme() {
        let engine = engine().await;
        let first = engine
            .remember(RememberParams::new("the build takes ten minutes"))
            .await
            .unwrap();
        let second = engine
            .remember(RememberParams::new("tests are flaky on mondays"))
            .await
            .unwrap();
        assert_eq!(first.theme_name, GENERAL_THEME);
        assert_eq!(first.theme_id, second.theme_id);
    }

    #[tokio::test]
    async fn test_exact_theme_name_beats_earlier_mention() {
        let engine = engine().await;
        let first = engine
            .remember(RememberParams::new("Alice works at Acme").with_entities(["Alice", "Acme"]))
            .await
            .unwrap();
        assert_eq!(first.theme_name, "Alice");

        let acme = ThemeMemory::new("Acme", "Rocket company");
        engine.store().save(&acme.clone().into()).await.unwrap();

        let second = engine
            .remember(RememberParams::new("Acme hires engineers").with_entities(["acme"]))
            .await
            .unwrap();
        assert!(!second.theme_created);
        assert_eq!(second.theme_id, acme.id);
    }

    #[tokio::test]
    async fn test_exact_duplicate_is_consolidated() {
        let engine = engine().await;
        let first = engine
            .remember(
                RememberParams::new("User prefers dark mode")
                    .with_fact_type(FactType::Preference)
                    .with_confidence(0.6),
            )
            .await
            .unwrap();
        let second = engine
            .remember(
                RememberParams::new("user prefers dark mode  ")
                    .with_fact_type(FactType::Preference)
                    .with_confidence(0.9)
                    .with_entities(["Editor"]),
            )
            .await
            .unwrap();

        assert!(second.consolidated);
        assert_eq!(first.semantic_id, second.semantic_id);
        assert!(second.conflicts.is_empty());

        let fact = engine.semantic(&first.semantic_id).await.unwrap().unwrap();
        assert!((fact.confidence - 0.9).abs() < 1e-9);
        assert_eq!(fact.episode_ids, vec![first.episode_id, second.episode_id]);
        assert!(fact.entities.iter().any(|e| e == "Editor"));
        assert_eq!(second.theme_id, first.theme_id);

        let status = engine.status().await.unwrap();
        assert_eq!(status.per_level[&MemoryLevel::Semantic], 1);
        assert_eq!(status.per_level[&MemoryLevel::Original], 2);
        assert_eq!(status.per_level[&MemoryLevel::Episode], 2);
    }

    #[tokio::test]
    async fn test_remember_rejects_empty_and_low_confidence() {
        let engine = MemoryEngine::builder()
            .with_config(MemoryConfig::new("strict").with_write_confidence_threshold(0.4))
            .build()
            .await
            .unwrap();

        let empty = engine.remember(RememberParams::new("   ")).await;
        assert!(matches!(empty, Err(StrataError::InvalidParams { .. })));

        let weak = engine
            .remember(RememberParams::new("Maybe Rust").with_confidence(0.2))
            .await;
        assert!(matches!(weak, Err(StrataError::InvalidParams { .. })));
        assert_eq!(engine.status().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_recall_is_top_down_and_flags_uncertainty() {
        let engine = engine().await;
        engine
            .remember(RememberParams::new("User prefers Postgres for analytics").with_entities(["Postgres"]))
            .await
            .unwrap();

        let hit = engine
            .recall(RecallParams::new("postgres analytics").with_episodes())
            .await
            .unwrap();
        assert_eq!(hit.themes.len(), 1);
        assert_eq!(hit.semantics.len(), 1);
        assert_eq!(hit.episodes.len(), 1);
        assert!(!hit.uncertain);
        assert!(hit.answer.contains("Themes:"));

        let miss = engine.recall(RecallParams::new("kubernetes")).await.unwrap();
        assert!(miss.is_empty());
        assert!(miss.uncertain);
        assert_eq!(miss.answer, "No memories found for \"kubernetes\".");
    }

    #[tokio::test]
    async fn test_recall_counts_as_access() {
        let engine = engine().await;
        let stored = engine
            .remember(RememberParams::new("Redis caches sessions").with_entities(["Redis"]))
            .await
            .unwrap();
        engine.recall(RecallParams::new("redis sessions")).await.unwrap();

        let fact = engine
            .store()
            .peek(&stored.semantic_id, MemoryLevel::Semantic)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fact.access.access_count, 1);
    }

    #[tokio::test]
    async fn test_reflect_proposes_rules_for_large_themes() {
        let engine = engine().await;
        let facts = [
            "Acme ships on fridays",
            "Acme hires remote engineers",
            "Acme sells industrial anvils",
            "Acme headquarters moved downtown",
            "Acme invoices quarterly",
            "Acme founders studied physics",
        ];
        for (i, fact) in facts.iter().enumerate() {
            engine
                .remember(
                    RememberParams::new(*fact)
                        .with_entities(["Acme"])
                        .with_fact_type(FactType::Fact)
                        .with_confidence(0.5 + i as f64 * 0.05),
                )
                .await
                .unwrap();
        }

        let reflection = engine.reflect().await.unwrap();
        assert_eq!(reflection.themes.len(), 1);
        assert_eq!(reflection.themes[0].size, 6);
        assert_eq!(reflection.themes[0].top_facts[0], "Acme founders studied physics");
        assert_eq!(reflection.proposals.len(), 1);
        assert!(reflection.proposals[0].text.starts_with("When Acme comes up"));
    }

    #[tokio::test]
    async fn test_consolidate_merges_same_named_themes() {
        let engine = engine().await;
        let kept = engine
            .remember(RememberParams::new("Acme ships weekly").with_entities(["Acme"]))
            .await
            .unwrap();

        // A second theme with the same name, as two racing writers would leave
        let fact = SemanticMemory::new("Acme hires remotely", FactType::Fact)
            .with_entities(vec!["Acme".into()]);
        let mut twin = ThemeMemory::new("acme", "Duplicate");
        twin.append_semantic(&fact.id, fact.confidence);
        twin.append_semantic("semantic-gone", 0.5);
        engine.store().save(&fact.clone().into()).await.unwrap();
        engine.store().save(&twin.into()).await.unwrap();

        let result = engine.consolidate().await.unwrap();
        assert_eq!(result.themes_merged, 1);
        assert_eq!(result.dangling_pruned, 0);

        let themes = engine.themes().await.unwrap();
        assert_eq!(themes.len(), 1);
        assert_eq!(themes[0].id, kept.theme_id);
        assert!(themes[0].semantic_ids.contains(&fact.id));
        assert!(!themes[0].semantic_ids.iter().any(|id| id == "semantic-gone"));
    }

    #[tokio::test]
    async fn test_forget_by_id_updates_graph() {
        let engine = engine().await;
        let stored = engine
            .remember(RememberParams::new("Alice works at Acme").with_entities(["Alice", "Acme"]))
            .await
            .unwrap();
        assert!(engine.knowledge_graph().get_entity("alice").is_some());

        let first = engine
            .forget(ForgetParams::ById {
                id: stored.semantic_id.clone(),
            })
            .await
            .unwrap();
        let second = engine
            .forget(ForgetParams::ById {
                id: stored.semantic_id,
            })
            .await
            .unwrap();
        assert_eq!(first.deleted, 1);
        assert_eq!(second.deleted, 0);
        assert!(engine.knowledge_graph().get_entity("alice").is_none());
    }

    #[tokio::test]
    async fn test_graph_rebuilt_on_build() {
        let storage: Arc<dyn Memory> = Arc::new(InMemoryStorage::new());
        let first = MemoryEngine::builder()
            .with_storage(storage.clone())
            .build()
            .await
            .unwrap();
        first
            .remember(RememberParams::new("Alice likes Rust").with_entities(["Alice", "Rust"]))
            .await
            .unwrap();
        drop(first);

        let second = MemoryEngine::builder().with_storage(storage).build().await.unwrap();
        let output = second.graph(GraphQuery::Entity {
            name: "Alice".into(),
        });
        match output {
            GraphOutput::Entity {
                entity: Some(entity),
                relations,
            } => {
                assert_eq!(entity.name, "Alice");
                assert_eq!(relations.len(), 1);
                assert_eq!(relations[0].other, "Rust");
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_embedding_provider_indexes_new_records() {
        let engine = MemoryEngine::builder()
            .with_embedding_provider(Arc::new(HashEmbeddingProvider::default()))
            .build()
            .await
            .unwrap();
        let stored = engine
            .remember(RememberParams::new("Rust compiles to native code"))
            .await
            .unwrap();
        assert!(engine
            .store()
            .get_embedding(&stored.semantic_id)
            .await
            .unwrap()
            .is_some());
        assert_eq!(engine.index().cached_len(), 4);
    }

    #[tokio::test]
    async fn test_auto_reflection_respects_flag() {
        let scheduler = crate::scheduler::TokioScheduler::new();
        let disabled = Arc::new(engine().await);
        assert!(disabled.start_auto_reflection(&scheduler).is_none());

        let config = MemoryConfig::new("auto").with_reflection(
            strata_memory::ReflectionConfig::default().with_auto_reflect(true),
        );
        let enabled = Arc::new(MemoryEngine::builder().with_config(config).build().await.unwrap());
        let task = enabled.start_auto_reflection(&scheduler).unwrap();
        assert!(!task.is_cancelled());
        task.shutdown().await;
    }

    #[tokio::test]
    async fn test_invoke_dispatches_by_name() {
        let engine = engine().await;
        let response = engine
            .invoke(
                "memory_remember",
                serde_json::json!({"content": "Bob prefers tea", "entities": ["Bob"]}),
            )
            .await
            .unwrap();
        assert_eq!(response.operation, Operation::Remember);
        assert_eq!(response.data["theme_name"], "Bob");
        assert!(response.text.contains("new theme 'Bob'"));

        let status = engine.invoke("status", serde_json::Value::Null).await.unwrap();
        assert_eq!(status.data["total"], 4);

        let bad = engine.invoke("recall", serde_json::json!({"limit": 3})).await;
        assert!(matches!(bad, Err(StrataError::InvalidParams { .. })));
        assert!(engine.invoke("evolve", serde_json::json!({"action": "add_rule", "content": "x"})).await.is_err());
    }
}
