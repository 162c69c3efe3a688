//! Multi-hop reasoning over the knowledge graph and memory index
//!
//! `reason` answers a free-text query in five passes:
//!
//! 1. match known entity names (single words and bigrams) in the query
//! 2. pull up to five themes from the index and seed evidence with their facts
//! 3. hop outward along relations, collecting linked facts and paths between
//!    query entities, decaying confidence per hop
//! 4. fire inference rules on every relation seen
//! 5. assemble a template answer from the top evidence and inferences

use crate::error::GraphResult;
use crate::extract::candidate_phrases;
use crate::knowledge::KnowledgeGraph;
use crate::rules::{default_rules, InferenceRule};
use crate::types::{Entity, GraphPath, Relation, RelationType};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use strata_memory::text::truncate;
use strata_memory::{IndexOptions, MemoryIndex, MemoryLevel, MemoryRecord, MemoryStore};

const THEME_LIMIT: usize = 5;
const PATH_HOPS_PER_ROUND: usize = 2;
const SNIPPET_CHARS: usize = 100;

/// One pass of the reasoning loop, for tracing how an answer was built
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ReasoningStep {
    /// 0 for setup passes, then 1-based hop number
    pub hop: usize,
    pub description: String,
    pub entities: Vec<String>,
    pub memories_found: usize,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ReasoningResult {
    pub query: String,
    pub answer: String,
    pub steps: Vec<ReasoningStep>,
    pub confidence: f32,

    /// Supporting facts, deduplicated by id
    pub evidence: Vec<MemoryRecord>,
    pub paths: Vec<GraphPath>,
    pub inferences: Vec<String>,

    /// Known entities matched in the query
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ThemeMatch {
    pub id: String,
    pub name: String,
    pub shared_entities: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AnalogyResult {
    pub source_theme: String,
    pub similar_themes: Vec<ThemeMatch>,
    pub transferable_knowledge: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CausalResult {
    pub event: String,
    pub causes: Vec<String>,
    pub effects: Vec<String>,

    /// `effect <- cause` links
    pub chain: Vec<String>,
}

/// Answers queries by walking the knowledge graph
pub struct ReasoningEngine {
    graph: Arc<KnowledgeGraph>,
    index: Arc<MemoryIndex>,
    store: Arc<MemoryStore>,
    rules: RwLock<Vec<InferenceRule>>,
}

impl ReasoningEngine {
    /// Create an engine with the default rule table
    pub fn new(graph: Arc<KnowledgeGraph>, index: Arc<MemoryIndex>, store: Arc<MemoryStore>) -> Self {
        Self {
            graph,
            index,
            store,
            rules: RwLock::new(default_rules()),
        }
    }

    /// Register an extra inference rule
    pub fn add_rule(&self, rule: InferenceRule) -> GraphResult<()> {
        rule.validate()?;
        tracing::debug!(rule = %rule.name, "Inference rule added");
        self.rules.write().push(rule);
        Ok(())
    }

    pub fn rules(&self) -> Vec<InferenceRule> {
        self.rules.read().clone()
    }

    /// Known entities named in `query`, in order of appearance
    pub fn extract_entities(&self, query: &str) -> Vec<Entity> {
        let mut seen = HashSet::new();
        candidate_phrases(query)
            .iter()
            .filter_map(|phrase| self.graph.get_entity(phrase))
            .filter(|entity| seen.insert(entity.id.clone()))
            .collect()
    }

    pub async fn reason(&self, query: &str, max_hops: usize) -> GraphResult<ReasoningResult> {
        let mut steps = Vec::new();
        let mut evidence: Vec<MemoryRecord> = Vec::new();
        let mut seen_evidence: HashSet<String> = HashSet::new();

        let query_entities = self.extract_entities(query);
        let entity_names: Vec<String> = query_entities.iter().map(|e| e.name.clone()).collect();
        steps.push(ReasoningStep {
            hop: 0,
            description: format!("Matched {} known entities in the query", query_entities.len()),
            entities: entity_names.clone(),
            memories_found: 0,
        });

        let theme_options = IndexOptions::new()
            .with_level(MemoryLevel::Theme)
            .with_limit(THEME_LIMIT);
        let themes = self.index.search(query, &theme_options).await?;
        let mut from_themes = 0;
        for hit in &themes {
            if let Some(theme) = hit.record.as_theme() {
                for id in &theme.semantic_ids {
                    if self.collect(id, &mut seen_evidence, &mut evidence).await? {
                        from_themes += 1;
                    }
                }
            }
        }
        steps.push(ReasoningStep {
            hop: 0,
            description: format!("Retrieved {} related themes", themes.len()),
            entities: Vec::new(),
            memories_found: from_themes,
        });

        let mut confidence: f32 = if !query_entities.is_empty() {
            1.0
        } else {
            themes.first().map_or(0.0, |hit| hit.score)
        };

        let mut paths: Vec<GraphPath> = Vec::new();
        let mut relations: Vec<Relation> = Vec::new();
        let mut seen_relations: HashSet<String> = HashSet::new();
        let mut visited: HashSet<String> = query_entities.iter().map(|e| e.id.clone()).collect();
        let mut frontier = query_entities.clone();

        for hop in 0..max_hops {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            let mut found = 0;

            for entity in &frontier {
                for relation in self.graph.get_entity_relations(&entity.id) {
                    for id in &relation.evidence {
                        if self.collect(id, &mut seen_evidence, &mut evidence).await? {
                            found += 1;
                        }
                    }
                    let other = relation
                        .other_end(&entity.id)
                        .and_then(|id| self.graph.get_entity_by_id(id));
                    if let Some(other) = other {
                        for id in &other.semantic_ids {
                            if self.collect(id, &mut seen_evidence, &mut evidence).await? {
                                found += 1;
                            }
                        }
                        if visited.insert(other.id.clone()) {
                            next.push(other);
                        }
                    }
                    if seen_relations.insert(relation.id.clone()) {
                        relations.push(relation);
                    }
                }
            }

            for (i, a) in query_entities.iter().enumerate() {
                for b in &query_entities[i + 1..] {
                    if let Some(path) = self.graph.find_path(&a.name, &b.name, PATH_HOPS_PER_ROUND) {
                        if !paths.iter().any(|p| same_route(p, &path)) {
                            paths.push(path);
                        }
                    }
                }
            }

            steps.push(ReasoningStep {
                hop: hop + 1,
                description: format!(
                    "Followed relations from {} entities, found {} new memories",
                    frontier.len(),
                    found
                ),
                entities: next.iter().map(|e| e.name.clone()).collect(),
                memories_found: found,
            });

            if found == 0 {
                break;
            }
            confidence *= (1.0 - hop as f32 * 0.2).max(0.5);
            frontier = next;
        }

        let inferences = self.apply_rules(&relations, &mut confidence);
        let answer = synthesize(query, &evidence, &inferences, paths.len());

        tracing::debug!(
            query = %query,
            entities = entity_names.len(),
            evidence = evidence.len(),
            paths = paths.len(),
            confidence = confidence,
            "Reasoning complete"
        );

        Ok(ReasoningResult {
            query: query.to_string(),
            answer,
            steps,
            confidence: confidence.clamp(0.0, 1.0),
            evidence,
            paths,
            inferences,
            entities: entity_names,
        })
    }

    /// Themes whose facts share at least two entities with the depth-2
    /// neighborhood of `source_theme_name`'s entity
    pub async fn analogy(&self, source_theme_name: &str) -> GraphResult<AnalogyResult> {
        let mut result = AnalogyResult {
            source_theme: source_theme_name.to_string(),
            ..AnalogyResult::default()
        };

        let Some(anchor) = self.graph.get_entity(source_theme_name) else {
            return Ok(result);
        };
        let mut neighborhood: BTreeSet<String> = self
            .graph
            .get_related_entities(&anchor.id, 2)
            .into_iter()
            .map(|e| e.normalized_name())
            .collect();
        neighborhood.insert(anchor.normalized_name());

        let themes: Vec<_> = self
            .store
            .list(Some(MemoryLevel::Theme))
            .await?
            .into_iter()
            .filter_map(|s| s.record.into_theme())
            .collect();

        let source = themes
            .iter()
            .find(|t| t.name.trim().eq_ignore_ascii_case(source_theme_name.trim()));
        let source_facts = match source {
            Some(theme) => self.semantic_texts(&theme.semantic_ids).await?,
            None => Vec::new(),
        };

        for theme in &themes {
            if Some(theme.id.as_str()) == source.map(|s| s.id.as_str()) {
                continue;
            }
            let referenced = self.referenced_entities(&theme.semantic_ids).await?;
            let shared: Vec<String> = referenced.intersection(&neighborhood).cloned().collect();
            if shared.len() < 2 {
                continue;
            }

            for fact in source_facts.iter().take(3) {
                result
                    .transferable_knowledge
                    .push(format!("'{}' may also hold for {}", fact, theme.name));
            }
            result.similar_themes.push(ThemeMatch {
                id: theme.id.clone(),
                name: theme.name.clone(),
                shared_entities: shared,
            });
        }

        Ok(result)
    }

    /// Causes and effects reachable through `caused_by` relations of the
    /// entities in facts matching `event_description`
    pub async fn causal_inference(&self, event_description: &str) -> GraphResult<CausalResult> {
        let mut result = CausalResult {
            event: event_description.to_string(),
            ..CausalResult::default()
        };

        let options = IndexOptions::new()
            .with_level(MemoryLevel::Semantic)
            .with_limit(5);
        let hits = self.index.search(event_description, &options).await?;

        let mut entity_names: BTreeSet<String> = BTreeSet::new();
        for hit in &hits {
            if let Some(semantic) = hit.record.as_semantic() {
                entity_names.extend(semantic.entities.iter().cloned());
            }
        }

        let mut seen = HashSet::new();
        for name in &entity_names {
            let Some(entity) = self.graph.get_entity(name) else {
                continue;
            };
            for relation in self.graph.get_entity_relations(&entity.id) {
                if relation.relation_type != RelationType::CausedBy || !seen.insert(relation.id.clone()) {
                    continue;
                }
                // source is caused by target
                let effect = self.graph.get_entity_by_id(&relation.source_id);
                let cause = self.graph.get_entity_by_id(&relation.target_id);
                let (Some(effect), Some(cause)) = (effect, cause) else {
                    continue;
                };
                push_unique(&mut result.causes, cause.name.clone());
                push_unique(&mut result.effects, effect.name.clone());
                result.chain.push(format!("{} <- {}", effect.name, cause.name));
            }
        }

        Ok(result)
    }

    fn apply_rules(&self, relations: &[Relation], confidence: &mut f32) -> Vec<String> {
        let rules = self.rules.read();
        let mut inferences: Vec<String> = Vec::new();

        for relation in relations {
            let source = self.graph.get_entity_by_id(&relation.source_id);
            let target = self.graph.get_entity_by_id(&relation.target_id);
            let (Some(source), Some(target)) = (source, target) else {
                continue;
            };
            for rule in rules.iter() {
                if let Some(conclusion) = rule.apply(relation, &source, &target) {
                    if !inferences.contains(&conclusion) {
                        *confidence *= rule.confidence;
                        inferences.push(conclusion);
                    }
                }
            }
        }

        inferences
    }

    /// Add a stored semantic to the evidence once. `false` if already
    /// collected or no longer stored.
    async fn collect(
        &self,
        id: &str,
        seen: &mut HashSet<String>,
        evidence: &mut Vec<MemoryRecord>,
    ) -> GraphResult<bool> {
        if !seen.insert(id.to_string()) {
            return Ok(false);
        }
        match self.store.peek(id, MemoryLevel::Semantic).await? {
            Some(stored) => {
                evidence.push(stored.record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn semantic_texts(&self, ids: &[String]) -> GraphResult<Vec<String>> {
        let mut texts = Vec::new();
        for id in ids {
            if let Some(stored) = self.store.peek(id, MemoryLevel::Semantic).await? {
                texts.push(stored.record.primary_text().to_string());
            }
        }
        Ok(texts)
    }

    async fn referenced_entities(&self, ids: &[String]) -> GraphResult<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        for id in ids {
            if let Some(stored) = self.store.peek(id, MemoryLevel::Semantic).await? {
                if let Some(semantic) = stored.record.as_semantic() {
                    names.extend(semantic.entities.iter().map(|e| e.trim().to_lowercase()));
                }
            }
        }
        Ok(names)
    }
}

fn same_route(a: &GraphPath, b: &GraphPath) -> bool {
    a.entities.len() == b.entities.len()
        && a.entities.iter().zip(&b.entities).all(|(x, y)| x.id == y.id)
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

fn synthesize(query: &str, evidence: &[MemoryRecord], inferences: &[String], path_count: usize) -> String {
    if evidence.is_empty() && inferences.is_empty() && path_count == 0 {
        return format!("No relevant memories found for \"{}\".", query);
    }

    let mut parts = Vec::new();
    if !evidence.is_empty() {
        let snippets: Vec<String> = evidence
            .iter()
            .take(3)
            .map(|r| truncate(r.primary_text(), SNIPPET_CHARS))
            .collect();
        parts.push(format!("Based on memory: {}.", snippets.join("; ")));
    }
    if !inferences.is_empty() {
        let top: Vec<&str> = inferences.iter().take(2).map(String::as_str).collect();
        parts.push(format!("Inferred: {}.", top.join("; ")));
    }
    if path_count > 0 {
        parts.push(format!("Found {} connecting path(s) between the entities.", path_count));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_memory::{FactType, InMemoryStorage, SemanticMemory, ThemeMemory};

    struct Fixture {
        store: Arc<MemoryStore>,
        graph: Arc<KnowledgeGraph>,
        engine: ReasoningEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new(Arc::new(InMemoryStorage::new()), "reason"));
        let index = Arc::new(MemoryIndex::new(store.clone()));
        let graph = Arc::new(KnowledgeGraph::new());
        let engine = ReasoningEngine::new(graph.clone(), index, store.clone());
        Fixture { store, graph, engine }
    }

    async fn ingest(f: &Fixture, content: &str, fact_type: FactType, entities: &[&str]) -> SemanticMemory {
        let semantic = SemanticMemory::new(content, fact_type)
            .with_entities(entities.iter().map(|e| e.to_string()).collect());
        f.store.save(&semantic.clone().into()).await.unwrap();
        f.graph.update(&semantic);
        semantic
    }

    #[tokio::test]
    async fn test_unknown_entities_yield_empty_result() {
        let f = fixture();
        ingest(&f, "User prefers dark mode", FactType::Preference, &["User", "dark mode"]).await;

        let result = f.engine.reason("What is the weather on Jupiter?", 3).await.unwrap();
        assert!(result.entities.is_empty());
        assert!(result.evidence.is_empty());
        assert!(result.paths.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert!(result.answer.contains("No relevant memories"));
    }

    #[tokio::test]
    async fn test_reason_follows_relations_and_fires_rules() {
        let f = fixture();
        let pref = ingest(&f, "User prefers dark mode", FactType::Preference, &["User", "dark mode"]).await;
        let fact = ingest(&f, "dark mode is related to OLED screens", FactType::Fact, &["dark mode", "OLED"]).await;

        let result = f.engine.reason("Does the user like dark mode?", 3).await.unwrap();

        assert_eq!(result.entities, vec!["User".to_string(), "dark mode".to_string()]);
        let ids: Vec<&str> = result.evidence.iter().map(|r| r.id()).collect();
        assert!(ids.contains(&pref.id.as_str()));
        assert!(ids.contains(&fact.id.as_str()));
        assert_eq!(ids.len(), 2);

        assert_eq!(result.paths.len(), 1);
        assert_eq!(result.paths[0].hops(), 1);

        assert!(result
            .inferences
            .iter()
            .any(|i| i == "User may also prefer things related to dark mode"));
        assert!(result.answer.starts_with("Based on memory:"));
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
        assert!(result.steps.iter().any(|s| s.hop == 1));
    }

    #[tokio::test]
    async fn test_zero_hops_skips_traversal() {
        let f = fixture();
        ingest(&f, "Alice and Bob", FactType::Fact, &["Alice", "Bob"]).await;
        let result = f.engine.reason("Alice", 0).await.unwrap();
        assert_eq!(result.entities, vec!["Alice".to_string()]);
        assert!(result.evidence.is_empty());
        assert!(result.steps.iter().all(|s| s.hop == 0));
    }

    #[tokio::test]
    async fn test_theme_evidence_seeds_result() {
        let f = fixture();
        let sem = ingest(&f, "Postgres runs the billing database", FactType::Fact, &["Postgres"]).await;
        let mut theme = ThemeMemory::new("Postgres", "Memories about Postgres");
        theme.append_semantic(&sem.id, sem.confidence);
        f.store.save(&theme.into()).await.unwrap();

        let result = f.engine.reason("tell me about postgres", 2).await.unwrap();
        assert_eq!(result.evidence.len(), 1);
        assert!(result.answer.contains("Postgres runs the billing database"));
    }

    #[tokio::test]
    async fn test_causal_inference() {
        let f = fixture();
        ingest(&f, "Outage caused by DNS misconfiguration", FactType::Event, &["Outage", "DNS"]).await;

        let result = f.engine.causal_inference("outage yesterday").await.unwrap();
        assert_eq!(result.effects, vec!["Outage".to_string()]);
        assert_eq!(result.causes, vec!["DNS".to_string()]);
        assert_eq!(result.chain, vec!["Outage <- DNS".to_string()]);
    }

    #[tokio::test]
    async fn test_analogy_finds_overlapping_theme() {
        let f = fixture();
        let a = ingest(&f, "Rust pairs with Tokio and Serde", FactType::Fact, &["Rust", "Tokio", "Serde"]).await;
        let b = ingest(&f, "Axum builds on Tokio and Serde", FactType::Fact, &["Axum", "Tokio", "Serde"]).await;

        let mut rust = ThemeMemory::new("Rust", "Memories about Rust");
        rust.append_semantic(&a.id, 0.5);
        let mut axum = ThemeMemory::new("Axum", "Memories about Axum");
        axum.append_semantic(&b.id, 0.5);
        f.store.save(&rust.into()).await.unwrap();
        f.store.save(&axum.clone().into()).await.unwrap();

        let result = f.engine.analogy("Rust").await.unwrap();
        assert_eq!(result.similar_themes.len(), 1);
        assert_eq!(result.similar_themes[0].id, axum.id);
        assert!(result.similar_themes[0].shared_entities.len() >= 2);
        assert_eq!(result.transferable_knowledge.len(), 1);

        assert!(f.engine.analogy("Cobol").await.unwrap().similar_themes.is_empty());
    }

    #[test]
    fn test_add_rule_validates() {
        let f = fixture();
        let before = f.engine.rules().len();
        let rule = InferenceRule::new("ownership", RelationType::PartOf, 0.6, "{source} belongs with {target}");
        f.engine.add_rule(rule).unwrap();
        assert_eq!(f.engine.rules().len(), before + 1);

        let bad = InferenceRule::new("bad", RelationType::PartOf, 0.0, "x");
        assert!(f.engine.add_rule(bad).is_err());
    }
}
