//! Parameter and result shapes of the ten host operations
//!
//! Every result serializes to JSON for structured consumers and renders to
//! plain text through [`ToolOutput`] for agents and CLIs.

use crate::error::StrataError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::str::FromStr;
use strata_graph::{Entity, GraphPath, GraphStats, ReasoningResult, RelationType};
use strata_memory::text::truncate;
use strata_memory::{
    AtRiskMemory, Conflict, FactType, ForgettingStats, MemoryLevel, Resolution, ScoredMemory,
    SpeakerRole, StoreStats, ValidityPeriod,
};

const PREVIEW_CHARS: usize = 80;

/// Human-readable rendering of an operation result
pub trait ToolOutput: Serialize {
    /// Plain-text rendering for agents and terminals
    fn to_text(&self) -> String;

    /// Structured rendering
    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// The named host operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Store an utterance at every level
    Remember,
    /// Top-down retrieval
    Recall,
    /// Summarize themes and propose rules
    Reflect,
    /// Health and decay report
    Introspect,
    /// Resolve conflicts and merge duplicate themes
    Consolidate,
    /// Record counts
    Status,
    /// Append to the rules file
    Evolve,
    /// Delete one record or sweep low-value ones
    Forget,
    /// Multi-hop reasoning
    Reason,
    /// Knowledge graph queries
    Graph,
}

impl Operation {
    /// Every operation, in registration order
    pub const ALL: [Operation; 10] = [
        Self::Remember,
        Self::Recall,
        Self::Reflect,
        Self::Introspect,
        Self::Consolidate,
        Self::Status,
        Self::Evolve,
        Self::Forget,
        Self::Reason,
        Self::Graph,
    ];

    /// Wire name of the operation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remember => "remember",
            Self::Recall => "recall",
            Self::Reflect => "reflect",
            Self::Introspect => "introspect",
            Self::Consolidate => "consolidate",
            Self::Status => "status",
            Self::Evolve => "evolve",
            Self::Forget => "forget",
            Self::Reason => "reason",
            Self::Graph => "graph",
        }
    }
}

impl FromStr for Operation {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        let name = name.strip_prefix("memory_").unwrap_or(&name);
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == name)
            .ok_or_else(|| StrataError::invalid_params(s, "unknown operation"))
    }
}

/// Uniform envelope returned by [`crate::MemoryEngine::invoke`]
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    /// Operation that produced this response
    pub operation: Operation,
    /// Plain-text rendering
    pub text: String,
    /// Structured result
    pub data: serde_json::Value,
}

impl ToolResponse {
    /// Wrap a typed result
    pub fn from_output<T: ToolOutput>(operation: Operation, output: &T) -> Self {
        Self {
            operation,
            text: output.to_text(),
            data: output.to_json(),
        }
    }
}

fn default_session() -> String {
    "default".to_string()
}

/// Parameters of `remember`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RememberParams {
    /// The utterance to store
    pub content: String,
    /// Conversation session
    #[serde(default = "default_session")]
    pub session_id: String,
    /// Who said it
    #[serde(default)]
    pub role: SpeakerRole,
    /// Inferred from keywords when absent
    #[serde(default, alias = "type")]
    pub fact_type: Option<FactType>,
    /// Defaults to 0.5
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Extracted from capitalized words when absent
    #[serde(default)]
    pub entities: Option<Vec<String>>,
    /// Caller-assigned importance of the utterance
    #[serde(default)]
    pub importance: Option<f64>,
    /// Sentiment of the utterance in [-1, 1]
    #[serde(default)]
    pub sentiment: Option<f64>,
    /// When the fact holds
    #[serde(default)]
    pub validity: Option<ValidityPeriod>,
}

impl RememberParams {
    /// Parameters with everything but the content left to inference
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            session_id: default_session(),
            role: SpeakerRole::default(),
            fact_type: None,
            confidence: None,
            entities: None,
            importance: None,
            sentiment: None,
            validity: None,
        }
    }

    /// Set the session
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Set the speaker
    pub fn with_role(mut self, role: SpeakerRole) -> Self {
        self.role = role;
        self
    }

    /// Set the fact type
    pub fn with_fact_type(mut self, fact_type: FactType) -> Self {
        self.fact_type = Some(fact_type);
        self
    }

    /// Set the fact confidence
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Set the entities explicitly
    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = Some(entities.into_iter().map(Into::into).collect());
        self
    }

    /// Set the utterance importance
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    /// Set the utterance sentiment
    pub fn with_sentiment(mut self, sentiment: f64) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    /// Set the validity window
    pub fn with_validity(mut self, validity: ValidityPeriod) -> Self {
        self.validity = Some(validity);
        self
    }
}

/// Result of `remember`
#[derive(Debug, Clone, Serialize)]
pub struct RememberResult {
    /// New Original
    pub original_id: String,
    /// New Episode
    pub episode_id: String,
    /// New Semantic, or the existing one it was folded into
    pub semantic_id: String,
    /// Theme the Semantic belongs to
    pub theme_id: String,
    /// Name of that theme
    pub theme_name: String,
    /// Whether the theme was created by this call
    pub theme_created: bool,
    /// Whether the fact was folded into an existing duplicate
    pub consolidated: bool,
    /// Fact type after inference
    pub fact_type: FactType,
    /// Entities after extraction
    pub entities: Vec<String>,
    /// Conflicts with stored facts
    pub conflicts: Vec<Conflict>,
}

impl ToolOutput for RememberResult {
    fn to_text(&self) -> String {
        let mut out = if self.consolidated {
            format!("Reinforced existing {} fact {}", self.fact_type, self.semantic_id)
        } else {
            format!("Remembered {} fact {}", self.fact_type, self.semantic_id)
        };
        let verb = if self.theme_created { "new theme" } else { "theme" };
        let _ = write!(out, " in {} '{}'", verb, self.theme_name);
        if !self.entities.is_empty() {
            let _ = write!(out, " (entities: {})", self.entities.join(", "));
        }
        out.push('.');
        for conflict in &self.conflicts {
            let _ = write!(
                out,
                "\nConflict ({:?}, {:?}): {}",
                conflict.conflict_type, conflict.severity, conflict.description
            );
        }
        out
    }
}

/// Parameters of `recall`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecallParams {
    /// Free-text query
    pub query: String,
    /// Overrides the configured theme limit
    #[serde(default)]
    pub top_k_themes: Option<usize>,
    /// Overrides the configured fact limit
    #[serde(default)]
    pub top_k_semantics: Option<usize>,
    /// Overrides the configured episode limit
    #[serde(default)]
    pub top_k_episodes: Option<usize>,
    /// Also return the episodes behind the returned facts
    #[serde(default)]
    pub include_episodes: bool,
}

impl RecallParams {
    /// Query with configured limits and no episodes
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Ask for supporting episodes too
    pub fn with_episodes(mut self) -> Self {
        self.include_episodes = true;
        self
    }

    /// Override all three limits
    pub fn with_top_k(mut self, themes: usize, semantics: usize, episodes: usize) -> Self {
        self.top_k_themes = Some(themes);
        self.top_k_semantics = Some(semantics);
        self.top_k_episodes = Some(episodes);
        self
    }
}

/// Result of `recall`, most general level first
#[derive(Debug, Clone, Serialize)]
pub struct RecallResult {
    /// The query as given
    pub query: String,
    /// Matching themes
    pub themes: Vec<ScoredMemory>,
    /// Matching facts, direct hits and members of matching themes
    pub semantics: Vec<ScoredMemory>,
    /// Episodes behind the returned facts, when requested
    pub episodes: Vec<ScoredMemory>,
    /// Highest score across themes and facts
    pub best_score: f32,
    /// Best score fell below the uncertainty threshold
    pub uncertain: bool,
    /// Rendered answer, capped to the configured token budget
    pub answer: String,
}

impl RecallResult {
    /// Whether nothing matched at all
    pub fn is_empty(&self) -> bool {
        self.themes.is_empty() && self.semantics.is_empty() && self.episodes.is_empty()
    }
}

impl ToolOutput for RecallResult {
    fn to_text(&self) -> String {
        self.answer.clone()
    }
}

/// Render recall hits, stopping before `max_tokens` whitespace tokens
pub(crate) fn render_recall(
    query: &str,
    themes: &[ScoredMemory],
    semantics: &[ScoredMemory],
    episodes: &[ScoredMemory],
    uncertain: bool,
    max_tokens: usize,
) -> String {
    if themes.is_empty() && semantics.is_empty() && episodes.is_empty() {
        return format!("No memories found for \"{query}\".");
    }

    let mut lines = Vec::new();
    if uncertain {
        lines.push("Low confidence: these memories only loosely match.".to_string());
    }
    if !themes.is_empty() {
        lines.push("Themes:".to_string());
        for hit in themes {
            if let Some(theme) = hit.record.as_theme() {
                lines.push(format!(
                    "- {} ({:.2}): {}",
                    theme.name,
                    hit.score,
                    truncate(&theme.description, PREVIEW_CHARS)
                ));
            }
        }
    }
    if !semantics.is_empty() {
        lines.push("Facts:".to_string());
        for hit in semantics {
            if let Some(fact) = hit.record.as_semantic() {
                lines.push(format!(
                    "- [{}] {} (score {:.2}, confidence {:.2})",
                    fact.fact_type, fact.content, hit.score, fact.confidence
                ));
            }
        }
    }
    if !episodes.is_empty() {
        lines.push("Episodes:".to_string());
        for hit in episodes {
            lines.push(format!("- {}", truncate(hit.record.primary_text(), PREVIEW_CHARS)));
        }
    }

    let mut out = String::new();
    let mut used = 0;
    for line in lines {
        let tokens = line.split_whitespace().count();
        if used + tokens > max_tokens {
            out.push_str("...");
            break;
        }
        used += tokens;
        out.push_str(&line);
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// One theme as seen by `reflect`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThemeSummary {
    /// Theme id
    pub id: String,
    /// Theme name
    pub name: String,
    /// Number of member facts
    pub size: usize,
    /// Theme coherence
    pub coherence: f64,
    /// Highest-confidence member facts
    pub top_facts: Vec<String>,
}

/// A rule `reflect` suggests writing to the rules file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleProposal {
    /// Theme that motivated the rule
    pub theme_id: String,
    /// Its name
    pub theme_name: String,
    /// Rule text
    pub text: String,
}

/// Result of `reflect`
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReflectResult {
    /// Every theme, largest first
    pub themes: Vec<ThemeSummary>,
    /// Rules for themes above the proposal size
    pub proposals: Vec<RuleProposal>,
    /// Names of themes above the configured maximum size
    pub oversized: Vec<String>,
    /// Names of themes below the configured minimum coherence
    pub low_coherence: Vec<String>,
}

impl ToolOutput for ReflectResult {
    fn to_text(&self) -> String {
        if self.themes.is_empty() {
            return "No themes yet.".to_string();
        }
        let mut out = format!("{} themes:", self.themes.len());
        for theme in &self.themes {
            let _ = write!(
                out,
                "\n- {} ({} facts, coherence {:.2})",
                theme.name, theme.size, theme.coherence
            );
        }
        if !self.oversized.is_empty() {
            let _ = write!(out, "\nOversized: {}", self.oversized.join(", "));
        }
        if !self.low_coherence.is_empty() {
            let _ = write!(out, "\nLow coherence: {}", self.low_coherence.join(", "));
        }
        for proposal in &self.proposals {
            let _ = write!(out, "\nProposed rule: {}", proposal.text);
        }
        out
    }
}

/// Parameters of `introspect`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntrospectParams {
    /// Combined score under which a record counts as at risk; defaults to
    /// the archive threshold
    #[serde(default)]
    pub at_risk_threshold: Option<f64>,
}

/// Result of `introspect`
#[derive(Debug, Clone, Serialize)]
pub struct IntrospectResult {
    /// Store counters
    pub store: StoreStats,
    /// Decay counters
    pub forgetting: ForgettingStats,
    /// Records below the at-risk threshold, weakest first
    pub at_risk: Vec<AtRiskMemory>,
    /// Knowledge graph size
    pub graph: GraphStats,
    /// Unresolved conflicts across all stored facts
    pub conflicts: Vec<Conflict>,
}

impl ToolOutput for IntrospectResult {
    fn to_text(&self) -> String {
        let mut out = format!(
            "{} memories (avg access {:.1}, avg retention {:.2}).",
            self.store.total, self.store.avg_access_count, self.store.avg_retention_score
        );
        let _ = write!(
            out,
            "\nForgetting: {} archived, {} deleted, {} candidates for archive.",
            self.forgetting.archived, self.forgetting.deleted, self.forgetting.candidates_for_archive
        );
        let _ = write!(
            out,
            "\nGraph: {} entities, {} relations.",
            self.graph.entity_count, self.graph.relation_count
        );
        for memory in self.at_risk.iter().take(10) {
            let _ = write!(
                out,
                "\nAt risk: [{}] {} (score {:.3})",
                memory.level, memory.preview, memory.combined
            );
        }
        if !self.conflicts.is_empty() {
            let _ = write!(out, "\n{} open conflicts.", self.conflicts.len());
        }
        out
    }
}

/// Result of `consolidate`
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidateResult {
    /// Conflicts found by the exhaustive scan
    pub conflicts_found: usize,
    /// Applied resolutions keyed by conflict id
    pub resolved: BTreeMap<String, Resolution>,
    /// Conflicts left for review
    pub pending: Vec<Conflict>,
    /// Themes folded into a same-named theme
    pub themes_merged: usize,
    /// Theme members pointing at deleted facts, removed
    pub dangling_pruned: usize,
}

impl ToolOutput for ConsolidateResult {
    fn to_text(&self) -> String {
        format!(
            "Found {} conflicts: {} resolved, {} pending review. Merged {} duplicate themes, pruned {} dangling references.",
            self.conflicts_found,
            self.resolved.len(),
            self.pending.len(),
            self.themes_merged,
            self.dangling_pruned
        )
    }
}

/// Result of `status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    /// Workspace served
    pub workspace_id: String,
    /// Records per level
    pub per_level: BTreeMap<MemoryLevel, usize>,
    /// All records
    pub total: usize,
    /// Knowledge graph entities
    pub entities: usize,
    /// Knowledge graph relations
    pub relations: usize,
    /// Rules file, if configured
    pub rules_file: Option<PathBuf>,
}

impl ToolOutput for StatusResult {
    fn to_text(&self) -> String {
        let levels: Vec<String> = self
            .per_level
            .iter()
            .map(|(level, count)| format!("{level}: {count}"))
            .collect();
        format!(
            "Workspace '{}': {} memories ({}). Graph: {} entities, {} relations.",
            self.workspace_id,
            self.total,
            levels.join(", "),
            self.entities,
            self.relations
        )
    }
}

/// Parameters of `evolve`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EvolveParams {
    /// Append one rule verbatim
    AddRule {
        /// Rule text
        content: String,
    },
    /// Run `reflect` and append its proposals
    FromReflection,
}

/// Result of `evolve`
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvolveResult {
    /// Lines appended, in order
    pub appended: Vec<String>,
}

impl ToolOutput for EvolveResult {
    fn to_text(&self) -> String {
        match self.appended.len() {
            0 => "No rules to add.".to_string(),
            n => format!("Added {} rule(s):\n{}", n, self.appended.join("\n")),
        }
    }
}

/// Parameters of `forget`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ForgetParams {
    /// Delete one record
    ById {
        /// Record id
        id: String,
    },
    /// Sweep with the archive/delete policy
    LowValue {
        /// Archive threshold; defaults to the configured one
        #[serde(default)]
        threshold: Option<f64>,
    },
}

/// Result of `forget`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForgetResult {
    /// Records removed
    pub deleted: usize,
    /// Records demoted
    pub archived: usize,
    /// Records left alone
    pub retained: usize,
}

impl ToolOutput for ForgetResult {
    fn to_text(&self) -> String {
        format!(
            "Deleted {}, archived {}, retained {}.",
            self.deleted, self.archived, self.retained
        )
    }
}

fn default_max_hops() -> usize {
    3
}

/// Parameters of `reason`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonParams {
    /// Free-text question
    pub query: String,
    /// Relation hops to follow
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
}

impl ReasonParams {
    /// Query with the default hop bound
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_hops: default_max_hops(),
        }
    }

    /// Set the hop bound
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }
}

impl ToolOutput for ReasoningResult {
    fn to_text(&self) -> String {
        let mut out = self.answer.clone();
        for path in &self.paths {
            let _ = write!(out, "\nPath: {}", path.describe());
        }
        let _ = write!(
            out,
            "\nConfidence {:.2} from {} supporting memories.",
            self.confidence,
            self.evidence.len()
        );
        out
    }
}

/// Parameters of `graph`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum GraphQuery {
    /// One entity and its edges
    Entity {
        /// Entity name, case-insensitive
        name: String,
    },
    /// Shortest path between two entities
    Path {
        /// Start entity
        source: String,
        /// End entity
        target: String,
        /// Hop bound
        #[serde(default = "default_max_hops")]
        max_hops: usize,
    },
    /// Entities within `max_depth` hops
    Related {
        /// Origin entity
        name: String,
        /// Depth bound
        #[serde(default = "default_related_depth")]
        max_depth: usize,
    },
    /// Size and shape of the graph
    Stats,
}

fn default_related_depth() -> usize {
    2
}

/// One edge seen from a given entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationView {
    /// Edge label
    pub relation_type: RelationType,
    /// Entity at the other end
    pub other: String,
    /// Edge strength
    pub weight: f32,
    /// Facts supporting the edge
    pub evidence: Vec<String>,
}

/// Result of `graph`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphOutput {
    /// Entity lookup
    Entity {
        /// The entity, if known
        entity: Option<Entity>,
        /// Its edges
        relations: Vec<RelationView>,
    },
    /// Path lookup
    Path {
        /// The path, if one exists within the bound
        path: Option<GraphPath>,
    },
    /// Neighborhood lookup
    Related {
        /// Origin name as queried
        name: String,
        /// Entities reached
        entities: Vec<Entity>,
    },
    /// Graph statistics
    Stats {
        /// The numbers
        stats: GraphStats,
    },
}

impl ToolOutput for GraphOutput {
    fn to_text(&self) -> String {
        match self {
            Self::Entity { entity: None, .. } => "Unknown entity.".to_string(),
            Self::Entity {
                entity: Some(entity),
                relations,
            } => {
                let mut out = format!(
                    "{} ({}), mentioned {} times",
                    entity.name, entity.entity_type, entity.mention_count
                );
                for relation in relations {
                    let _ = write!(
                        out,
                        "\n- {} {} (weight {:.1})",
                        relation.relation_type, relation.other, relation.weight
                    );
                }
                out
            }
            Self::Path { path: None } => "No path found.".to_string(),
            Self::Path { path: Some(path) } => {
                format!("{} ({} hops)", path.describe(), path.hops())
            }
            Self::Related { name, entities } if entities.is_empty() => {
                format!("Nothing related to {name}.")
            }
            Self::Related { name, entities } => {
                let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
                format!("Related to {}: {}", name, names.join(", "))
            }
            Self::Stats { stats } => format!(
                "{} entities, {} relations, {:.2} connections per entity.",
                stats.entity_count, stats.relation_count, stats.avg_connections
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_memory::{SemanticMemory, ThemeMemory};

    #[test]
    fn test_operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert_eq!("memory_evolve".parse::<Operation>().unwrap(), Operation::Evolve);
        assert!("teleport".parse::<Operation>().is_err());
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let params: RememberParams = serde_json::from_value(serde_json::json!({
            "content": "User prefers dark mode",
            "type": "preference",
            "confidence": 0.9
        }))
        .unwrap();
        assert_eq!(params.session_id, "default");
        assert_eq!(params.fact_type, Some(FactType::Preference));
        assert!(params.entities.is_none());

        let evolve: EvolveParams =
            serde_json::from_value(serde_json::json!({"action": "add_rule", "content": "x"})).unwrap();
        assert_eq!(evolve, EvolveParams::AddRule { content: "x".into() });

        let forget: ForgetParams =
            serde_json::from_value(serde_json::json!({"action": "low_value"})).unwrap();
        assert_eq!(forget, ForgetParams::LowValue { threshold: None });

        let graph: GraphQuery = serde_json::from_value(
            serde_json::json!({"query": "path", "source": "Alice", "target": "Bob"}),
        )
        .unwrap();
        assert_eq!(
            graph,
            GraphQuery::Path {
                source: "Alice".into(),
                target: "Bob".into(),
                max_hops: 3
            }
        );
    }

    #[test]
    fn test_recall_rendering_respects_token_budget() {
        let theme = ThemeMemory::new("Postgres", "Memories about Postgres");
        let facts: Vec<ScoredMemory> = (0..20)
            .map(|i| ScoredMemory {
                record: SemanticMemory::new(format!("Postgres fact number {i}"), FactType::Fact).into(),
                score: 0.5,
            })
            .collect();
        let themes = vec![ScoredMemory {
            record: theme.into(),
            score: 0.5,
        }];

        let full = render_recall("postgres", &themes, &facts, &[], false, 10_000);
        assert!(full.contains("Postgres fact number 19"));

        let capped = render_recall("postgres", &themes, &facts, &[], false, 20);
        assert!(capped.ends_with("..."));
        assert!(capped.split_whitespace().count() <= 21);

        let empty = render_recall("nothing", &[], &[], &[], true, 100);
        assert_eq!(empty, "No memories found for \"nothing\".");
    }

    #[test]
    fn test_forget_result_text() {
        let result = ForgetResult {
            deleted: 1,
            archived: 2,
            retained: 3,
        };
        assert_eq!(result.to_text(), "Deleted 1, archived 2, retained 3.");
        assert_eq!(result.to_json()["archived"], 2);
    }
}
