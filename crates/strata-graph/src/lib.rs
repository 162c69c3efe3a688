//! # Strata Graph
//!
//! Knowledge graph and multi-hop reasoning on top of [`strata_memory`].
//!
//! - [`KnowledgeGraph`] turns the entity references of semantic facts into
//!   typed entity nodes and weighted, evidence-backed relation edges, and
//!   answers path and neighborhood queries by breadth-first search.
//! - [`ReasoningEngine`] answers free-text queries by matching known
//!   entities, hopping along relations, and firing [`InferenceRule`]s.
//!
//! ```rust,no_run
//! use strata_graph::KnowledgeGraph;
//! use strata_memory::{FactType, SemanticMemory};
//!
//! let graph = KnowledgeGraph::new();
//! graph.update(
//!     &SemanticMemory::new("Alice works with Bob", FactType::Fact)
//!         .with_entities(vec!["Alice".into(), "Bob".into()]),
//! );
//! let path = graph.find_path("alice", "bob", 2);
//! assert_eq!(path.map(|p| p.hops()), Some(1));
//! ```

pub mod error;
pub mod extract;
pub mod knowledge;
pub mod reasoning;
pub mod rules;
pub mod types;

pub use error::{GraphError, GraphResult};
pub use knowledge::KnowledgeGraph;
pub use reasoning::{
    AnalogyResult, CausalResult, ReasoningEngine, ReasoningResult, ReasoningStep, ThemeMatch,
};
pub use rules::{default_rules, InferenceRule};
pub use types::{
    Entity, EntityType, GraphPath, GraphStats, GraphUpdate, Relation, RelationType,
};
