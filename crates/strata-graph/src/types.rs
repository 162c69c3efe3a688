//! Entity and relation types for the knowledge graph

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Entity category, assigned heuristically on first sight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Concept,
    Event,
    Object,
    Topic,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Location => "location",
            Self::Concept => "concept",
            Self::Event => "event",
            Self::Object => "object",
            Self::Topic => "topic",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relation category inferred from the originating fact's wording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RelationType {
    Prefers,
    Dislikes,
    PartOf,
    LocatedIn,
    CausedBy,
    RelatedTo,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prefers => "prefers",
            Self::Dislikes => "dislikes",
            Self::PartOf => "part_of",
            Self::LocatedIn => "located_in",
            Self::CausedBy => "caused_by",
            Self::RelatedTo => "related_to",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named node, keyed by its normalized (trimmed, lowercased) name
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Entity {
    pub id: String,

    /// Name as first seen
    pub name: String,
    pub entity_type: EntityType,

    /// Number of semantics that referenced this entity
    pub mention_count: usize,

    /// Semantics mentioning this entity, in ingestion order
    pub semantic_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            entity_type,
            mention_count: 0,
            semantic_ids: Vec::new(),
            created_at: now,
            last_seen_at: now,
        }
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// An undirected, weighted edge between two entities.
///
/// `source_id`/`target_id` record the order the entities were first seen
/// together; traversal ignores it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Relation {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: RelationType,

    /// Strength in [0, 1]; starts at 0.5 and grows with repeated evidence
    pub weight: f32,

    /// Semantic ids supporting this relation
    pub evidence: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relation {
    /// The endpoint opposite `entity_id`, if `entity_id` is an endpoint
    pub fn other_end(&self, entity_id: &str) -> Option<&str> {
        if self.source_id == entity_id {
            Some(&self.target_id)
        } else if self.target_id == entity_id {
            Some(&self.source_id)
        } else {
            None
        }
    }
}

/// A chain of entities joined by relations
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphPath {
    /// Entities from source to target, inclusive
    pub entities: Vec<Entity>,

    /// `relations[i]` joins `entities[i]` and `entities[i + 1]`
    pub relations: Vec<Relation>,

    /// Sum of traversed edge weights
    pub total_weight: f32,
}

impl GraphPath {
    /// Number of edges traversed
    pub fn hops(&self) -> usize {
        self.relations.len()
    }

    /// `A -[prefers]- B -[related_to]- C`
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (i, entity) in self.entities.iter().enumerate() {
            if i > 0 {
                if let Some(relation) = self.relations.get(i - 1) {
                    out.push_str(&format!(" -[{}]- ", relation.relation_type));
                }
            }
            out.push_str(&entity.name);
        }
        out
    }
}

/// Size and shape of the graph
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphStats {
    pub entity_count: usize,
    pub relation_count: usize,

    /// Mean degree
    pub avg_connections: f64,
    pub per_type_entity_counts: BTreeMap<EntityType, usize>,
}

/// What one `update` call changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphUpdate {
    pub new_entities: usize,
    pub new_relations: usize,
    pub reinforced_relations: usize,
}

/// Lookup key for entity names
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}
