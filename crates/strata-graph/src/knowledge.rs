//! Knowledge graph built incrementally from semantic facts
//!
//! Every entity reference on a semantic becomes (or reinforces) a node. Every
//! pair of entities co-occurring on the same semantic gets an undirected
//! edge per relation type; repeated evidence strengthens it.
//!
//! All mutation happens under one write lock, so find-or-create of entities
//! and edges is atomic.

use crate::error::GraphResult;
use crate::extract::{infer_entity_type, infer_relation_type};
use crate::types::{
    normalize_name, Entity, GraphPath, GraphStats, GraphUpdate, Relation, RelationType,
};
use chrono::Utc;
use parking_lot::RwLock;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableUnGraph};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use strata_memory::{MemoryLevel, MemoryStore, SemanticMemory};

const INITIAL_WEIGHT: f32 = 0.5;
const REINFORCEMENT: f32 = 0.1;

#[derive(Default)]
struct GraphInner {
    graph: StableUnGraph<Entity, Relation>,

    /// normalized name -> node
    by_name: HashMap<String, NodeIndex>,

    /// entity id -> node
    by_id: HashMap<String, NodeIndex>,

    /// (lower node, higher node, type) -> edge
    edges: HashMap<(NodeIndex, NodeIndex, RelationType), EdgeIndex>,
}

impl GraphInner {
    fn find_or_create(&mut self, name: &str, content: &str) -> (NodeIndex, bool) {
        let key = normalize_name(name);
        if let Some(&node) = self.by_name.get(&key) {
            return (node, false);
        }
        let entity = Entity::new(name.trim(), infer_entity_type(name, content));
        let id = entity.id.clone();
        let node = self.graph.add_node(entity);
        self.by_name.insert(key, node);
        self.by_id.insert(id, node);
        (node, true)
    }

    fn neighbors(&self, node: NodeIndex) -> Vec<(NodeIndex, EdgeIndex)> {
        self.graph
            .edges(node)
            .map(|edge| {
                // Undirected edges may report either endpoint as source
                let other = if edge.source() == node {
                    edge.target()
                } else {
                    edge.source()
                };
                (other, edge.id())
            })
            .collect()
    }
}

/// In-memory entity/relation graph
#[derive(Default)]
pub struct KnowledgeGraph {
    inner: RwLock<GraphInner>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one semantic's entities and their pairwise relations
    pub fn update(&self, semantic: &SemanticMemory) -> GraphUpdate {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let mut update = GraphUpdate::default();
        let now = Utc::now();

        let mut nodes: Vec<NodeIndex> = Vec::new();
        for name in &semantic.entities {
            if name.trim().is_empty() {
                continue;
            }
            let (node, created) = inner.find_or_create(name, &semantic.content);
            if created {
                update.new_entities += 1;
            }
            if nodes.contains(&node) {
                continue;
            }
            if let Some(entity) = inner.graph.node_weight_mut(node) {
                if !entity.semantic_ids.contains(&semantic.id) {
                    entity.mention_count += 1;
                    entity.semantic_ids.push(semantic.id.clone());
                }
                entity.last_seen_at = now;
            }
            nodes.push(node);
        }

        let relation_type = infer_relation_type(&semantic.content);
        for (i, &a) in nodes.iter().enumerate() {
            for &b in &nodes[i + 1..] {
                let key = (a.min(b), a.max(b), relation_type);

                if let Some(&edge) = inner.edges.get(&key) {
                    if let Some(relation) = inner.graph.edge_weight_mut(edge) {
                        relation.weight = (relation.weight + REINFORCEMENT).min(1.0);
                        if !relation.evidence.contains(&semantic.id) {
                            relation.evidence.push(semantic.id.clone());
                        }
                        relation.updated_at = now;
                        update.reinforced_relations += 1;
                    }
                    continue;
                }

                let (Some(source), Some(target)) = (inner.graph.node_weight(a), inner.graph.node_weight(b))
                else {
                    continue;
                };
                let relation = Relation {
                    id: uuid::Uuid::new_v4().to_string(),
                    source_id: source.id.clone(),
                    target_id: target.id.clone(),
                    relation_type,
                    weight: INITIAL_WEIGHT,
                    evidence: vec![semantic.id.clone()],
                    created_at: now,
                    updated_at: now,
                };
                let edge = inner.graph.add_edge(a, b, relation);
                inner.edges.insert(key, edge);
                update.new_relations += 1;
            }
        }

        tracing::debug!(
            semantic = %semantic.id,
            new_entities = update.new_entities,
            new_relations = update.new_relations,
            reinforced = update.reinforced_relations,
            "Graph updated"
        );
        update
    }

    /// Look up an entity by name (case-insensitive)
    pub fn get_entity(&self, name: &str) -> Option<Entity> {
        let inner = self.inner.read();
        let node = inner.by_name.get(&normalize_name(name))?;
        inner.graph.node_weight(*node).cloned()
    }

    pub fn get_entity_by_id(&self, entity_id: &str) -> Option<Entity> {
        let inner = self.inner.read();
        let node = inner.by_id.get(entity_id)?;
        inner.graph.node_weight(*node).cloned()
    }

    /// Every relation touching an entity
    pub fn get_entity_relations(&self, entity_id: &str) -> Vec<Relation> {
        let inner = self.inner.read();
        let Some(&node) = inner.by_id.get(entity_id) else {
            return Vec::new();
        };
        inner
            .neighbors(node)
            .into_iter()
            .filter_map(|(_, edge)| inner.graph.edge_weight(edge).cloned())
            .collect()
    }

    /// Shortest path by hop count (BFS), at most `max_hops` edges long
    pub fn find_path(&self, source_name: &str, target_name: &str, max_hops: usize) -> Option<GraphPath> {
        let inner = self.inner.read();
        let start = *inner.by_name.get(&normalize_name(source_name))?;
        let goal = *inner.by_name.get(&normalize_name(target_name))?;

        // node -> (previous node, edge used to reach it)
        let mut came_from: HashMap<NodeIndex, (NodeIndex, EdgeIndex)> = HashMap::new();
        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::from([(start, 0)]);
        let mut found = start == goal;

        while let Some((node, depth)) = queue.pop_front() {
            if found {
                break;
            }
            if depth >= max_hops {
                continue;
            }
            for (next, edge) in inner.neighbors(node) {
                if !visited.insert(next) {
                    continue;
                }
                came_from.insert(next, (node, edge));
                if next == goal {
                    found = true;
                    break;
                }
                queue.push_back((next, depth + 1));
            }
        }

        if !found {
            return None;
        }

        let mut nodes = vec![goal];
        let mut edges = Vec::new();
        let mut cursor = goal;
        while let Some(&(prev, edge)) = came_from.get(&cursor) {
            edges.push(edge);
            nodes.push(prev);
            cursor = prev;
        }
        nodes.reverse();
        edges.reverse();

        let entities: Vec<Entity> = nodes
            .iter()
            .filter_map(|n| inner.graph.node_weight(*n).cloned())
            .collect();
        let relations: Vec<Relation> = edges
            .iter()
            .filter_map(|e| inner.graph.edge_weight(*e).cloned())
            .collect();
        let total_weight = relations.iter().map(|r| r.weight).sum();

        Some(GraphPath {
            entities,
            relations,
            total_weight,
        })
    }

    /// Entities within `max_depth` hops, nearest first, excluding the origin
    pub fn get_related_entities(&self, entity_id: &str, max_depth: usize) -> Vec<Entity> {
        let inner = self.inner.read();
        let Some(&start) = inner.by_id.get(entity_id) else {
            return Vec::new();
        };

        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::from([(start, 0)]);
        let mut related = Vec::new();

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for (next, _) in inner.neighbors(node) {
                if visited.insert(next) {
                    if let Some(entity) = inner.graph.node_weight(next) {
                        related.push(entity.clone());
                    }
                    queue.push_back((next, depth + 1));
                }
            }
        }

        related
    }

    pub fn get_all_entities(&self) -> Vec<Entity> {
        let inner = self.inner.read();
        inner.graph.node_weights().cloned().collect()
    }

    pub fn get_all_relations(&self) -> Vec<Relation> {
        let inner = self.inner.read();
        inner.graph.edge_weights().cloned().collect()
    }

    pub fn get_stats(&self) -> GraphStats {
        let inner = self.inner.read();
        let entity_count = inner.graph.node_count();
        let relation_count = inner.graph.edge_count();

        let mut per_type_entity_counts = BTreeMap::new();
        for entity in inner.graph.node_weights() {
            *per_type_entity_counts.entry(entity.entity_type).or_insert(0) += 1;
        }

        GraphStats {
            entity_count,
            relation_count,
            avg_connections: if entity_count > 0 {
                2.0 * relation_count as f64 / entity_count as f64
            } else {
                0.0
            },
            per_type_entity_counts,
        }
    }

    pub fn clear(&self) {
        *self.inner.write() = GraphInner::default();
    }

    /// Discard the graph and re-ingest every stored semantic, oldest first
    pub async fn rebuild(&self, store: &MemoryStore) -> GraphResult<usize> {
        let semantics: Vec<SemanticMemory> = store
            .list(Some(MemoryLevel::Semantic))
            .await?
            .into_iter()
            .filter_map(|s| s.record.into_semantic())
            .collect();

        self.clear();
        for semantic in &semantics {
            self.update(semantic);
        }

        let stats = self.get_stats();
        tracing::info!(
            semantics = semantics.len(),
            entities = stats.entity_count,
            relations = stats.relation_count,
            "Knowledge graph rebuilt"
        );
        Ok(semantics.len())
    }
}
