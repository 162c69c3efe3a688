//! Inference rules applied to discovered relations

use crate::error::{GraphError, GraphResult};
use crate::types::{Entity, EntityType, Relation, RelationType};

/// A pattern over one edge plus the conclusion it licenses.
///
/// `conclusion` may use `{source}` and `{target}` placeholders.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InferenceRule {
    pub name: String,

    /// `None` matches any entity type
    pub source_type: Option<EntityType>,
    pub relation_type: RelationType,
    pub target_type: Option<EntityType>,

    /// Multiplier applied to reasoning confidence when the rule fires
    pub confidence: f32,
    pub conclusion: String,
}

impl InferenceRule {
    pub fn new(
        name: impl Into<String>,
        relation_type: RelationType,
        confidence: f32,
        conclusion: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_type: None,
            relation_type,
            target_type: None,
            confidence,
            conclusion: conclusion.into(),
        }
    }

    pub fn with_source_type(mut self, entity_type: EntityType) -> Self {
        self.source_type = Some(entity_type);
        self
    }

    pub fn with_target_type(mut self, entity_type: EntityType) -> Self {
        self.target_type = Some(entity_type);
        self
    }

    /// Reject rules that could not sensibly fire
    pub fn validate(&self) -> GraphResult<()> {
        if self.name.trim().is_empty() {
            return Err(GraphError::invalid_rule(&self.name, "name is empty"));
        }
        if !(self.confidence > 0.0 && self.confidence <= 1.0) {
            return Err(GraphError::invalid_rule(
                &self.name,
                format!("confidence {} outside (0, 1]", self.confidence),
            ));
        }
        if self.conclusion.trim().is_empty() {
            return Err(GraphError::invalid_rule(&self.name, "conclusion is empty"));
        }
        Ok(())
    }

    /// Apply to an edge, trying both orientations since edges are undirected.
    ///
    /// Returns the rendered conclusion when the pattern matches.
    pub fn apply(&self, relation: &Relation, a: &Entity, b: &Entity) -> Option<String> {
        if relation.relation_type != self.relation_type {
            return None;
        }
        let fits = |source: &Entity, target: &Entity| {
            self.source_type.map_or(true, |t| t == source.entity_type)
                && self.target_type.map_or(true, |t| t == target.entity_type)
        };

        let (source, target) = if fits(a, b) {
            (a, b)
        } else if fits(b, a) {
            (b, a)
        } else {
            return None;
        };

        Some(
            self.conclusion
                .replace("{source}", &source.name)
                .replace("{target}", &target.name),
        )
    }
}

/// The rule table every reasoning engine starts with
pub fn default_rules() -> Vec<InferenceRule> {
    vec![
        InferenceRule::new(
            "preference_inheritance",
            RelationType::Prefers,
            0.8,
            "{source} may also prefer things related to {target}",
        )
        .with_source_type(EntityType::Person)
        .with_target_type(EntityType::Topic),
        InferenceRule::new(
            "location_context",
            RelationType::LocatedIn,
            0.9,
            "{source} is in the context of {target}",
        )
        .with_target_type(EntityType::Location),
        InferenceRule::new(
            "temporal_sequence",
            RelationType::RelatedTo,
            0.7,
            "{source} and {target} likely happened in sequence",
        )
        .with_source_type(EntityType::Event)
        .with_target_type(EntityType::Event),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn relation(a: &Entity, b: &Entity, relation_type: RelationType) -> Relation {
        Relation {
            id: "r1".to_string(),
            source_id: a.id.clone(),
            target_id: b.id.clone(),
            relation_type,
            weight: 0.5,
            evidence: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_preference_inheritance_either_orientation() {
        let rules = default_rules();
        let user = Entity::new("User", EntityType::Person);
        let mode = Entity::new("dark mode", EntityType::Topic);
        let edge = relation(&mode, &user, RelationType::Prefers);

        let conclusion = rules[0].apply(&edge, &mode, &user).unwrap();
        assert_eq!(conclusion, "User may also prefer things related to dark mode");
        assert!(rules[1].apply(&edge, &mode, &user).is_none());
    }

    #[test]
    fn test_type_mismatch_does_not_fire() {
        let rules = default_rules();
        let a = Entity::new("Rust", EntityType::Concept);
        let b = Entity::new("Go", EntityType::Concept);
        let edge = relation(&a, &b, RelationType::Prefers);
        assert!(rules.iter().all(|r| r.apply(&edge, &a, &b).is_none()));
    }

    #[test]
    fn test_validate() {
        assert!(default_rules().iter().all(|r| r.validate().is_ok()));
        let bad = InferenceRule::new("x", RelationType::RelatedTo, 1.5, "{source}");
        assert!(matches!(bad.validate(), Err(GraphError::InvalidRule { .. })));
        let unnamed = InferenceRule::new(" ", RelationType::RelatedTo, 0.5, "{source}");
        assert!(unnamed.validate().is_err());
    }
}
