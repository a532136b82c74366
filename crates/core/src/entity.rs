//! Named entities mined alongside claims
//!
//! Three parallel entity families: jargon terms, people, mental models.
//! Every occurrence in the source is recorded as entity evidence, not just
//! the first mention.

use serde::{Deserialize, Serialize};

use crate::{ContextType, SourceId, Timestamp};

/// Entity family, used to route evidence into the per-type tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Jargon,
    Person,
    MentalModel,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Jargon => "jargon",
            EntityKind::Person => "person",
            EntityKind::MentalModel => "mental_model",
        }
    }
}

/// Normalize an entity name for per-source deduplication.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One occurrence of an entity in the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEvidence {
    /// Order of this occurrence within the entity, starting at 0.
    pub sequence: i64,
    /// Claim this occurrence co-occurred with, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    pub t0: Timestamp,
    pub t1: Timestamp,
    pub quote: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_text: Option<String>,
    pub context_type: ContextType,
}

/// A domain-specific term with its in-context definition.
///
/// `domain` is a free-form string ("constitutional law", "quantum
/// mechanics"); there is deliberately no enum behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JargonTerm {
    pub entity_id: String,
    pub source_id: SourceId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Speaker who introduced the term, when inferable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introduced_by: Option<String>,
    #[serde(default)]
    pub evidence: Vec<EntityEvidence>,
    /// Bulk-evaluator quality score in `[0, 10]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

/// A person mentioned in the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub entity_id: String,
    pub source_id: SourceId,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Speaker who mentioned them, when inferable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mentioned_by: Option<String>,
    #[serde(default)]
    pub evidence: Vec<EntityEvidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

/// A named framework or way of thinking advocated in the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentalModel {
    pub entity_id: String,
    pub source_id: SourceId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Speaker advocating the model, when inferable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advocated_by: Option<String>,
    #[serde(default)]
    pub evidence: Vec<EntityEvidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_normalization_collapses_case_and_space() {
        assert_eq!(normalize_name("  Bayesian   Updating "), "bayesian updating");
        assert_eq!(normalize_name("bayesian updating"), "bayesian updating");
    }
}
