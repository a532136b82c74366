//! Miner output contract
//!
//! Wire structs for the unified miner's JSON payload plus the compiled
//! schema it is validated against. The wire shapes are tolerant (defaults
//! everywhere) because validation and repair happen on the raw value before
//! deserialization.

use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use quarry_core::{
    entity, Claim, ClaimType, ContextType, EntityEvidence, EvidenceSpan, JargonTerm, MentalModel,
    MiningWindow, Person, SourceId, Timestamp,
};

/// One timestamped evidence span as the miner emits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinedSpan {
    pub t0: Timestamp,
    pub t1: Timestamp,
    pub quote: String,
    #[serde(default)]
    pub context_text: Option<String>,
    #[serde(default = "default_context_type")]
    pub context_type: String,
}

fn default_context_type() -> String {
    "exact".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinedClaim {
    pub canonical: String,
    #[serde(rename = "type", default = "default_claim_type")]
    pub claim_type: String,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub evidence_spans: Vec<MinedSpan>,
}

fn default_claim_type() -> String {
    "factual".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinedJargon {
    pub name: String,
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub introduced_by: Option<String>,
    #[serde(default)]
    pub evidence_spans: Vec<MinedSpan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinedPerson {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub mentioned_by: Option<String>,
    #[serde(default)]
    pub mentions: Vec<MinedSpan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinedModel {
    pub name: String,
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub advocated_by: Option<String>,
    #[serde(default)]
    pub evidence_spans: Vec<MinedSpan>,
}

/// Complete payload for one window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinerOutput {
    #[serde(default)]
    pub claims: Vec<MinedClaim>,
    #[serde(default)]
    pub jargon: Vec<MinedJargon>,
    #[serde(default)]
    pub people: Vec<MinedPerson>,
    #[serde(default)]
    pub mental_models: Vec<MinedModel>,
}

static MINER_SCHEMA_JSON: Lazy<serde_json::Value> = Lazy::new(|| {
    let span = serde_json::json!({
        "type": "object",
        "required": ["t0", "t1", "quote"],
        "properties": {
            "t0": {"type": ["string", "number"]},
            "t1": {"type": ["string", "number"]},
            "quote": {"type": "string"},
            "context_text": {"type": ["string", "null"]},
            "context_type": {"enum": ["exact", "extended", "segment"]}
        }
    });
    serde_json::json!({
        "type": "object",
        "required": ["claims", "jargon", "people", "mental_models"],
        "properties": {
            "claims": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["canonical", "evidence_spans"],
                    "properties": {
                        "canonical": {"type": "string"},
                        "type": {"enum": ["factual", "causal", "normative", "predictive", "definitional"]},
                        "speaker": {"type": ["string", "null"]},
                        "evidence_spans": {"type": "array", "items": span, "minItems": 1}
                    }
                }
            },
            "jargon": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "name": {"type": "string"},
                        "definition": {"type": ["string", "null"]},
                        "domain": {"type": ["string", "null"]},
                        "aliases": {"type": "array", "items": {"type": "string"}},
                        "evidence_spans": {"type": "array", "items": span}
                    }
                }
            },
            "people": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "name": {"type": "string"},
                        "aliases": {"type": "array", "items": {"type": "string"}},
                        "mentions": {"type": "array", "items": span}
                    }
                }
            },
            "mental_models": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "name": {"type": "string"},
                        "definition": {"type": ["string", "null"]},
                        "aliases": {"type": "array", "items": {"type": "string"}},
                        "evidence_spans": {"type": "array", "items": span}
                    }
                }
            }
        }
    })
});

static MINER_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    JSONSchema::compile(&MINER_SCHEMA_JSON).expect("static schema compiles")
});

/// Validate a raw payload against the miner schema. Returns the list of
/// violations, empty when valid.
pub fn validate_miner_payload(value: &serde_json::Value) -> Vec<String> {
    match MINER_SCHEMA.validate(value) {
        Ok(()) => Vec::new(),
        Err(errors) => errors.map(|e| format!("{}: {}", e.instance_path, e)).collect(),
    }
}

/// Domain-converted harvest of one window.
#[derive(Debug, Clone, Default)]
pub struct WindowHarvest {
    pub claims: Vec<Claim>,
    pub jargon: Vec<JargonTerm>,
    pub people: Vec<Person>,
    pub mental_models: Vec<MentalModel>,
}

impl MinerOutput {
    /// Convert wire shapes into domain types, assigning deterministic ids
    /// scoped to the source and window.
    pub fn into_harvest(self, source_id: &SourceId, window: &MiningWindow) -> WindowHarvest {
        let claims = self
            .claims
            .into_iter()
            .enumerate()
            .map(|(i, mined)| {
                let mut claim = Claim::new(
                    format!("{}_w{}_c{}", source_id, window.index, i),
                    source_id.clone(),
                    mined.canonical,
                    ClaimType::parse(&mined.claim_type.to_lowercase()).unwrap_or(ClaimType::Factual),
                );
                claim.speaker = mined.speaker.filter(|s| !s.trim().is_empty());
                claim.evidence = convert_spans(mined.evidence_spans);
                claim
            })
            .collect();

        let jargon = self
            .jargon
            .into_iter()
            .enumerate()
            .map(|(i, mined)| JargonTerm {
                entity_id: format!("{}_w{}_j{}", source_id, window.index, i),
                source_id: source_id.clone(),
                name: mined.name,
                definition: mined.definition,
                domain: mined.domain,
                aliases: mined.aliases,
                introduced_by: mined.introduced_by,
                evidence: convert_entity_spans(mined.evidence_spans),
                quality_score: None,
            })
            .collect();

        let people = self
            .people
            .into_iter()
            .enumerate()
            .map(|(i, mined)| Person {
                entity_id: format!("{}_w{}_p{}", source_id, window.index, i),
                source_id: source_id.clone(),
                name: mined.name,
                aliases: mined.aliases,
                mentioned_by: mined.mentioned_by,
                evidence: convert_entity_spans(mined.mentions),
                quality_score: None,
            })
            .collect();

        let mental_models = self
            .mental_models
            .into_iter()
            .enumerate()
            .map(|(i, mined)| MentalModel {
                entity_id: format!("{}_w{}_m{}", source_id, window.index, i),
                source_id: source_id.clone(),
                name: mined.name,
                definition: mined.definition,
                aliases: mined.aliases,
                advocated_by: mined.advocated_by,
                evidence: convert_entity_spans(mined.evidence_spans),
                quality_score: None,
            })
            .collect();

        WindowHarvest { claims, jargon, people, mental_models }
    }
}

fn convert_spans(spans: Vec<MinedSpan>) -> Vec<EvidenceSpan> {
    spans
        .into_iter()
        .enumerate()
        .map(|(sequence, span)| {
            let (t0, t1) = ordered(span.t0, span.t1);
            EvidenceSpan {
                sequence: sequence as i64,
                t0,
                t1,
                quote: span.quote,
                context_text: span.context_text,
                context_type: ContextType::parse(&span.context_type)
                    .unwrap_or_else(|| ContextType::coerce(&span.context_type)),
            }
        })
        .collect()
}

fn convert_entity_spans(spans: Vec<MinedSpan>) -> Vec<EntityEvidence> {
    spans
        .into_iter()
        .enumerate()
        .map(|(sequence, span)| {
            let (t0, t1) = ordered(span.t0, span.t1);
            EntityEvidence {
                sequence: sequence as i64,
                claim_id: None,
                t0,
                t1,
                quote: span.quote,
                context_text: span.context_text,
                context_type: ContextType::parse(&span.context_type)
                    .unwrap_or_else(|| ContextType::coerce(&span.context_type)),
            }
        })
        .collect()
}

fn ordered(t0: Timestamp, t1: Timestamp) -> (Timestamp, Timestamp) {
    if t1 < t0 {
        (t1, t0)
    } else {
        (t0, t1)
    }
}

/// Dedup key helper shared by the store.
pub fn entity_key(name: &str) -> String {
    entity::normalize_name(name)
}
