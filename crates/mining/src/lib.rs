//! Knowledge mining
//!
//! One LLM call per mining window yields claims, jargon, people, and mental
//! models together with their evidence spans. Evaluation then scores each
//! claim on six independent dimensions, and the multi-profile scorer derives
//! twelve archetype scores, importance, and a tier by pure arithmetic.
//!
//! Generation uses the provider's JSON mode with post-hoc validation and a
//! deterministic repair pass, not grammar-constrained decoding; the latter
//! measured several times slower on comparable workloads.

pub mod schema;
pub mod repair;
pub mod miner;
pub mod evaluator;
pub mod entities;
pub mod profiles;

pub use schema::{
    MinedClaim, MinedJargon, MinedModel, MinedPerson, MinedSpan, MinerOutput, WindowHarvest,
};
pub use repair::{repair_payload, RepairLog};
pub use miner::{UnifiedMiner, UnifiedMinerConfig};
pub use evaluator::{ClaimEvaluation, FlagshipEvaluator};
pub use entities::{EntityEvaluator, EntityScore};
pub use profiles::{profiles, MultiProfileScorer, ProfileWeights};

use thiserror::Error;

/// Mining-layer errors.
#[derive(Error, Debug)]
pub enum MiningError {
    #[error("llm error: {0}")]
    Llm(#[from] quarry_llm::LlmError),

    #[error("unparseable miner output: {0}")]
    Unparseable(String),

    #[error("schema validation failed: {0}")]
    SchemaInvalid(String),

    #[error("evaluator output mismatch: {0}")]
    EvaluatorMismatch(String),
}

impl MiningError {
    pub fn code(&self) -> &'static str {
        match self {
            MiningError::Llm(e) => e.code(),
            MiningError::Unparseable(_) | MiningError::SchemaInvalid(_) => "llm_schema_invalid",
            MiningError::EvaluatorMismatch(_) => "llm_schema_invalid",
        }
    }
}

impl From<MiningError> for quarry_core::Error {
    fn from(err: MiningError) -> Self {
        match err {
            MiningError::Llm(inner) => inner.into(),
            other => quarry_core::Error::Llm(other.to_string()),
        }
    }
}
