//! Claims and their evidence
//!
//! A claim is an atomic assertion extracted from one source, carrying one or
//! more timestamped evidence spans and, once evaluated, a six-dimension score
//! vector plus derived per-profile scores and a tier.

use serde::{Deserialize, Serialize};

use crate::{DimensionScores, ProfileScores, SourceId, Timestamp};

/// Kind of assertion a claim makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimType {
    Factual,
    Causal,
    Normative,
    Predictive,
    Definitional,
}

impl ClaimType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimType::Factual => "factual",
            ClaimType::Causal => "causal",
            ClaimType::Normative => "normative",
            ClaimType::Predictive => "predictive",
            ClaimType::Definitional => "definitional",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "factual" => Some(ClaimType::Factual),
            "causal" => Some(ClaimType::Causal),
            "normative" => Some(ClaimType::Normative),
            "predictive" => Some(ClaimType::Predictive),
            "definitional" => Some(ClaimType::Definitional),
            _ => None,
        }
    }
}

/// How much surrounding text an evidence span carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    Exact,
    Extended,
    Segment,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::Exact => "exact",
            ContextType::Extended => "extended",
            ContextType::Segment => "segment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(ContextType::Exact),
            "extended" => Some(ContextType::Extended),
            "segment" => Some(ContextType::Segment),
            _ => None,
        }
    }

    /// Best-effort coercion for values the miner invents. Anything that is
    /// not recognizably `extended` or `segment` collapses to `exact`.
    pub fn coerce(s: &str) -> Self {
        let lower = s.to_ascii_lowercase();
        if lower.contains("seg") {
            ContextType::Segment
        } else if lower.contains("ext") || lower.contains("broad") || lower.contains("wide") {
            ContextType::Extended
        } else {
            ContextType::Exact
        }
    }
}

/// How long a claim is expected to stay true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Temporality {
    Immediate,
    ShortTerm,
    MediumTerm,
    LongTerm,
    Timeless,
}

impl Temporality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Temporality::Immediate => "immediate",
            Temporality::ShortTerm => "short-term",
            Temporality::MediumTerm => "medium-term",
            Temporality::LongTerm => "long-term",
            Temporality::Timeless => "timeless",
        }
    }
}

/// Temporality plus model confidence in that judgment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TemporalityJudgment {
    pub temporality: Temporality,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Quality tier derived from importance. Never assigned independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    A,
    B,
    C,
    D,
}

impl Tier {
    /// Importance is the max over the per-profile scores.
    pub fn from_importance(importance: f64) -> Self {
        if importance >= 8.0 {
            Tier::A
        } else if importance >= 6.5 {
            Tier::B
        } else if importance >= 5.0 {
            Tier::C
        } else {
            Tier::D
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::A => "A",
            Tier::B => "B",
            Tier::C => "C",
            Tier::D => "D",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "A" => Some(Tier::A),
            "B" => Some(Tier::B),
            "C" => Some(Tier::C),
            "D" => Some(Tier::D),
            _ => None,
        }
    }
}

/// A timestamped quote supporting a claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSpan {
    /// Order within the owning claim, starting at 0.
    pub sequence: i64,
    pub t0: Timestamp,
    pub t1: Timestamp,
    pub quote: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_text: Option<String>,
    pub context_type: ContextType,
}

/// Atomic assertion extracted from one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    pub source_id: SourceId,
    pub canonical_text: String,
    pub claim_type: ClaimType,
    /// Free-form speaker label inferred by the miner from textual context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// At least one span; enforced at storage time.
    pub evidence: Vec<EvidenceSpan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<DimensionScores>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_scores: Option<ProfileScores>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporality: Option<TemporalityJudgment>,
}

impl Claim {
    pub fn new(
        claim_id: impl Into<String>,
        source_id: SourceId,
        canonical_text: impl Into<String>,
        claim_type: ClaimType,
    ) -> Self {
        Self {
            claim_id: claim_id.into(),
            source_id,
            canonical_text: canonical_text.into(),
            claim_type,
            speaker: None,
            evidence: Vec::new(),
            dimensions: None,
            profile_scores: None,
            best_profile: None,
            tier: None,
            temporality: None,
        }
    }

    /// Importance, if the claim has been evaluated.
    pub fn importance(&self) -> Option<f64> {
        self.profile_scores.as_ref().map(|p| p.importance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_thresholds() {
        assert_eq!(Tier::from_importance(8.0), Tier::A);
        assert_eq!(Tier::from_importance(7.99), Tier::B);
        assert_eq!(Tier::from_importance(6.5), Tier::B);
        assert_eq!(Tier::from_importance(5.0), Tier::C);
        assert_eq!(Tier::from_importance(4.99), Tier::D);
    }

    #[test]
    fn context_type_coercion() {
        assert_eq!(ContextType::coerce("exact_quote"), ContextType::Exact);
        assert_eq!(ContextType::coerce("extended_context"), ContextType::Extended);
        assert_eq!(ContextType::coerce("full-segment"), ContextType::Segment);
        assert_eq!(ContextType::coerce("???"), ContextType::Exact);
    }
}
