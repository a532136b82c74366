//! Evaluation score vectors
//!
//! A claim is scored on six independent dimensions by the flagship evaluator.
//! Profile scores are weighted sums over those dimensions, computed without
//! any further model calls.

use serde::{Deserialize, Serialize};

/// Number of evaluation dimensions.
pub const DIMENSION_COUNT: usize = 6;

/// Six independent dimension scores, each in `[0, 10]`.
///
/// Dimensions are scored on their own rubric: a widely known fact can be
/// maximally verifiable while contributing nothing novel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub epistemic_value: f64,
    pub actionability: f64,
    pub novelty: f64,
    pub verifiability: f64,
    pub temporal_stability: f64,
    pub scope: f64,
}

impl DimensionScores {
    pub fn new(
        epistemic_value: f64,
        actionability: f64,
        novelty: f64,
        verifiability: f64,
        temporal_stability: f64,
        scope: f64,
    ) -> Self {
        let c = |v: f64| v.clamp(0.0, 10.0);
        Self {
            epistemic_value: c(epistemic_value),
            actionability: c(actionability),
            novelty: c(novelty),
            verifiability: c(verifiability),
            temporal_stability: c(temporal_stability),
            scope: c(scope),
        }
    }

    /// Fixed ordering used by weight vectors:
    /// `[epistemic, actionability, novelty, verifiability, temporal, scope]`.
    pub fn as_array(&self) -> [f64; DIMENSION_COUNT] {
        [
            self.epistemic_value,
            self.actionability,
            self.novelty,
            self.verifiability,
            self.temporal_stability,
            self.scope,
        ]
    }
}

/// Per-archetype weighted scores for one claim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileScores {
    /// `(profile name, score)`, in the scorer's fixed profile order.
    pub scores: Vec<(String, f64)>,
}

impl ProfileScores {
    /// Highest profile score; this is the claim's importance.
    pub fn importance(&self) -> f64 {
        self.scores
            .iter()
            .map(|(_, s)| *s)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Name of the best-scoring profile.
    pub fn best_profile(&self) -> Option<&str> {
        self.scores
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_clamp_to_range() {
        let d = DimensionScores::new(12.0, -1.0, 5.0, 5.0, 5.0, 5.0);
        assert_eq!(d.epistemic_value, 10.0);
        assert_eq!(d.actionability, 0.0);
    }

    #[test]
    fn importance_is_max_and_best_is_argmax() {
        let p = ProfileScores {
            scores: vec![
                ("scientist".into(), 6.1),
                ("investor".into(), 7.9),
                ("student".into(), 3.0),
            ],
        };
        assert_eq!(p.importance(), 7.9);
        assert_eq!(p.best_profile(), Some("investor"));
    }
}
