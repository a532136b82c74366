//! Multi-profile scoring
//!
//! Twelve static user archetypes, each a weight vector over the six
//! evaluation dimensions summing to 1.0. Importance is the maximum weighted
//! sum; tier follows from importance. Pure arithmetic, no model calls, so a
//! niche claim that one archetype cares deeply about is not averaged into
//! mediocrity.

use quarry_core::{Claim, DimensionScores, ProfileScores, Tier, DIMENSION_COUNT};

/// One archetype: name plus weights in dimension order
/// `[epistemic, actionability, novelty, verifiability, temporal, scope]`.
#[derive(Debug, Clone, Copy)]
pub struct ProfileWeights {
    pub name: &'static str,
    pub weights: [f64; DIMENSION_COUNT],
}

const PROFILES: [ProfileWeights; 12] = [
    ProfileWeights { name: "scientist", weights: [0.45, 0.02, 0.13, 0.28, 0.08, 0.04] },
    ProfileWeights { name: "engineer", weights: [0.18, 0.40, 0.10, 0.18, 0.06, 0.08] },
    ProfileWeights { name: "entrepreneur", weights: [0.12, 0.42, 0.18, 0.10, 0.04, 0.14] },
    ProfileWeights { name: "investor", weights: [0.18, 0.30, 0.15, 0.15, 0.10, 0.12] },
    ProfileWeights { name: "journalist", weights: [0.15, 0.10, 0.30, 0.30, 0.05, 0.10] },
    ProfileWeights { name: "educator", weights: [0.30, 0.12, 0.08, 0.20, 0.15, 0.15] },
    ProfileWeights { name: "policy_analyst", weights: [0.22, 0.18, 0.10, 0.20, 0.12, 0.18] },
    ProfileWeights { name: "clinician", weights: [0.20, 0.30, 0.08, 0.25, 0.10, 0.07] },
    ProfileWeights { name: "historian", weights: [0.30, 0.04, 0.12, 0.22, 0.22, 0.10] },
    ProfileWeights { name: "philosopher", weights: [0.40, 0.05, 0.20, 0.10, 0.15, 0.10] },
    ProfileWeights {
        name: "generalist",
        weights: [
            1.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0,
        ],
    },
    ProfileWeights { name: "student", weights: [0.25, 0.15, 0.15, 0.15, 0.10, 0.20] },
];

/// The static archetype table.
pub fn profiles() -> &'static [ProfileWeights; 12] {
    &PROFILES
}

/// Arithmetic scorer over the archetype table.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiProfileScorer;

impl MultiProfileScorer {
    /// Weighted sums for every archetype.
    pub fn score(&self, dimensions: &DimensionScores) -> ProfileScores {
        let values = dimensions.as_array();
        let scores = PROFILES
            .iter()
            .map(|profile| {
                let score: f64 = profile
                    .weights
                    .iter()
                    .zip(values.iter())
                    .map(|(w, v)| w * v)
                    .sum();
                (profile.name.to_string(), score)
            })
            .collect();
        ProfileScores { scores }
    }

    /// Fill a claim's derived evaluation fields from its dimension scores.
    /// A claim with no dimensions is left untouched.
    pub fn apply(&self, claim: &mut Claim) {
        let Some(dimensions) = claim.dimensions else {
            return;
        };
        let profile_scores = self.score(&dimensions);
        let importance = profile_scores.importance();
        claim.best_profile = profile_scores.best_profile().map(str::to_string);
        claim.tier = Some(Tier::from_importance(importance));
        claim.profile_scores = Some(profile_scores);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{ClaimType, SourceId};

    #[test]
    fn every_profile_sums_to_one() {
        for profile in profiles() {
            let sum: f64 = profile.weights.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "{} sums to {sum}", profile.name);
            assert!(profile.weights.iter().all(|&w| w >= 0.0));
        }
    }

    #[test]
    fn importance_is_max_over_profiles() {
        let scorer = MultiProfileScorer;
        // Pure actionability favors the entrepreneur profile
        let dims = DimensionScores::new(0.0, 10.0, 0.0, 0.0, 0.0, 0.0);
        let scores = scorer.score(&dims);
        assert_eq!(scores.best_profile(), Some("entrepreneur"));
        assert!((scores.importance() - 4.2).abs() < 1e-9);

        // Manual max check across all profiles
        let max = scores.scores.iter().map(|(_, s)| *s).fold(f64::MIN, f64::max);
        assert_eq!(scores.importance(), max);
    }

    #[test]
    fn uniform_dimensions_score_equal_everywhere() {
        let scorer = MultiProfileScorer;
        let scores = scorer.score(&DimensionScores::new(7.0, 7.0, 7.0, 7.0, 7.0, 7.0));
        for (name, score) in &scores.scores {
            assert!((score - 7.0).abs() < 1e-9, "{name} scored {score}");
        }
    }

    #[test]
    fn apply_sets_tier_and_best_profile() {
        let scorer = MultiProfileScorer;
        let mut claim = Claim::new("c1", SourceId::new("s"), "text", ClaimType::Factual);
        claim.dimensions = Some(DimensionScores::new(9.0, 8.5, 9.0, 9.5, 8.0, 8.5));
        scorer.apply(&mut claim);

        assert_eq!(claim.tier, Some(Tier::A));
        assert!(claim.best_profile.is_some());
        assert_eq!(claim.profile_scores.as_ref().unwrap().scores.len(), 12);
        assert!(claim.importance().unwrap() >= 8.0);
    }

    #[test]
    fn tier_boundaries_via_scorer() {
        let scorer = MultiProfileScorer;
        let mut claim = Claim::new("c2", SourceId::new("s"), "text", ClaimType::Factual);
        claim.dimensions = Some(DimensionScores::new(5.0, 5.0, 5.0, 5.0, 5.0, 5.0));
        scorer.apply(&mut claim);
        // Uniform 5s give every profile exactly 5.0 -> tier C
        assert_eq!(claim.tier, Some(Tier::C));
    }

    #[test]
    fn unevaluated_claim_is_untouched() {
        let scorer = MultiProfileScorer;
        let mut claim = Claim::new("c3", SourceId::new("s"), "text", ClaimType::Factual);
        scorer.apply(&mut claim);
        assert!(claim.tier.is_none());
        assert!(claim.profile_scores.is_none());
    }
}
