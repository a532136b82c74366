//! Flagship claim evaluator
//!
//! One call per batch of claims returns the six dimension scores for each.
//! Importance is never asked of the model; it is derived arithmetically by
//! the scorer. The prompt hammers on dimension independence so that a
//! famous-but-obvious fact can be high verifiability and low novelty at
//! once.

use serde::Deserialize;
use tracing::{debug, warn};

use quarry_core::{
    Claim, DimensionScores, GenerateRequest, Temporality, TemporalityJudgment,
};
use quarry_config::PromptLibrary;
use quarry_llm::{LlmAdapter, ProviderUri, RequestContext};

use crate::miner::parse_json_lenient;
use crate::profiles::MultiProfileScorer;
use crate::MiningError;

/// Parsed evaluation for one claim.
#[derive(Debug, Clone)]
pub struct ClaimEvaluation {
    pub claim_id: String,
    pub dimensions: DimensionScores,
    pub temporality: Option<TemporalityJudgment>,
}

pub struct FlagshipEvaluator<'a> {
    adapter: &'a LlmAdapter,
    prompts: PromptLibrary,
    provider: ProviderUri,
    batch_size: usize,
    scorer: MultiProfileScorer,
}

impl<'a> FlagshipEvaluator<'a> {
    pub fn new(adapter: &'a LlmAdapter, provider: ProviderUri, batch_size: usize) -> Self {
        Self {
            adapter,
            prompts: PromptLibrary,
            provider,
            batch_size: batch_size.max(1),
            scorer: MultiProfileScorer,
        }
    }

    /// Evaluate claims in place: dimension scores from the model, then the
    /// derived profile scores, best profile, and tier from the scorer.
    pub async fn evaluate(
        &self,
        claims: &mut [Claim],
        ctx: &RequestContext,
    ) -> Result<(), MiningError> {
        for batch_start in (0..claims.len()).step_by(self.batch_size) {
            let batch_end = (batch_start + self.batch_size).min(claims.len());
            let batch = &mut claims[batch_start..batch_end];
            let evaluations = self.evaluate_batch(batch, ctx).await?;

            for claim in batch.iter_mut() {
                let Some(eval) = evaluations.iter().find(|e| e.claim_id == claim.claim_id) else {
                    warn!(claim = %claim.claim_id, "evaluator returned no scores for claim");
                    continue;
                };
                claim.dimensions = Some(eval.dimensions);
                claim.temporality = eval.temporality;
                self.scorer.apply(claim);
            }
        }
        Ok(())
    }

    async fn evaluate_batch(
        &self,
        batch: &[Claim],
        ctx: &RequestContext,
    ) -> Result<Vec<ClaimEvaluation>, MiningError> {
        let listing = batch
            .iter()
            .map(|c| {
                format!(
                    "id: {}\nclaim: {}\nspeaker: {}",
                    c.claim_id,
                    c.canonical_text,
                    c.speaker.as_deref().unwrap_or("unknown")
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = GenerateRequest::new(self.prompts.flagship_evaluator_system())
            .with_user_message(listing)
            .with_max_tokens(2048)
            .with_temperature(0.0)
            .with_json_mode(true);

        let response = self.adapter.generate(&self.provider, request, ctx).await?;
        let parsed = parse_evaluations(&response.text)?;
        debug!(batch = batch.len(), scored = parsed.len(), "claim batch evaluated");
        Ok(parsed)
    }
}

#[derive(Debug, Deserialize)]
struct WireEvaluation {
    id: String,
    epistemic_value: f64,
    actionability: f64,
    novelty: f64,
    verifiability: f64,
    temporal_stability: f64,
    scope: f64,
    #[serde(default)]
    temporality: Option<String>,
    #[serde(default)]
    temporality_confidence: Option<f64>,
}

fn parse_temporality(raw: &str) -> Option<Temporality> {
    match raw.trim().to_lowercase().replace('_', "-").as_str() {
        "immediate" => Some(Temporality::Immediate),
        "short-term" => Some(Temporality::ShortTerm),
        "medium-term" => Some(Temporality::MediumTerm),
        "long-term" => Some(Temporality::LongTerm),
        "timeless" => Some(Temporality::Timeless),
        _ => None,
    }
}

fn parse_evaluations(text: &str) -> Result<Vec<ClaimEvaluation>, MiningError> {
    let value = parse_json_lenient(text)
        .ok_or_else(|| MiningError::Unparseable(text.chars().take(200).collect()))?;

    // Accept either a bare array or an object wrapping one
    let items = match &value {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(map) => map
            .values()
            .find_map(|v| v.as_array().cloned())
            .ok_or_else(|| MiningError::EvaluatorMismatch("no array in response".to_string()))?,
        _ => return Err(MiningError::EvaluatorMismatch("unexpected response shape".to_string())),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<WireEvaluation>(item).ok())
        .map(|wire| ClaimEvaluation {
            claim_id: wire.id,
            dimensions: DimensionScores::new(
                wire.epistemic_value,
                wire.actionability,
                wire.novelty,
                wire.verifiability,
                wire.temporal_stability,
                wire.scope,
            ),
            temporality: wire.temporality.as_deref().and_then(parse_temporality).map(
                |temporality| TemporalityJudgment {
                    temporality,
                    confidence: wire.temporality_confidence.unwrap_or(0.5).clamp(0.0, 1.0),
                },
            ),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use quarry_core::{ClaimType, GenerateResponse, NoopLlmIoLog, SourceId, Tier};
    use quarry_config::Settings;
    use quarry_llm::{HardwareProfile, LlmBackend, ProviderFamily, StubMemoryMonitor};
    use std::collections::HashMap;
    use std::sync::Arc;

    struct EchoScoreBackend {
        requests_seen: Mutex<usize>,
    }

    #[async_trait]
    impl LlmBackend for EchoScoreBackend {
        async fn generate(
            &self,
            _model: &str,
            request: &GenerateRequest,
        ) -> Result<GenerateResponse, quarry_llm::LlmError> {
            *self.requests_seen.lock() += 1;
            // Score every listed claim id with fixed dimensions
            let user = &request.messages.last().unwrap().content;
            let evaluations: Vec<serde_json::Value> = user
                .lines()
                .filter_map(|line| line.strip_prefix("id: "))
                .map(|id| {
                    serde_json::json!({
                        "id": id,
                        "epistemic_value": 9.0,
                        "actionability": 4.0,
                        "novelty": 7.0,
                        "verifiability": 8.0,
                        "temporal_stability": 6.0,
                        "scope": 5.0,
                        "temporality": "long-term",
                        "temporality_confidence": 0.8
                    })
                })
                .collect();
            Ok(GenerateResponse::text_only(serde_json::to_string(&evaluations).unwrap()))
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn family(&self) -> ProviderFamily {
            ProviderFamily::Local
        }

        fn provider_name(&self) -> &str {
            "local"
        }
    }

    fn adapter(backend: Arc<dyn LlmBackend>) -> LlmAdapter {
        let mut backends: HashMap<String, Arc<dyn LlmBackend>> = HashMap::new();
        backends.insert("local".to_string(), backend);
        LlmAdapter::with_backends(
            backends,
            &Settings::default(),
            HardwareProfile::from_specs(8, 32.0),
            Arc::new(StubMemoryMonitor::new(0.30)),
            Arc::new(NoopLlmIoLog),
        )
    }

    fn claims(n: usize) -> Vec<Claim> {
        (0..n)
            .map(|i| {
                Claim::new(format!("c{i}"), SourceId::new("s"), format!("claim {i}"), ClaimType::Factual)
            })
            .collect()
    }

    #[tokio::test]
    async fn evaluates_and_derives_tiers() {
        let backend = Arc::new(EchoScoreBackend { requests_seen: Mutex::new(0) });
        let adapter = adapter(backend.clone());
        let evaluator =
            FlagshipEvaluator::new(&adapter, ProviderUri::parse("local:m").unwrap(), 8);

        let mut claims = claims(3);
        evaluator.evaluate(&mut claims, &RequestContext::detached()).await.unwrap();

        for claim in &claims {
            let dims = claim.dimensions.expect("dimensions set");
            assert_eq!(dims.epistemic_value, 9.0);
            assert!(claim.profile_scores.is_some());
            assert!(claim.best_profile.is_some());
            // Scientist profile: .45*9 + .02*4 + .13*7 + .28*8 + .08*6 + .04*5 = 7.96 -> B tier unless
            // another profile exceeds 8.0; with these dimensions none does.
            assert_eq!(claim.tier, Some(Tier::B));
            assert_eq!(
                claim.temporality.unwrap().temporality,
                Temporality::LongTerm
            );
        }
    }

    #[tokio::test]
    async fn batches_by_configured_size() {
        let backend = Arc::new(EchoScoreBackend { requests_seen: Mutex::new(0) });
        let adapter = adapter(backend.clone());
        let evaluator =
            FlagshipEvaluator::new(&adapter, ProviderUri::parse("local:m").unwrap(), 2);

        let mut claims = claims(5);
        evaluator.evaluate(&mut claims, &RequestContext::detached()).await.unwrap();
        assert_eq!(*backend.requests_seen.lock(), 3);
    }

    #[test]
    fn parses_wrapped_arrays() {
        let text = r#"{"evaluations": [{"id": "a", "epistemic_value": 1, "actionability": 2,
            "novelty": 3, "verifiability": 4, "temporal_stability": 5, "scope": 6}]}"#;
        let parsed = parse_evaluations(text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].dimensions.scope, 6.0);
        assert!(parsed[0].temporality.is_none());
    }

    #[test]
    fn temporality_spellings() {
        assert_eq!(parse_temporality("Long-Term"), Some(Temporality::LongTerm));
        assert_eq!(parse_temporality("short_term"), Some(Temporality::ShortTerm));
        assert_eq!(parse_temporality("forever"), None);
    }
}
