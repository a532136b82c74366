//! Entity evaluators
//!
//! Bulk per-type passes scoring jargon, people, and mental models so that
//! surface-level noise (brand names, greetings, empty labels) can be
//! filtered. These run independently of the flagship evaluator and may run
//! in parallel with it for the same source.

use serde::Deserialize;
use tracing::debug;

use quarry_core::{entity::normalize_name, GenerateRequest, JargonTerm, MentalModel, Person};
use quarry_config::PromptLibrary;
use quarry_llm::{LlmAdapter, ProviderUri, RequestContext};

use crate::miner::parse_json_lenient;
use crate::MiningError;

/// One scored entity name.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityScore {
    pub name: String,
    pub score: f64,
}

pub struct EntityEvaluator<'a> {
    adapter: &'a LlmAdapter,
    prompts: PromptLibrary,
    provider: ProviderUri,
}

impl<'a> EntityEvaluator<'a> {
    pub fn new(adapter: &'a LlmAdapter, provider: ProviderUri) -> Self {
        Self { adapter, prompts: PromptLibrary, provider }
    }

    /// Score jargon terms in place.
    pub async fn evaluate_jargon(
        &self,
        terms: &mut [JargonTerm],
        ctx: &RequestContext,
    ) -> Result<(), MiningError> {
        if terms.is_empty() {
            return Ok(());
        }
        let listing = terms
            .iter()
            .map(|t| {
                format!(
                    "{} — {}",
                    t.name,
                    t.definition.as_deref().unwrap_or("(no definition)")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let scores = self
            .bulk_scores(self.prompts.jargon_evaluator_system(), &listing, ctx)
            .await?;
        for term in terms.iter_mut() {
            term.quality_score = lookup(&scores, &term.name);
        }
        debug!(terms = terms.len(), "jargon scored");
        Ok(())
    }

    /// Score person mentions in place.
    pub async fn evaluate_people(
        &self,
        people: &mut [Person],
        ctx: &RequestContext,
    ) -> Result<(), MiningError> {
        if people.is_empty() {
            return Ok(());
        }
        let listing = people.iter().map(|p| p.name.clone()).collect::<Vec<_>>().join("\n");
        let scores = self
            .bulk_scores(self.prompts.people_evaluator_system(), &listing, ctx)
            .await?;
        for person in people.iter_mut() {
            person.quality_score = lookup(&scores, &person.name);
        }
        debug!(people = people.len(), "people scored");
        Ok(())
    }

    /// Score mental models in place.
    pub async fn evaluate_mental_models(
        &self,
        models: &mut [MentalModel],
        ctx: &RequestContext,
    ) -> Result<(), MiningError> {
        if models.is_empty() {
            return Ok(());
        }
        let listing = models
            .iter()
            .map(|m| {
                format!(
                    "{} — {}",
                    m.name,
                    m.definition.as_deref().unwrap_or("(no definition)")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let scores = self
            .bulk_scores(self.prompts.mental_model_evaluator_system(), &listing, ctx)
            .await?;
        for model in models.iter_mut() {
            model.quality_score = lookup(&scores, &model.name);
        }
        debug!(models = models.len(), "mental models scored");
        Ok(())
    }

    async fn bulk_scores(
        &self,
        system: &str,
        listing: &str,
        ctx: &RequestContext,
    ) -> Result<Vec<EntityScore>, MiningError> {
        let request = GenerateRequest::new(system)
            .with_user_message(listing)
            .with_max_tokens(1024)
            .with_temperature(0.0)
            .with_json_mode(true);

        let response = self.adapter.generate(&self.provider, request, ctx).await?;
        let value = parse_json_lenient(&response.text)
            .ok_or_else(|| MiningError::Unparseable(response.text.chars().take(200).collect()))?;

        let items = match &value {
            serde_json::Value::Array(items) => items.clone(),
            serde_json::Value::Object(map) => map
                .values()
                .find_map(|v| v.as_array().cloned())
                .ok_or_else(|| MiningError::EvaluatorMismatch("no array in response".to_string()))?,
            _ => {
                return Err(MiningError::EvaluatorMismatch("unexpected response shape".to_string()))
            }
        };

        Ok(items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<EntityScore>(item).ok())
            .map(|mut s| {
                s.score = s.score.clamp(0.0, 10.0);
                s
            })
            .collect())
    }
}

fn lookup(scores: &[EntityScore], name: &str) -> Option<f64> {
    let key = normalize_name(name);
    scores.iter().find(|s| normalize_name(&s.name) == key).map(|s| s.score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quarry_core::{GenerateResponse, NoopLlmIoLog, SourceId};
    use quarry_config::Settings;
    use quarry_llm::{HardwareProfile, LlmBackend, ProviderFamily, StubMemoryMonitor};
    use std::collections::HashMap;
    use std::sync::Arc;

    struct NameEchoBackend;

    #[async_trait]
    impl LlmBackend for NameEchoBackend {
        async fn generate(
            &self,
            _model: &str,
            request: &GenerateRequest,
        ) -> Result<GenerateResponse, quarry_llm::LlmError> {
            let user = &request.messages.last().unwrap().content;
            let scores: Vec<serde_json::Value> = user
                .lines()
                .map(|line| {
                    let name = line.split(" — ").next().unwrap_or(line);
                    serde_json::json!({"name": name, "score": 7.5})
                })
                .collect();
            Ok(GenerateResponse::text_only(serde_json::to_string(&scores).unwrap()))
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

    fn adapter() -> LlmAdapter {
        let mut backends: HashMap<String, Arc<dyn LlmBackend>> = HashMap::new();
        backends.insert("local".to_string(), Arc::new(NameEchoBackend));
        LlmAdapter::with_backends(
            backends,
            &Settings::default(),
            HardwareProfile::from_specs(8, 32.0),
            Arc::new(StubMemoryMonitor::new(0.30)),
            Arc::new(NoopLlmIoLog),
        )
    }

    #[tokio::test]
    async fn jargon_scores_round_trip_by_name() {
        let adapter = adapter();
        let evaluator = EntityEvaluator::new(&adapter, ProviderUri::parse("local:m").unwrap());
        let mut terms = vec![JargonTerm {
            entity_id: "e1".into(),
            source_id: SourceId::new("s"),
            name: "Duration Risk".into(),
            definition: Some("sensitivity of bond prices to rates".into()),
            domain: Some("fixed income".into()),
            aliases: vec![],
            introduced_by: None,
            evidence: vec![],
            quality_score: None,
        }];
        evaluator
            .evaluate_jargon(&mut terms, &RequestContext::detached())
            .await
            .unwrap();
        assert_eq!(terms[0].quality_score, Some(7.5));
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let adapter = adapter();
        let evaluator = EntityEvaluator::new(&adapter, ProviderUri::parse("local:m").unwrap());
        let mut people: Vec<Person> = Vec::new();
        evaluator
            .evaluate_people(&mut people, &RequestContext::detached())
            .await
            .unwrap();
    }
}
