//! Unified miner
//!
//! One adapter call per window returns claims, jargon, people, and mental
//! models together. This replaced the historical per-category extraction
//! passes, cutting calls per window from four to one.

use serde_json::Value;
use tracing::{debug, info, warn};

use quarry_core::{ContentType, GenerateRequest, MiningWindow, SourceId};
use quarry_config::PromptLibrary;
use quarry_llm::{LlmAdapter, ProviderUri, RequestContext};

use crate::repair::repair_payload;
use crate::schema::{validate_miner_payload, MinerOutput, WindowHarvest};
use crate::MiningError;

#[derive(Debug, Clone)]
pub struct UnifiedMinerConfig {
    pub provider: ProviderUri,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl UnifiedMinerConfig {
    pub fn new(provider: ProviderUri) -> Self {
        Self { provider, max_tokens: 4096, temperature: 0.2 }
    }
}

pub struct UnifiedMiner<'a> {
    adapter: &'a LlmAdapter,
    prompts: PromptLibrary,
    config: UnifiedMinerConfig,
}

impl<'a> UnifiedMiner<'a> {
    pub fn new(adapter: &'a LlmAdapter, config: UnifiedMinerConfig) -> Self {
        Self { adapter, prompts: PromptLibrary, config }
    }

    /// Mine one window. Windows of a source are independent, so callers may
    /// run several of these concurrently under the adapter's limits.
    pub async fn mine_window(
        &self,
        source_id: &SourceId,
        content_type: ContentType,
        window: &MiningWindow,
        ctx: &RequestContext,
    ) -> Result<WindowHarvest, MiningError> {
        let request = GenerateRequest::new(self.prompts.miner_system(content_type))
            .with_user_message(format!(
                "Window {} [{} - {}]:\n\n{}",
                window.index,
                window.t0.to_mmss(),
                window.t1.to_mmss(),
                window.text
            ))
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature)
            .with_json_mode(true);

        let response = self.adapter.generate(&self.config.provider, request, ctx).await?;

        let mut payload = parse_json_lenient(&response.text)
            .ok_or_else(|| MiningError::Unparseable(snippet(&response.text)))?;

        let violations = validate_miner_payload(&payload);
        if !violations.is_empty() {
            debug!(window = window.index, violations = violations.len(), "repairing miner payload");
            repair_payload(&mut payload);
            let remaining = validate_miner_payload(&payload);
            if !remaining.is_empty() {
                // Accept anyway; conversion below is tolerant of stragglers
                warn!(
                    window = window.index,
                    violations = remaining.len(),
                    first = %remaining.first().cloned().unwrap_or_default(),
                    "miner payload still invalid after repair, accepting"
                );
            }
        }

        let output: MinerOutput = serde_json::from_value(payload)
            .map_err(|e| MiningError::Unparseable(e.to_string()))?;

        let harvest = output.into_harvest(source_id, window);
        info!(
            source = %source_id,
            window = window.index,
            claims = harvest.claims.len(),
            jargon = harvest.jargon.len(),
            people = harvest.people.len(),
            models = harvest.mental_models.len(),
            "window mined"
        );
        Ok(harvest)
    }
}

/// Parse model output that may carry code fences or prose around the JSON.
pub(crate) fn parse_json_lenient(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    // Strip a ```json fence
    if let Some(inner) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.rsplit_once("```").map(|(body, _)| body))
    {
        if let Ok(value) = serde_json::from_str(inner.trim()) {
            return Some(value);
        }
    }

    // Last resort: widest braces
    let start = trimmed.find(['{', '['])?;
    let end = trimmed.rfind(['}', ']'])?;
    if end <= start {
        return None;
    }
    serde_json::from_str(trimmed[start..=end].trim()).ok()
}

fn snippet(text: &str) -> String {
    text.chars().take(200).collect()
}
