//! Prompt templates
//!
//! Static prompt text for the unified miner, the flagship claim evaluator,
//! and the per-type entity evaluators. Miner prompts vary by content type;
//! everything else is fixed.

use quarry_core::ContentType;

/// Static prompt library.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptLibrary;

const MINER_CONTRACT: &str = r#"Return a single JSON object with exactly these keys:
{
  "claims": [{"canonical": str, "type": "factual|causal|normative|predictive|definitional",
              "speaker": str|null,
              "evidence_spans": [{"t0": "MM:SS", "t1": "MM:SS", "quote": str,
                                  "context_text": str|null,
                                  "context_type": "exact|extended|segment"}]}],
  "jargon": [{"name": str, "definition": str|null, "domain": str|null,
              "aliases": [str], "introduced_by": str|null, "evidence_spans": [...]}],
  "people": [{"name": str, "aliases": [str], "mentioned_by": str|null, "mentions": [...]}],
  "mental_models": [{"name": str, "definition": str|null, "aliases": [str],
                     "advocated_by": str|null, "evidence_spans": [...]}]
}
Every claim needs at least one evidence span quoting the transcript verbatim.
Record every occurrence of an entity, not just its first mention.
The "domain" field is free text; use the speaker's own framing.
Infer speaker names from textual cues only (introductions, address, style).
If a list has no items, return it empty. Do not add keys. Do not add commentary."#;

const MINER_TRANSCRIPT_OWN: &str = r#"You extract structured knowledge from a timestamped transcript of the user's own recording. The speaker labeled as the host is the user.

Extract atomic claims (one assertion each), jargon terms with in-context definitions, people mentioned, and named mental models. Prefer precision over volume; skip filler, ads, and meta-talk about the recording itself."#;

const MINER_TRANSCRIPT_THIRD_PARTY: &str = r#"You extract structured knowledge from a timestamped transcript of third-party long-form content (podcast, lecture, interview).

Extract atomic claims (one assertion each), jargon terms with in-context definitions, people mentioned, and named mental models. Attribute each claim to its speaker when the text makes that inferable; otherwise leave speaker null. Skip ads and housekeeping."#;

const MINER_DOCUMENT: &str = r#"You extract structured knowledge from a text document. Offsets are given per paragraph window in place of timestamps; reuse them verbatim in evidence spans.

Extract atomic claims (one assertion each), jargon terms with in-context definitions, people mentioned, and named mental models. Attribute claims to the document's author unless the text quotes someone else."#;

const FLAGSHIP_EVALUATOR: &str = r#"You score claims on six independent dimensions, each 0-10. Score each axis on its own rubric; do not let one axis leak into another. "Jerome Powell is the Fed Chairman" is highly verifiable yet low in epistemic value and novelty.

Dimensions:
- epistemic_value: how much understanding the claim adds if true
- actionability: how directly a reader could act on it
- novelty: how far it sits from common knowledge
- verifiability: how checkable it is against independent evidence
- temporal_stability: how long it will stay true
- scope: how broadly it applies beyond its immediate context

Also judge temporality (immediate|short-term|medium-term|long-term|timeless) with a 0-1 confidence.

Return a JSON array, one object per input claim, in input order:
[{"id": str, "epistemic_value": n, "actionability": n, "novelty": n,
  "verifiability": n, "temporal_stability": n, "scope": n,
  "temporality": str, "temporality_confidence": n}]
No commentary."#;

const JARGON_EVALUATOR: &str = r#"You rate extracted jargon terms for usefulness to a learner, 0-10 each. High scores: terms of art with substantive in-context definitions. Low scores: common words, brand names used generically, transcription noise.

Return a JSON array in input order: [{"name": str, "score": n}]. No commentary."#;

const PEOPLE_EVALUATOR: &str = r#"You rate extracted person mentions for knowledge-base relevance, 0-10 each. High scores: people whose ideas or actions the source engages with. Low scores: passing name-drops, greetings, channel promotion.

Return a JSON array in input order: [{"name": str, "score": n}]. No commentary."#;

const MENTAL_MODEL_EVALUATOR: &str = r#"You rate extracted mental models for substance, 0-10 each. High scores: named frameworks the source explains or applies. Low scores: vague labels with no explanatory content.

Return a JSON array in input order: [{"name": str, "score": n}]. No commentary."#;

impl PromptLibrary {
    /// System prompt for the unified miner, by content variant.
    pub fn miner_system(&self, content_type: ContentType) -> String {
        let variant = match content_type {
            ContentType::TranscriptOwn => MINER_TRANSCRIPT_OWN,
            ContentType::TranscriptThirdParty => MINER_TRANSCRIPT_THIRD_PARTY,
            ContentType::Document => MINER_DOCUMENT,
        };
        format!("{variant}\n\n{MINER_CONTRACT}")
    }

    pub fn flagship_evaluator_system(&self) -> &'static str {
        FLAGSHIP_EVALUATOR
    }

    pub fn jargon_evaluator_system(&self) -> &'static str {
        JARGON_EVALUATOR
    }

    pub fn people_evaluator_system(&self) -> &'static str {
        PEOPLE_EVALUATOR
    }

    pub fn mental_model_evaluator_system(&self) -> &'static str {
        MENTAL_MODEL_EVALUATOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_miner_variant_carries_the_contract() {
        let lib = PromptLibrary;
        for ct in [
            ContentType::TranscriptOwn,
            ContentType::TranscriptThirdParty,
            ContentType::Document,
        ] {
            let prompt = lib.miner_system(ct);
            assert!(prompt.contains("\"claims\""));
            assert!(prompt.contains("\"mental_models\""));
            assert!(prompt.contains("every occurrence"));
        }
    }

    #[test]
    fn variants_differ() {
        let lib = PromptLibrary;
        assert_ne!(
            lib.miner_system(ContentType::TranscriptOwn),
            lib.miner_system(ContentType::Document)
        );
    }
}
