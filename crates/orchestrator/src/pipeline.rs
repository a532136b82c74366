//! Concrete stage handlers
//!
//! Bind the acquisition, audio, mining, and storage components into the
//! orchestrator's chain. Each handler is one stage: download → transcribe →
//! mine → evaluate (which also finishes the storage stage). Stages are
//! independently retryable because every handoff goes through the database.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use quarry_acquire::{AcquisitionScheduler, UrlStatus};
use quarry_audio::{
    collapse_repetitions, validate_quality, Normalizer, Segmenter, SegmenterConfig,
};
use quarry_config::Settings;
use quarry_core::{
    ContentType, ErrorEnvelope, FetchFailureKind, Job, Segment, Severity, Source, SourceId,
    SourceType, Stage, StageState, StageStatus, Timestamp, Transcriber, TranscriptionRequest,
};
use quarry_llm::{LlmAdapter, ProviderUri, RequestContext};
use quarry_mining::{EntityEvaluator, FlagshipEvaluator, UnifiedMiner, UnifiedMinerConfig};
use quarry_store::{ClaimStore, MarkdownWriter, MediaStore, PipelineOutput, SourceUpdate};

use crate::orchestrator::{JobHandler, RunContext};

fn envelope(code: &str, severity: Severity, message: impl Into<String>) -> ErrorEnvelope {
    ErrorEnvelope::new(code, severity, message)
}

fn source_id_of(job: &Job) -> SourceId {
    SourceId::from_url(&job.input_id).unwrap_or_else(|| SourceId::new(&job.input_id))
}

/// Run error code for a failed download, from the scheduler's last observed
/// failure kind. Rate limits and timeouts are the transient ones.
fn acquisition_code(kind: Option<FetchFailureKind>) -> &'static str {
    match kind {
        Some(FetchFailureKind::RateLimited) => "acquisition_rate_limited",
        Some(FetchFailureKind::Timeout) => "acquisition_timeout",
        Some(FetchFailureKind::Auth) => "acquisition_auth_failed",
        Some(FetchFailureKind::Unavailable) => "acquisition_unavailable",
        Some(FetchFailureKind::Other) | None => "acquisition_failed",
    }
}

/// Download one URL through the acquisition scheduler and record the source.
pub struct DownloadHandler {
    pub scheduler: Arc<AcquisitionScheduler>,
    pub media: MediaStore,
}

#[async_trait]
impl JobHandler for DownloadHandler {
    async fn execute(&self, job: &Job, ctx: &RunContext) -> Result<serde_json::Value, ErrorEnvelope> {
        let report = self
            .scheduler
            .run(std::slice::from_ref(&job.input_id), &ctx.cancel)
            .await
            .map_err(|e| envelope(e.code(), Severity::Medium, e.to_string()))?;

        let outcome = report
            .outcomes
            .first()
            .ok_or_else(|| envelope("acquisition_failed", Severity::Medium, "no outcome for url"))?;

        match outcome.status {
            UrlStatus::Downloaded | UrlStatus::AlreadyDownloaded => {}
            _ => {
                return Err(envelope(
                    acquisition_code(outcome.failure_kind),
                    Severity::Medium,
                    outcome.error.clone().unwrap_or_else(|| "download failed".to_string()),
                ))
            }
        }

        let source_id = outcome
            .source_id
            .clone()
            .ok_or_else(|| envelope("acquisition_failed", Severity::High, "missing source id"))?;

        let mut source = Source::new(source_id.clone(), SourceType::Url);
        source.url = Some(outcome.url.clone());
        if let Some(media) = &outcome.media {
            source.title = media.title.clone();
            source.duration_seconds = media.duration_seconds;
            source.uploader = media.uploader.clone();
            source.upload_date = media.upload_date.clone();
            source.description = media.description.clone();
            source.tags = media.tags.clone();
            source.chapters = media.chapters.clone();
            source.thumbnail_local_path = media
                .thumbnail_local_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string());
            source.audio_file_path = Some(media.audio_path.to_string_lossy().to_string());
        }
        self.media
            .get_or_create_source(source)
            .await
            .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?;

        Ok(json!({"source_id": source_id, "skipped": outcome.status == UrlStatus::AlreadyDownloaded}))
    }
}

/// Normalize audio, transcribe, gate quality, collapse repetition, persist
/// segments.
pub struct TranscribeHandler {
    pub normalizer: Arc<Normalizer>,
    pub transcriber: Arc<dyn Transcriber>,
    pub media: MediaStore,
    pub settings: Settings,
}

#[async_trait]
impl JobHandler for TranscribeHandler {
    async fn execute(&self, job: &Job, ctx: &RunContext) -> Result<serde_json::Value, ErrorEnvelope> {
        let source_id = source_id_of(job);
        let source = self
            .media
            .get_source(&source_id)
            .await
            .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?
            .ok_or_else(|| {
                envelope("transcription_failed", Severity::High, format!("unknown source {source_id}"))
            })?;

        // Local files skip the download stage entirely
        if source.source_type != SourceType::Url {
            ctx.report_stage(
                StageStatus::new(source_id.clone(), Stage::Download, StageState::Skipped)
                    .with_metadata(json!({"reason": "local_file"})),
            )
            .await;
        }

        let audio_path = source
            .audio_file_path
            .clone()
            .or_else(|| source.file_path.clone())
            .ok_or_else(|| {
                envelope("transcription_failed", Severity::High, "source has no audio file")
            })?;

        ctx.report_stage(StageStatus::new(
            source_id.clone(),
            Stage::Transcription,
            StageState::InProgress,
        ))
        .await;

        if ctx.cancel.is_cancelled() {
            return Err(envelope("cancelled", Severity::Low, "cancelled"));
        }

        let work_dir = std::env::temp_dir().join("quarry-audio");
        let normalized = self
            .normalizer
            .normalize(std::path::Path::new(&audio_path), &work_dir)
            .await
            .map_err(|e| envelope(e.code(), Severity::Medium, e.to_string()))?;

        self.media
            .update_source(
                &source_id,
                SourceUpdate { checksum: Some(normalized.checksum.clone()), ..Default::default() },
            )
            .await
            .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?;

        // Context prompt: first tags, else the title
        let initial_prompt = if source.tags.is_empty() {
            source.title.clone()
        } else {
            Some(source.tags.iter().take(10).cloned().collect::<Vec<_>>().join(", "))
        };

        let language = match self.settings.transcription.language.as_str() {
            "auto" => None,
            code => Some(code.to_string()),
        };
        let request = TranscriptionRequest {
            audio_path: normalized.path.clone(),
            model_size: self.settings.transcription.whisper_model.clone(),
            language,
            initial_prompt,
        };

        let raw = self
            .transcriber
            .transcribe(&request)
            .await
            .map_err(|e| envelope("transcription_failed", Severity::Medium, e.to_string()))?;

        validate_quality(&raw.segments, &raw.language)
            .map_err(|e| envelope(e.code(), Severity::Medium, e.to_string()))?;
        let (cleaned, repetition) = collapse_repetitions(raw.segments);

        let segments: Vec<Segment> = cleaned
            .iter()
            .enumerate()
            .map(|(i, s)| Segment {
                source_id: source_id.clone(),
                segment_id: i as i64,
                t0: Timestamp::from_seconds(s.t0),
                t1: Timestamp::from_seconds(s.t1),
                text: s.text.clone(),
            })
            .collect();

        let written = self
            .media
            .save_segments(&segments)
            .await
            .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?;

        info!(
            source = %source_id,
            segments = segments.len(),
            new_rows = written,
            language = %raw.language,
            "transcription stored"
        );
        Ok(json!({
            "segments": segments.len(),
            "language": raw.language,
            "collapsed_repetition_runs": repetition.runs,
        }))
    }
}

/// Mine every window of a source's transcript, checkpointing after each.
pub struct MineHandler {
    pub adapter: Arc<LlmAdapter>,
    pub media: MediaStore,
    pub claims: ClaimStore,
    pub settings: Settings,
    pub provider: ProviderUri,
}

#[async_trait]
impl JobHandler for MineHandler {
    async fn execute(&self, job: &Job, ctx: &RunContext) -> Result<serde_json::Value, ErrorEnvelope> {
        let source_id = source_id_of(job);
        let source = self
            .media
            .get_source(&source_id)
            .await
            .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?
            .ok_or_else(|| envelope("mining_failed", Severity::High, format!("unknown source {source_id}")))?;

        let segments = self
            .media
            .segments_for_source(&source_id)
            .await
            .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?;
        if segments.is_empty() && source.source_type != SourceType::Document {
            return Err(envelope("mining_failed", Severity::High, "no transcript segments"));
        }

        let segmenter = Segmenter::new(SegmenterConfig::from_settings(&self.settings.mining));
        let windows = segmenter.windows(&segments);

        let content_type = match source.source_type {
            SourceType::Document => ContentType::Document,
            _ => ContentType::TranscriptThirdParty,
        };

        // Resume: skip windows a previous run already mined
        let checkpoint = ctx
            .checkpoint
            .as_ref()
            .and_then(|c| serde_json::from_value::<MiningCheckpoint>(c.clone()).ok());
        let done = checkpoint.as_ref().map(|c| c.windows_done).unwrap_or(0);
        let mut output = match checkpoint {
            Some(c) => c.into_output(&segments),
            None => PipelineOutput { segments: segments.clone(), ..Default::default() },
        };

        let miner =
            UnifiedMiner::new(self.adapter.as_ref(), UnifiedMinerConfig::new(self.provider.clone()));
        let request_ctx = RequestContext::new(Some(ctx.run_id.clone()), ctx.cancel.clone());
        let total_windows = windows.len();

        for window in windows.into_iter().skip(done) {
            if ctx.cancel.is_cancelled() {
                return Err(envelope("cancelled", Severity::Low, "cancelled during mining"));
            }
            ctx.report_stage(
                StageStatus::new(source_id.clone(), Stage::Mining, StageState::InProgress)
                    .with_progress(window.index as f64 * 100.0 / total_windows.max(1) as f64),
            )
            .await;

            let harvest = miner
                .mine_window(&source_id, content_type, &window, &request_ctx)
                .await
                .map_err(|e| envelope(e.code(), Severity::Medium, e.to_string()))?;

            output.claims.extend(harvest.claims);
            output.jargon.extend(harvest.jargon);
            output.people.extend(harvest.people);
            output.mental_models.extend(harvest.mental_models);

            ctx.save_checkpoint(
                serde_json::to_value(MiningCheckpoint::from_output(&output, window.index + 1))
                    .unwrap_or_default(),
            )
            .await;
        }

        let receipt = self
            .claims
            .store_pipeline_output(&source, &output)
            .await
            .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?;

        Ok(json!({"claims": receipt.claims, "entities": receipt.entities}))
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct MiningCheckpoint {
    /// Windows fully mined; the successor run starts here.
    windows_done: usize,
    claims: Vec<quarry_core::Claim>,
    jargon: Vec<quarry_core::JargonTerm>,
    people: Vec<quarry_core::Person>,
    mental_models: Vec<quarry_core::MentalModel>,
}

impl MiningCheckpoint {
    fn from_output(output: &PipelineOutput, windows_done: usize) -> Self {
        Self {
            windows_done,
            claims: output.claims.clone(),
            jargon: output.jargon.clone(),
            people: output.people.clone(),
            mental_models: output.mental_models.clone(),
        }
    }

    fn into_output(self, segments: &[Segment]) -> PipelineOutput {
        PipelineOutput {
            segments: segments.to_vec(),
            claims: self.claims,
            jargon: self.jargon,
            people: self.people,
            mental_models: self.mental_models,
        }
    }
}

/// Evaluate stored claims and entities, then finish the storage stage with
/// Markdown artifacts.
pub struct EvaluateHandler {
    pub adapter: Arc<LlmAdapter>,
    pub media: MediaStore,
    pub claims: ClaimStore,
    pub markdown: MarkdownWriter,
    pub settings: Settings,
    pub provider: ProviderUri,
}

#[async_trait]
impl JobHandler for EvaluateHandler {
    async fn execute(&self, job: &Job, ctx: &RunContext) -> Result<serde_json::Value, ErrorEnvelope> {
        let source_id = source_id_of(job);
        let source = self
            .claims
            .source(&source_id)
            .await
            .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?
            .ok_or_else(|| envelope("evaluation_failed", Severity::High, format!("unknown source {source_id}")))?;

        let mut claims = self
            .claims
            .claims_for_source(&source_id)
            .await
            .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?;
        let mut jargon = self
            .claims
            .jargon_for_source(&source_id)
            .await
            .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?;
        let mut people = self
            .claims
            .people_for_source(&source_id)
            .await
            .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?;
        let mut models = self
            .claims
            .mental_models_for_source(&source_id)
            .await
            .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?;

        let request_ctx = RequestContext::new(Some(ctx.run_id.clone()), ctx.cancel.clone());
        let flagship = FlagshipEvaluator::new(
            self.adapter.as_ref(),
            self.provider.clone(),
            self.settings.mining.evaluation_batch_size,
        );
        let entity_eval = EntityEvaluator::new(self.adapter.as_ref(), self.provider.clone());

        // Flagship and entity evaluators are independent; run them together
        futures::try_join!(
            flagship.evaluate(&mut claims, &request_ctx),
            entity_eval.evaluate_jargon(&mut jargon, &request_ctx),
            entity_eval.evaluate_people(&mut people, &request_ctx),
            entity_eval.evaluate_mental_models(&mut models, &request_ctx),
        )
        .map_err(|e| envelope(e.code(), Severity::Medium, e.to_string()))?;

        if ctx.cancel.is_cancelled() {
            return Err(envelope("cancelled", Severity::Low, "cancelled after evaluation"));
        }

        for claim in &claims {
            self.claims
                .update_claim_evaluation(claim)
                .await
                .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?;
        }
        for (table, scores) in [
            ("jargon_terms", jargon.iter().map(|j| (j.entity_id.clone(), j.quality_score)).collect::<Vec<_>>()),
            ("people", people.iter().map(|p| (p.entity_id.clone(), p.quality_score)).collect()),
            ("mental_models", models.iter().map(|m| (m.entity_id.clone(), m.quality_score)).collect()),
        ] {
            for (entity_id, score) in scores {
                self.claims
                    .update_entity_quality(table, &entity_id, score)
                    .await
                    .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?;
            }
        }

        // Storage stage: markdown artifacts from the evaluated state
        ctx.report_stage(StageStatus::new(
            source_id.clone(),
            Stage::Storage,
            StageState::InProgress,
        ))
        .await;

        let segments = self
            .media
            .segments_for_source(&source_id)
            .await
            .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?;
        self.markdown
            .write_transcript(&source, &segments, &claims)
            .await
            .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?;
        self.markdown
            .write_summary(&source, &claims, &Default::default())
            .await
            .map_err(|e| envelope(e.code(), e.severity(), e.to_string()))?;

        ctx.report_stage(
            StageStatus::new(source_id.clone(), Stage::Storage, StageState::Completed)
                .with_progress(100.0),
        )
        .await;

        Ok(json!({"claims_evaluated": claims.len()}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::is_transient;

    #[test]
    fn failure_kinds_map_to_distinct_codes() {
        assert_eq!(
            acquisition_code(Some(FetchFailureKind::RateLimited)),
            "acquisition_rate_limited"
        );
        assert_eq!(acquisition_code(Some(FetchFailureKind::Timeout)), "acquisition_timeout");
        assert_eq!(acquisition_code(Some(FetchFailureKind::Auth)), "acquisition_auth_failed");
        assert_eq!(
            acquisition_code(Some(FetchFailureKind::Unavailable)),
            "acquisition_unavailable"
        );
        assert_eq!(acquisition_code(None), "acquisition_failed");
    }

    #[test]
    fn only_rate_limits_and_timeouts_reschedule() {
        assert!(is_transient(Some("acquisition_rate_limited")));
        assert!(is_transient(Some("acquisition_timeout")));
        assert!(!is_transient(Some("acquisition_auth_failed")));
        assert!(!is_transient(Some("acquisition_unavailable")));
        assert!(!is_transient(Some("acquisition_failed")));
    }

    #[test]
    fn mining_checkpoint_round_trips() {
        let output = PipelineOutput::default();
        let checkpoint = MiningCheckpoint::from_output(&output, 4);
        let value = serde_json::to_value(&checkpoint).unwrap();
        let back: MiningCheckpoint = serde_json::from_value(value).unwrap();
        assert_eq!(back.windows_done, 4);
        assert!(back.claims.is_empty());
    }
}
