//! The orchestrator
//!
//! Owns the run state machine: `queued → running → succeeded | failed |
//! cancelled`. Stage handlers are registered per job type; the orchestrator
//! supplies each run with a cancellation token, its resume checkpoint, and
//! handles for stage reporting and checkpoint persistence. Stop requests
//! only mark the token and return; workers observe it at their next
//! suspension point.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quarry_core::{
    ErrorEnvelope, Job, JobRun, JobType, RunStatus, Severity, SourceId, StageState, StageStatus,
};
use quarry_llm::MemoryMonitor;
use quarry_store::{Database, MediaStore};

use crate::events::{QueueEventBus, QueueSnapshot, SnapshotFilter};
use crate::jobs::{JobStore, JobSummary};
use crate::OrchestratorError;

/// Work a stage handler performs for one run.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: &Job, ctx: &RunContext) -> Result<serde_json::Value, ErrorEnvelope>;
}

/// Everything a handler needs from the orchestrator during one run.
pub struct RunContext {
    pub run_id: String,
    pub cancel: CancellationToken,
    /// Resume point from a previous failed run of the same job.
    pub checkpoint: Option<serde_json::Value>,
    media: MediaStore,
    events: Arc<QueueEventBus>,
    jobs: JobStore,
}

impl RunContext {
    /// Write a stage status and emit the matching queue event. Reporting is
    /// best-effort: a failed write never fails the run.
    pub async fn report_stage(&self, status: StageStatus) {
        if let Err(e) = self.media.upsert_stage_status(&status).await {
            warn!(error = %e, "stage status write failed");
            return;
        }
        self.events.emit(&status);
    }

    /// Persist a resume point. Called at checkpoint granularity, e.g. after
    /// each mined window.
    pub async fn save_checkpoint(&self, checkpoint: serde_json::Value) {
        if let Err(e) = self.jobs.save_checkpoint(&self.run_id, &checkpoint).await {
            warn!(error = %e, "checkpoint write failed");
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Auto-reschedule cap for transient failures.
    pub transient_retry_cap: u32,
    /// New runs wait while memory usage is at or above this fraction.
    pub memory_high_threshold: f64,
    pub memory_poll: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            transient_retry_cap: 2,
            memory_high_threshold: 0.85,
            memory_poll: Duration::from_millis(200),
        }
    }
}

pub struct Orchestrator {
    jobs: JobStore,
    media: MediaStore,
    events: Arc<QueueEventBus>,
    handlers: DashMap<JobType, Arc<dyn JobHandler>>,
    active: DashMap<String, CancellationToken>,
    monitor: Arc<dyn MemoryMonitor>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(db: Database, monitor: Arc<dyn MemoryMonitor>, config: OrchestratorConfig) -> Self {
        Self {
            jobs: JobStore::new(db.clone()),
            media: MediaStore::new(db),
            events: Arc::new(QueueEventBus::new()),
            handlers: DashMap::new(),
            active: DashMap::new(),
            monitor,
            config,
        }
    }

    pub fn register_handler(&self, job_type: JobType, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type, handler);
    }

    pub fn event_bus(&self) -> Arc<QueueEventBus> {
        self.events.clone()
    }

    pub fn subscribe_stage_events(&self) -> tokio::sync::broadcast::Receiver<quarry_core::StageEvent> {
        self.events.subscribe()
    }

    /// Plan a unit of work.
    pub async fn create_job(
        &self,
        job_type: JobType,
        input_id: impl Into<String>,
        config: serde_json::Value,
        auto_process: bool,
    ) -> Result<String, OrchestratorError> {
        let mut job = Job::new(job_type, input_id);
        job.config = config;
        job.auto_process = auto_process;
        self.jobs.insert_job(&job).await?;
        Ok(job.job_id)
    }

    /// Drive a job to a terminal state, then chain follow-on stages while
    /// `auto_process` holds. Returns the requested job's final run.
    pub async fn process_job(&self, job_id: &str) -> Result<JobRun, OrchestratorError> {
        let job = self
            .jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownJob(job_id.to_string()))?;

        let final_run = self.run_with_retries(&job, None).await?;

        if final_run.status == RunStatus::Succeeded && job.auto_process {
            let mut current = job;
            while let Some(next_type) = current.job_type.next_in_chain() {
                let mut next = Job::new(next_type, current.input_id.clone());
                next.config = current.config.clone();
                next.auto_process = true;
                self.jobs.insert_job(&next).await?;
                info!(job = %next.job_id, job_type = next_type.as_str(), "chained next stage");

                let run = self.run_with_retries(&next, None).await?;
                if run.status != RunStatus::Succeeded {
                    // Downstream stages are not enqueued after a failure
                    break;
                }
                current = next;
            }
        }

        Ok(final_run)
    }

    /// Non-blocking cooperative cancel. Marks the run's token and returns;
    /// the worker winds down at its next suspension point.
    pub fn cancel(&self, run_id: &str) {
        if let Some(token) = self.active.get(run_id) {
            token.cancel();
            info!(run_id, "cancellation requested");
        }
    }

    pub async fn list_jobs(&self, limit: i64) -> Result<Vec<JobSummary>, OrchestratorError> {
        self.jobs.list_jobs(limit).await
    }

    /// Restart every job whose latest run failed, carrying its checkpoint
    /// into the successor run. Returns the number of jobs resumed.
    pub async fn resume_failed_jobs(
        &self,
        job_type: Option<JobType>,
    ) -> Result<usize, OrchestratorError> {
        let failed = self.jobs.failed_runs(job_type).await?;
        let mut resumed = 0;
        for (job, run) in failed {
            info!(job = %job.job_id, from_run = %run.run_id, "resuming failed job");
            self.run_with_retries(&job, run.checkpoint).await?;
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Queue view snapshot, cached briefly.
    pub async fn get_stage_snapshot(
        &self,
        filter: SnapshotFilter,
    ) -> Result<QueueSnapshot, OrchestratorError> {
        self.events.snapshot(&self.media, filter).await
    }

    async fn run_with_retries(
        &self,
        job: &Job,
        checkpoint: Option<serde_json::Value>,
    ) -> Result<JobRun, OrchestratorError> {
        let mut checkpoint = checkpoint;
        let mut attempt = 0;
        loop {
            let run = self.run_once(job, checkpoint.clone()).await?;
            match run.status {
                RunStatus::Failed
                    if attempt < self.config.transient_retry_cap
                        && is_transient(run.error_code.as_deref()) =>
                {
                    attempt += 1;
                    warn!(
                        job = %job.job_id,
                        attempt,
                        error = run.error_code.as_deref().unwrap_or("unknown"),
                        "transient failure, rescheduling run"
                    );
                    checkpoint = run.checkpoint.clone().or(checkpoint);
                }
                _ => return Ok(run),
            }
        }
    }

    async fn run_once(
        &self,
        job: &Job,
        checkpoint: Option<serde_json::Value>,
    ) -> Result<JobRun, OrchestratorError> {
        let handler = self
            .handlers
            .get(&job.job_type)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| OrchestratorError::NoHandler(job.job_type.as_str().to_string()))?;

        let mut run = JobRun::queued(&job.job_id);
        run.checkpoint = checkpoint.clone();
        self.jobs.insert_run(&run).await?;

        let cancel = CancellationToken::new();
        self.active.insert(run.run_id.clone(), cancel.clone());

        // Memory pre-admission: do not start new work under pressure
        let admitted = self.wait_for_memory(&cancel).await;

        let result = if admitted {
            run.status = RunStatus::Running;
            run.started_at = Some(Utc::now());
            self.jobs.update_run(&run).await?;

            let ctx = RunContext {
                run_id: run.run_id.clone(),
                cancel: cancel.clone(),
                checkpoint,
                media: self.media.clone(),
                events: self.events.clone(),
                jobs: self.jobs.clone(),
            };
            handler.execute(job, &ctx).await
        } else {
            Err(ErrorEnvelope::new("cancelled", Severity::Low, "cancelled before start"))
        };

        // Reload so checkpoints saved by the handler survive the final write
        if let Some(persisted) = self.jobs.get_run(&run.run_id).await? {
            run.checkpoint = persisted.checkpoint;
        }

        match result {
            Ok(output) => {
                run.status = RunStatus::Succeeded;
                run.ended_at = Some(Utc::now());
                if !output.is_null() {
                    run.checkpoint = Some(output);
                }
                self.finish_stage(job, StageState::Completed, None).await;
            }
            Err(envelope) if cancel.is_cancelled() || envelope.code == "cancelled" => {
                run.status = RunStatus::Cancelled;
                run.ended_at = Some(Utc::now());
                run.error_code = Some("cancelled".to_string());
                self.finish_stage(job, StageState::Failed, Some(&envelope)).await;
            }
            Err(envelope) => {
                run.record_failure(&envelope);
                self.finish_stage(job, StageState::Failed, Some(&envelope)).await;
            }
        }

        self.jobs.update_run(&run).await?;
        self.active.remove(&run.run_id);
        info!(job = %job.job_id, run = %run.run_id, status = run.status.as_str(), "run finished");
        Ok(run)
    }

    /// Terminal stage-status write for the job's own stage.
    async fn finish_stage(&self, job: &Job, state: StageState, envelope: Option<&ErrorEnvelope>) {
        let Some(stage) = job.job_type.stage() else { return };
        let source_id = source_id_for(job);
        let mut status = StageStatus::new(source_id, stage, state);
        if state == StageState::Completed {
            status = status.with_progress(100.0);
        }
        if let Some(envelope) = envelope {
            status = status.with_metadata(serde_json::json!({
                "error_code": envelope.code,
                "severity": envelope.severity,
                "message": envelope.message,
            }));
        }
        if let Err(e) = self.media.upsert_stage_status(&status).await {
            // The source row may not exist yet (e.g. a download job that
            // failed before creating it); the run result is still the truth
            warn!(error = %e, "terminal stage status write failed");
            return;
        }
        self.events.emit(&status);
    }

    async fn wait_for_memory(&self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if self.monitor.usage_fraction() < self.config.memory_high_threshold {
                return true;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.memory_poll) => {}
                _ = cancel.cancelled() => return false,
            }
        }
    }
}

fn source_id_for(job: &Job) -> SourceId {
    SourceId::from_url(&job.input_id).unwrap_or_else(|| SourceId::new(&job.input_id))
}

pub(crate) fn is_transient(error_code: Option<&str>) -> bool {
    matches!(
        error_code,
        Some("llm_rate_limit") | Some("llm_api_error") | Some("llm_timeout")
            | Some("database_lock") | Some("acquisition_rate_limited")
            | Some("acquisition_timeout") | Some("timeout")
    )
}
