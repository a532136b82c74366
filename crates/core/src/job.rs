//! Jobs and job runs
//!
//! A job is a planned unit of work; a run is one execution attempt. Runs
//! carry an opaque checkpoint so a failed run can be resumed mid-source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ErrorEnvelope, Stage};

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Download,
    Transcribe,
    Mine,
    Evaluate,
    Upload,
    /// Full chain: download through storage.
    Pipeline,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Download => "download",
            JobType::Transcribe => "transcribe",
            JobType::Mine => "mine",
            JobType::Evaluate => "evaluate",
            JobType::Upload => "upload",
            JobType::Pipeline => "pipeline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "download" => Some(JobType::Download),
            "transcribe" => Some(JobType::Transcribe),
            "mine" => Some(JobType::Mine),
            "evaluate" => Some(JobType::Evaluate),
            "upload" => Some(JobType::Upload),
            "pipeline" => Some(JobType::Pipeline),
            _ => None,
        }
    }

    /// The stage this job type advances, when it maps onto exactly one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            JobType::Download => Some(Stage::Download),
            JobType::Transcribe => Some(Stage::Transcription),
            JobType::Mine => Some(Stage::Mining),
            JobType::Evaluate => Some(Stage::Evaluation),
            JobType::Upload | JobType::Pipeline => None,
        }
    }

    /// The job type that runs after this one when chaining is enabled.
    pub fn next_in_chain(&self) -> Option<JobType> {
        match self {
            JobType::Download => Some(JobType::Transcribe),
            JobType::Transcribe => Some(JobType::Mine),
            JobType::Mine => Some(JobType::Evaluate),
            JobType::Evaluate | JobType::Upload | JobType::Pipeline => None,
        }
    }
}

/// A planned unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub job_type: JobType,
    /// Source id, URL, or file path the job operates on.
    pub input_id: String,
    /// Opaque per-job configuration.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Chain to the next stage on success.
    pub auto_process: bool,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_type: JobType, input_id: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            job_type,
            input_id: input_id.into(),
            config: serde_json::Value::Null,
            auto_process: false,
            created_at: Utc::now(),
        }
    }
}

/// Status of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled)
    }
}

/// One execution attempt of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub run_id: String,
    pub job_id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Opaque serialized resume point, written at checkpoint granularity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobRun {
    pub fn queued(job_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            status: RunStatus::Queued,
            started_at: None,
            ended_at: None,
            checkpoint: None,
            error_code: None,
            error_message: None,
        }
    }

    pub fn record_failure(&mut self, envelope: &ErrorEnvelope) {
        self.status = RunStatus::Failed;
        self.ended_at = Some(Utc::now());
        self.error_code = Some(envelope.code.clone());
        self.error_message = Some(envelope.message.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_follows_stage_order() {
        assert_eq!(JobType::Download.next_in_chain(), Some(JobType::Transcribe));
        assert_eq!(JobType::Evaluate.next_in_chain(), None);
    }

    #[test]
    fn run_failure_records_envelope() {
        let mut run = JobRun::queued("job-1");
        let env = ErrorEnvelope::new("llm_rate_limit", crate::Severity::Medium, "throttled");
        run.record_failure(&env);
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_code.as_deref(), Some("llm_rate_limit"));
    }
}
