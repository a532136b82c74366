//! Per-source stage tracking
//!
//! One status row per `(source, stage)`. The table is the truth; queue
//! events derived from it are informational only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SourceId;

/// Pipeline stage, the unit of queue tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Transcription,
    Mining,
    Evaluation,
    Storage,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Download,
        Stage::Transcription,
        Stage::Mining,
        Stage::Evaluation,
        Stage::Storage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Transcription => "transcription",
            Stage::Mining => "mining",
            Stage::Evaluation => "evaluation",
            Stage::Storage => "storage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "download" => Some(Stage::Download),
            "transcription" => Some(Stage::Transcription),
            "mining" => Some(Stage::Mining),
            "evaluation" => Some(Stage::Evaluation),
            "storage" => Some(Stage::Storage),
            _ => None,
        }
    }

    /// The stage that follows this one in the processing chain.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Download => Some(Stage::Transcription),
            Stage::Transcription => Some(Stage::Mining),
            Stage::Mining => Some(Stage::Evaluation),
            Stage::Evaluation => Some(Stage::Storage),
            Stage::Storage => None,
        }
    }
}

/// Status of one stage for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Queued,
    Scheduled,
    InProgress,
    Blocked,
    Completed,
    Failed,
    Skipped,
    NotApplicable,
}

impl StageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Pending => "pending",
            StageState::Queued => "queued",
            StageState::Scheduled => "scheduled",
            StageState::InProgress => "in_progress",
            StageState::Blocked => "blocked",
            StageState::Completed => "completed",
            StageState::Failed => "failed",
            StageState::Skipped => "skipped",
            StageState::NotApplicable => "not_applicable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StageState::Pending),
            "queued" => Some(StageState::Queued),
            "scheduled" => Some(StageState::Scheduled),
            "in_progress" => Some(StageState::InProgress),
            "blocked" => Some(StageState::Blocked),
            "completed" => Some(StageState::Completed),
            "failed" => Some(StageState::Failed),
            "skipped" => Some(StageState::Skipped),
            "not_applicable" => Some(StageState::NotApplicable),
            _ => None,
        }
    }

    /// Terminal states end a stage for the current run. `Failed` may go back
    /// to `Queued` on retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageState::Completed | StageState::Failed | StageState::Skipped | StageState::NotApplicable
        )
    }
}

/// One `(source, stage)` status row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStatus {
    pub source_id: SourceId,
    pub stage: Stage,
    pub state: StageState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub last_updated: DateTime<Utc>,
}

impl StageStatus {
    pub fn new(source_id: SourceId, stage: Stage, state: StageState) -> Self {
        Self {
            source_id,
            stage,
            state,
            progress_percent: None,
            worker_id: None,
            metadata: None,
            last_updated: Utc::now(),
        }
    }

    pub fn with_progress(mut self, percent: f64) -> Self {
        self.progress_percent = Some(percent.clamp(0.0, 100.0));
        self
    }

    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Event emitted after every stage-status write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    pub source_id: SourceId,
    pub stage: Stage,
    pub state: StageState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub emitted_at: DateTime<Utc>,
}

impl From<&StageStatus> for StageEvent {
    fn from(status: &StageStatus) -> Self {
        Self {
            source_id: status.source_id.clone(),
            stage: status.stage,
            state: status.state,
            progress_percent: status.progress_percent,
            worker_id: status.worker_id.clone(),
            metadata: status.metadata.clone(),
            emitted_at: status.last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_order() {
        assert_eq!(Stage::Download.next(), Some(Stage::Transcription));
        assert_eq!(Stage::Storage.next(), None);
    }

    #[test]
    fn terminal_states() {
        assert!(StageState::Completed.is_terminal());
        assert!(StageState::Skipped.is_terminal());
        assert!(!StageState::InProgress.is_terminal());
        assert!(!StageState::Queued.is_terminal());
    }

    #[test]
    fn stage_round_trips_through_strings() {
        for stage in Stage::ALL {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
    }
}
