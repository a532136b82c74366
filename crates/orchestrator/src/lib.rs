//! Job orchestration
//!
//! The orchestrator drives every stage transition in the pipeline:
//! - Persistent job/run state machine with opaque checkpoints
//! - Auto-chaining download → transcribe → mine → evaluate → store
//! - Cooperative cancellation (stop requests return immediately; workers
//!   wind down at their next suspension point)
//! - Memory pre-admission before starting new runs
//! - Queue event bus fed by every stage-status write; the table stays the
//!   truth, events are informational

pub mod events;
pub mod jobs;
pub mod orchestrator;
pub mod pipeline;

pub use events::{QueueEventBus, QueueSnapshot, SnapshotFilter};
pub use jobs::{JobStore, JobSummary};
pub use orchestrator::{JobHandler, Orchestrator, OrchestratorConfig, RunContext};
pub use pipeline::{DownloadHandler, EvaluateHandler, MineHandler, TranscribeHandler};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("store error: {0}")]
    Store(#[from] quarry_store::StoreError),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("unknown run: {0}")]
    UnknownRun(String),

    #[error("no handler registered for job type {0}")]
    NoHandler(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<OrchestratorError> for quarry_core::Error {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Cancelled => quarry_core::Error::Cancelled,
            other => quarry_core::Error::Job(other.to_string()),
        }
    }
}
