//! Error types shared across the pipeline
//!
//! Each crate defines its own error enum and converts into [`Error`] at the
//! boundary. Job runs record failures as an [`ErrorEnvelope`] so that the
//! queue view and resume logic can act on a stable code rather than a
//! formatted message.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Convenience result alias used by core traits.
pub type Result<T> = std::result::Result<T, Error>;

/// Error severity, carried in envelopes and surfaced in queue metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// Structured failure record attached to a job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Stable machine-readable code, e.g. `acquisition_auth_failed`.
    pub code: String,
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Free-form context (source id, stage, attempt counts).
    #[serde(default)]
    pub context: serde_json::Value,
}

impl ErrorEnvelope {
    pub fn new(code: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            severity,
            message: message.into(),
            context: serde_json::Value::Null,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// Cross-crate error type used by the core trait seams.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("acquisition error: {0}")]
    Acquisition(String),

    #[error("audio error: {0}")]
    Audio(String),

    #[error("transcription error: {0}")]
    Transcription(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("job error: {0}")]
    Job(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("io error: {0}")]
    Io(String),
}

impl Error {
    /// Default severity when a finer-grained code is not available.
    pub fn severity(&self) -> Severity {
        match self {
            Error::Cancelled => Severity::Low,
            Error::Storage(_) | Error::Config(_) => Severity::High,
            _ => Severity::Medium,
        }
    }

    /// Default stable code for the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Acquisition(_) => "acquisition_failed",
            Error::Audio(_) => "audio_failed",
            Error::Transcription(_) => "transcription_failed",
            Error::Llm(_) => "llm_failed",
            Error::Storage(_) => "storage_failed",
            Error::Config(_) => "config_invalid",
            Error::Job(_) => "job_failed",
            Error::Cancelled => "cancelled",
            Error::Timeout(_) => "timeout",
            Error::Io(_) => "io_failed",
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::new(self.code(), self.severity(), self.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_code_and_severity() {
        let err = Error::Storage("count mismatch".into());
        let env = err.envelope();
        assert_eq!(env.code, "storage_failed");
        assert_eq!(env.severity, Severity::High);
        assert!(env.message.contains("count mismatch"));
    }

    #[test]
    fn cancelled_is_low_severity() {
        assert_eq!(Error::Cancelled.severity(), Severity::Low);
    }
}
