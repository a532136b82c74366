//! Centralized LLM adapter
//!
//! Every model call in the pipeline goes through [`LlmAdapter`]:
//! - Provider abstraction over a local inference server and hosted chat APIs
//! - Concurrency semaphores sized by hardware tier (separate local/hosted)
//! - Memory-pressure admission control with throttle bands
//! - Retry with exponential backoff and jitter on transient failures
//! - Cooperative cancellation
//! - Request/response records written through the `LlmIoLog` seam

pub mod backend;
pub mod hardware;
pub mod memory;
pub mod adapter;

pub use backend::{
    HostedBackend, HostedConfig, LlmBackend, LocalBackend, LocalConfig, ProviderFamily,
    ProviderUri,
};
pub use hardware::{HardwareProfile, HardwareTier, SemaphoreLimits};
pub use memory::{
    AdmissionController, AdmissionGuard, MemoryMonitor, StubMemoryMonitor, SysinfoMemoryMonitor,
    ThrottleBand,
};
pub use adapter::{LlmAdapter, RequestContext};

use thiserror::Error;

/// Adapter error taxonomy. Severity is part of the contract: it decides
/// whether the orchestrator retries a run.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("context length exceeded: {0}")]
    ContextLength(String),

    #[error("schema-incompatible request: {0}")]
    SchemaInvalid(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("memory limit exceeded")]
    MemoryExceeded,

    #[error("cancelled")]
    Cancelled,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Stable code recorded in response rows and run envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            LlmError::RateLimited(_) => "llm_rate_limit",
            LlmError::Api(_) => "llm_api_error",
            LlmError::Network(_) => "llm_api_error",
            LlmError::Timeout => "llm_timeout",
            LlmError::ContextLength(_) => "llm_context_length",
            LlmError::SchemaInvalid(_) => "llm_schema_invalid",
            LlmError::Auth(_) => "llm_auth_failed",
            LlmError::MemoryExceeded => "llm_memory_exceeded",
            LlmError::Cancelled => "llm_cancelled",
            LlmError::InvalidResponse(_) => "llm_invalid_response",
            LlmError::Configuration(_) => "llm_config_invalid",
        }
    }

    pub fn severity(&self) -> quarry_core::Severity {
        use quarry_core::Severity;
        match self {
            LlmError::Cancelled => Severity::Low,
            LlmError::ContextLength(_) | LlmError::MemoryExceeded => Severity::High,
            _ => Severity::Medium,
        }
    }

    /// Transient failures the adapter may retry. Auth, schema, and
    /// context-length failures never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_) | LlmError::Network(_) | LlmError::Timeout
        )
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for quarry_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Cancelled => quarry_core::Error::Cancelled,
            other => quarry_core::Error::Llm(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_matches_taxonomy() {
        assert!(LlmError::RateLimited("429".into()).is_retryable());
        assert!(LlmError::Timeout.is_retryable());
        assert!(!LlmError::Auth("401".into()).is_retryable());
        assert!(!LlmError::ContextLength("too long".into()).is_retryable());
        assert!(!LlmError::SchemaInvalid("bad".into()).is_retryable());
    }

    #[test]
    fn codes_and_severities() {
        assert_eq!(LlmError::RateLimited("x".into()).code(), "llm_rate_limit");
        assert_eq!(
            LlmError::ContextLength("x".into()).severity(),
            quarry_core::Severity::High
        );
        assert_eq!(LlmError::Cancelled.severity(), quarry_core::Severity::Low);
    }
}
