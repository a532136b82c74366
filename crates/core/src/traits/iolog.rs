//! LLM I/O logging seam
//!
//! The adapter writes a request record before dispatch and a response record
//! after. The storage crate provides the persistent implementation; tests
//! and standalone use get the no-op.

use async_trait::async_trait;

use crate::{LlmRequestRecord, LlmResponseRecord, Result};

/// Sink for LLM request/response records.
#[async_trait]
pub trait LlmIoLog: Send + Sync {
    async fn record_request(&self, record: &LlmRequestRecord) -> Result<()>;
    async fn record_response(&self, record: &LlmResponseRecord) -> Result<()>;
}

/// Discards all records.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLlmIoLog;

#[async_trait]
impl LlmIoLog for NoopLlmIoLog {
    async fn record_request(&self, _record: &LlmRequestRecord) -> Result<()> {
        Ok(())
    }

    async fn record_response(&self, _record: &LlmResponseRecord) -> Result<()> {
        Ok(())
    }
}
