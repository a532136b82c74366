//! Persistence layer
//!
//! One SQLite database with WAL holds every table in the system. The
//! database service is constructed once at startup and injected; processors
//! never open their own connections. Writes for one source happen inside a
//! single transaction, and the claim store re-reads its writes after commit
//! so partial writes can never masquerade as success.

pub mod db;
pub mod media;
pub mod claims;
pub mod export;
pub mod markdown;
pub mod llm_log;

pub use db::Database;
pub use media::{MediaStore, SourceUpdate};
pub use claims::{ClaimStore, PipelineOutput, StoreReceipt};
pub use export::build_export_envelope;
pub use markdown::{MarkdownWriter, SummaryContent};
pub use llm_log::SqliteLlmIoLog;

use thiserror::Error;

/// Storage-layer errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("post-commit verification failed: expected {expected} claims, found {found}")]
    VerificationFailed { expected: i64, found: i64 },

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Only an actual lock timeout gets the retryable `database_lock` code;
    /// constraint violations must fail fast, not mask a bug behind retries.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::VerificationFailed { .. } => "storage_verification_failed",
            StoreError::Database(sqlx::Error::Database(e)) if e.message().contains("locked") => {
                "database_lock"
            }
            StoreError::Database(sqlx::Error::Database(e))
                if e.message().contains("constraint") =>
            {
                "database_constraint_violation"
            }
            StoreError::Database(sqlx::Error::Database(_)) => "database_error",
            StoreError::Database(_) => "database_connection_error",
            StoreError::UnknownSource(_) => "storage_unknown_source",
            StoreError::Serialization(_) => "storage_serialization_failed",
            StoreError::Io(_) => "storage_io_failed",
        }
    }

    pub fn severity(&self) -> quarry_core::Severity {
        match self {
            StoreError::Database(sqlx::Error::Database(e))
                if e.message().contains("locked") =>
            {
                quarry_core::Severity::Medium
            }
            _ => quarry_core::Severity::High,
        }
    }
}

impl From<StoreError> for quarry_core::Error {
    fn from(err: StoreError) -> Self {
        quarry_core::Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_failure_is_a_hard_error() {
        let err = StoreError::VerificationFailed { expected: 5, found: 3 };
        assert_eq!(err.code(), "storage_verification_failed");
        assert_eq!(err.severity(), quarry_core::Severity::High);
        assert!(err.to_string().contains("expected 5"));
    }

    #[tokio::test]
    async fn constraint_violations_are_not_coded_as_locks() {
        let db = Database::open_in_memory().await.unwrap();
        // Segment referencing a missing source trips the FK constraint
        let err: StoreError = sqlx::query(
            "INSERT INTO segments (source_id, segment_id, t0, t1, text) VALUES ('ghost', 0, 0, 1, 'x')",
        )
        .execute(db.pool())
        .await
        .unwrap_err()
        .into();

        assert_eq!(err.code(), "database_constraint_violation");
        assert_eq!(err.severity(), quarry_core::Severity::High);
    }
}
