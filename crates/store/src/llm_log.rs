//! Persistent LLM I/O log
//!
//! Implements the adapter's logging seam against the shared database, one
//! row per request and one per response, correlated by request id and the
//! originating job run.

use async_trait::async_trait;

use quarry_core::{LlmIoLog, LlmRequestRecord, LlmResponseRecord};

use crate::db::Database;

#[derive(Clone)]
pub struct SqliteLlmIoLog {
    db: Database,
}

impl SqliteLlmIoLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LlmIoLog for SqliteLlmIoLog {
    async fn record_request(&self, record: &LlmRequestRecord) -> quarry_core::Result<()> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO llm_requests (request_id, run_id, provider, model, prompt_hash, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.request_id)
        .bind(&record.run_id)
        .bind(&record.provider)
        .bind(&record.model)
        .bind(&record.prompt_hash)
        .bind(record.created_at.to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(|e| quarry_core::Error::Storage(e.to_string()))?;
        Ok(())
    }

    async fn record_response(&self, record: &LlmResponseRecord) -> quarry_core::Result<()> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO llm_responses (request_id, response_text, tokens_in, tokens_out, duration_ms, error_code)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.request_id)
        .bind(&record.response_text)
        .bind(record.tokens_in as i64)
        .bind(record.tokens_out as i64)
        .bind(record.duration_ms as i64)
        .bind(&record.error_code)
        .execute(self.db.pool())
        .await
        .map_err(|e| quarry_core::Error::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn request_and_response_rows_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let log = SqliteLlmIoLog::new(db.clone());

        let request = LlmRequestRecord {
            request_id: "req-1".into(),
            run_id: Some("run-1".into()),
            provider: "local".into(),
            model: "qwen2.5:14b-instruct".into(),
            prompt_hash: "abcd".into(),
            created_at: Utc::now(),
        };
        log.record_request(&request).await.unwrap();

        let response = LlmResponseRecord {
            request_id: "req-1".into(),
            response_text: Some("{}".into()),
            tokens_in: 120,
            tokens_out: 64,
            duration_ms: 900,
            error_code: None,
        };
        log.record_response(&response).await.unwrap();

        let row: (String, i64) = sqlx::query_as(
            "SELECT r.run_id, p.tokens_out FROM llm_requests r JOIN llm_responses p USING (request_id)",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(row.0, "run-1");
        assert_eq!(row.1, 64);
    }

    #[tokio::test]
    async fn failed_call_records_error_code() {
        let db = Database::open_in_memory().await.unwrap();
        let log = SqliteLlmIoLog::new(db.clone());

        log.record_request(&LlmRequestRecord {
            request_id: "req-2".into(),
            run_id: None,
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            prompt_hash: "ef01".into(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        log.record_response(&LlmResponseRecord {
            request_id: "req-2".into(),
            response_text: None,
            tokens_in: 0,
            tokens_out: 0,
            duration_ms: 0,
            error_code: Some("llm_rate_limit".into()),
        })
        .await
        .unwrap();

        let row: (Option<String>,) =
            sqlx::query_as("SELECT error_code FROM llm_responses WHERE request_id = 'req-2'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(row.0.as_deref(), Some("llm_rate_limit"));
    }
}
