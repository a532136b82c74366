//! Database service
//!
//! Single-writer SQLite with WAL. The pool is capped at one connection so
//! every write is serialized through it; readers share the same pool. The
//! schema is created idempotently at open.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    source_id            TEXT PRIMARY KEY,
    source_type          TEXT NOT NULL,
    url                  TEXT,
    file_path            TEXT,
    title                TEXT,
    duration_seconds     REAL,
    uploader             TEXT,
    upload_date          TEXT,
    description          TEXT,
    tags                 TEXT NOT NULL DEFAULT '[]',
    chapters             TEXT NOT NULL DEFAULT '[]',
    thumbnail_local_path TEXT,
    checksum             TEXT,
    audio_file_path      TEXT,
    created_at           TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS segments (
    source_id  TEXT NOT NULL REFERENCES sources(source_id) ON DELETE CASCADE,
    segment_id INTEGER NOT NULL,
    t0         REAL NOT NULL,
    t1         REAL NOT NULL,
    text       TEXT NOT NULL,
    PRIMARY KEY (source_id, segment_id)
);

CREATE TABLE IF NOT EXISTS source_stage_status (
    source_id        TEXT NOT NULL REFERENCES sources(source_id) ON DELETE CASCADE,
    stage            TEXT NOT NULL,
    status           TEXT NOT NULL,
    progress_percent REAL,
    worker_id        TEXT,
    metadata         TEXT,
    last_updated     TEXT NOT NULL,
    PRIMARY KEY (source_id, stage)
);

CREATE TABLE IF NOT EXISTS claims (
    claim_id               TEXT PRIMARY KEY,
    source_id              TEXT NOT NULL REFERENCES sources(source_id) ON DELETE CASCADE,
    canonical_text         TEXT NOT NULL,
    claim_type             TEXT NOT NULL,
    speaker                TEXT,
    epistemic_value        REAL,
    actionability          REAL,
    novelty                REAL,
    verifiability          REAL,
    temporal_stability     REAL,
    scope                  REAL,
    profile_scores         TEXT,
    best_profile           TEXT,
    importance             REAL,
    tier                   TEXT,
    temporality            TEXT,
    temporality_confidence REAL
);
CREATE INDEX IF NOT EXISTS idx_claims_source ON claims(source_id);

CREATE TABLE IF NOT EXISTS evidence_spans (
    claim_id     TEXT NOT NULL REFERENCES claims(claim_id) ON DELETE CASCADE,
    sequence     INTEGER NOT NULL,
    t0           REAL NOT NULL,
    t1           REAL NOT NULL,
    quote        TEXT NOT NULL,
    context_text TEXT,
    context_type TEXT NOT NULL,
    PRIMARY KEY (claim_id, sequence)
);

CREATE TABLE IF NOT EXISTS jargon_terms (
    entity_id       TEXT PRIMARY KEY,
    source_id       TEXT NOT NULL REFERENCES sources(source_id) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    definition      TEXT,
    domain          TEXT,
    aliases         TEXT NOT NULL DEFAULT '[]',
    introduced_by   TEXT,
    quality_score   REAL,
    UNIQUE (source_id, normalized_name)
);

CREATE TABLE IF NOT EXISTS people (
    entity_id       TEXT PRIMARY KEY,
    source_id       TEXT NOT NULL REFERENCES sources(source_id) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    aliases         TEXT NOT NULL DEFAULT '[]',
    mentioned_by    TEXT,
    quality_score   REAL,
    UNIQUE (source_id, normalized_name)
);

CREATE TABLE IF NOT EXISTS mental_models (
    entity_id       TEXT PRIMARY KEY,
    source_id       TEXT NOT NULL REFERENCES sources(source_id) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    definition      TEXT,
    aliases         TEXT NOT NULL DEFAULT '[]',
    advocated_by    TEXT,
    quality_score   REAL,
    UNIQUE (source_id, normalized_name)
);

CREATE TABLE IF NOT EXISTS jargon_evidence (
    entity_id    TEXT NOT NULL REFERENCES jargon_terms(entity_id) ON DELETE CASCADE,
    claim_id     TEXT,
    sequence     INTEGER NOT NULL,
    t0           REAL NOT NULL,
    t1           REAL NOT NULL,
    quote        TEXT NOT NULL,
    context_text TEXT,
    context_type TEXT NOT NULL,
    PRIMARY KEY (entity_id, sequence)
);

CREATE TABLE IF NOT EXISTS person_evidence (
    entity_id    TEXT NOT NULL REFERENCES people(entity_id) ON DELETE CASCADE,
    claim_id     TEXT,
    sequence     INTEGER NOT NULL,
    t0           REAL NOT NULL,
    t1           REAL NOT NULL,
    quote        TEXT NOT NULL,
    context_text TEXT,
    context_type TEXT NOT NULL,
    PRIMARY KEY (entity_id, sequence)
);

CREATE TABLE IF NOT EXISTS concept_evidence (
    entity_id    TEXT NOT NULL REFERENCES mental_models(entity_id) ON DELETE CASCADE,
    claim_id     TEXT,
    sequence     INTEGER NOT NULL,
    t0           REAL NOT NULL,
    t1           REAL NOT NULL,
    quote        TEXT NOT NULL,
    context_text TEXT,
    context_type TEXT NOT NULL,
    PRIMARY KEY (entity_id, sequence)
);

CREATE TABLE IF NOT EXISTS jobs (
    job_id       TEXT PRIMARY KEY,
    job_type     TEXT NOT NULL,
    input_id     TEXT NOT NULL,
    config       TEXT NOT NULL DEFAULT 'null',
    auto_process INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS job_runs (
    run_id        TEXT PRIMARY KEY,
    job_id        TEXT NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
    status        TEXT NOT NULL,
    started_at    TEXT,
    ended_at      TEXT,
    checkpoint    TEXT,
    error_code    TEXT,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_job_runs_job ON job_runs(job_id);

CREATE TABLE IF NOT EXISTS llm_requests (
    request_id  TEXT PRIMARY KEY,
    run_id      TEXT,
    provider    TEXT NOT NULL,
    model       TEXT NOT NULL,
    prompt_hash TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS llm_responses (
    request_id    TEXT PRIMARY KEY REFERENCES llm_requests(request_id) ON DELETE CASCADE,
    response_text TEXT,
    tokens_in     INTEGER NOT NULL DEFAULT 0,
    tokens_out    INTEGER NOT NULL DEFAULT 0,
    duration_ms   INTEGER NOT NULL DEFAULT 0,
    error_code    TEXT
);

CREATE TABLE IF NOT EXISTS generated_files (
    source_id  TEXT NOT NULL REFERENCES sources(source_id) ON DELETE CASCADE,
    file_type  TEXT NOT NULL,
    path       TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (source_id, file_type)
);

-- Relations surface kept in the data model; nothing populates it.
CREATE TABLE IF NOT EXISTS claim_relations (
    relation_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    claim_id_a    TEXT NOT NULL REFERENCES claims(claim_id) ON DELETE CASCADE,
    claim_id_b    TEXT NOT NULL REFERENCES claims(claim_id) ON DELETE CASCADE,
    relation_type TEXT NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS claims_fts USING fts5(
    claim_id UNINDEXED,
    canonical_text
);
"#;

/// Shared handle to the single database. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `path` and apply the
    /// schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        Self::open_with(options).await
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?
            .foreign_keys(true);
        Self::open_with(options).await
    }

    async fn open_with(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        // One connection: the database is single-writer by contract, and a
        // shared pool would hand out separate databases for ":memory:".
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        info!("database ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_applies_idempotently() {
        let db = Database::open_in_memory().await.unwrap();
        // Re-applying must not fail
        sqlx::raw_sql(SCHEMA).execute(db.pool()).await.unwrap();
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let db = Database::open_in_memory().await.unwrap();
        let result = sqlx::query(
            "INSERT INTO segments (source_id, segment_id, t0, t1, text) VALUES ('ghost', 0, 0, 1, 'x')",
        )
        .execute(db.pool())
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn file_database_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("quarry.db")).await.unwrap();
        sqlx::query("INSERT INTO sources (source_id, source_type, created_at) VALUES ('a', 'url', '2026-01-01T00:00:00Z')")
            .execute(db.pool())
            .await
            .unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sources")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 1);
    }
}
