//! Job and run persistence
//!
//! Thin typed layer over the `jobs` and `job_runs` tables. The orchestrator
//! is the only writer; the queue view reads summaries through
//! [`JobStore::list_jobs`].

use chrono::{DateTime, Utc};
use sqlx::Row;

use quarry_core::{Job, JobRun, JobType, RunStatus};
use quarry_store::Database;

use crate::OrchestratorError;

/// A job joined with its most recent run.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub job: Job,
    pub latest_run: Option<JobRun>,
}

#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn insert_job(&self, job: &Job) -> Result<(), OrchestratorError> {
        sqlx::query(
            "INSERT INTO jobs (job_id, job_type, input_id, config, auto_process, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.job_id)
        .bind(job.job_type.as_str())
        .bind(&job.input_id)
        .bind(serde_json::to_string(&job.config).map_err(quarry_store::StoreError::from)?)
        .bind(job.auto_process as i64)
        .bind(job.created_at.to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(quarry_store::StoreError::from)?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, OrchestratorError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(quarry_store::StoreError::from)?;
        row.as_ref().map(row_to_job).transpose()
    }

    pub async fn insert_run(&self, run: &JobRun) -> Result<(), OrchestratorError> {
        sqlx::query(
            r#"INSERT INTO job_runs (run_id, job_id, status, started_at, ended_at, checkpoint, error_code, error_message)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&run.run_id)
        .bind(&run.job_id)
        .bind(run.status.as_str())
        .bind(run.started_at.map(|t| t.to_rfc3339()))
        .bind(run.ended_at.map(|t| t.to_rfc3339()))
        .bind(
            run.checkpoint
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(quarry_store::StoreError::from)?,
        )
        .bind(&run.error_code)
        .bind(&run.error_message)
        .execute(self.db.pool())
        .await
        .map_err(quarry_store::StoreError::from)?;
        Ok(())
    }

    pub async fn update_run(&self, run: &JobRun) -> Result<(), OrchestratorError> {
        sqlx::query(
            r#"UPDATE job_runs SET status = ?, started_at = ?, ended_at = ?, checkpoint = ?, error_code = ?, error_message = ?
               WHERE run_id = ?"#,
        )
        .bind(run.status.as_str())
        .bind(run.started_at.map(|t| t.to_rfc3339()))
        .bind(run.ended_at.map(|t| t.to_rfc3339()))
        .bind(
            run.checkpoint
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(quarry_store::StoreError::from)?,
        )
        .bind(&run.error_code)
        .bind(&run.error_message)
        .bind(&run.run_id)
        .execute(self.db.pool())
        .await
        .map_err(quarry_store::StoreError::from)?;
        Ok(())
    }

    /// Persist just the checkpoint of a running run.
    pub async fn save_checkpoint(
        &self,
        run_id: &str,
        checkpoint: &serde_json::Value,
    ) -> Result<(), OrchestratorError> {
        sqlx::query("UPDATE job_runs SET checkpoint = ? WHERE run_id = ?")
            .bind(serde_json::to_string(checkpoint).map_err(quarry_store::StoreError::from)?)
            .bind(run_id)
            .execute(self.db.pool())
            .await
            .map_err(quarry_store::StoreError::from)?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<JobRun>, OrchestratorError> {
        let row = sqlx::query("SELECT * FROM job_runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(quarry_store::StoreError::from)?;
        row.as_ref().map(row_to_run).transpose()
    }

    /// Jobs with their latest run, newest jobs first.
    pub async fn list_jobs(&self, limit: i64) -> Result<Vec<JobSummary>, OrchestratorError> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?")
            .bind(limit.max(1))
            .fetch_all(self.db.pool())
            .await
            .map_err(quarry_store::StoreError::from)?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            let job = row_to_job(row)?;
            let run_row = sqlx::query(
                "SELECT * FROM job_runs WHERE job_id = ? ORDER BY COALESCE(started_at, '9999') DESC, run_id DESC LIMIT 1",
            )
            .bind(&job.job_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(quarry_store::StoreError::from)?;
            summaries.push(JobSummary {
                job,
                latest_run: run_row.as_ref().map(row_to_run).transpose()?,
            });
        }
        Ok(summaries)
    }

    /// Latest failed run per job, optionally restricted to one job type.
    pub async fn failed_runs(
        &self,
        job_type: Option<JobType>,
    ) -> Result<Vec<(Job, JobRun)>, OrchestratorError> {
        let mut sql = String::from(
            r#"SELECT j.job_id AS jid FROM jobs j
               WHERE EXISTS (SELECT 1 FROM job_runs r WHERE r.job_id = j.job_id AND r.status = 'failed')"#,
        );
        if job_type.is_some() {
            sql.push_str(" AND j.job_type = ?");
        }
        let mut query = sqlx::query(&sql);
        if let Some(jt) = job_type {
            query = query.bind(jt.as_str());
        }
        let rows = query
            .fetch_all(self.db.pool())
            .await
            .map_err(quarry_store::StoreError::from)?;

        let mut out = Vec::new();
        for row in &rows {
            let job_id: String = row.try_get("jid").map_err(quarry_store::StoreError::from)?;
            let Some(job) = self.get_job(&job_id).await? else { continue };
            let run_row = sqlx::query(
                "SELECT * FROM job_runs WHERE job_id = ? ORDER BY COALESCE(started_at, '9999') DESC, run_id DESC LIMIT 1",
            )
            .bind(&job_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(quarry_store::StoreError::from)?;
            if let Some(run) = run_row.as_ref().map(row_to_run).transpose()? {
                // Only resume jobs whose latest run is still failed
                if run.status == RunStatus::Failed {
                    out.push((job, run));
                }
            }
        }
        Ok(out)
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job, OrchestratorError> {
    let job_type: String = row.try_get("job_type").map_err(quarry_store::StoreError::from)?;
    let config: String = row.try_get("config").map_err(quarry_store::StoreError::from)?;
    let created_at: String = row.try_get("created_at").map_err(quarry_store::StoreError::from)?;
    Ok(Job {
        job_id: row.try_get("job_id").map_err(quarry_store::StoreError::from)?,
        job_type: JobType::parse(&job_type).unwrap_or(JobType::Pipeline),
        input_id: row.try_get("input_id").map_err(quarry_store::StoreError::from)?,
        config: serde_json::from_str(&config).unwrap_or(serde_json::Value::Null),
        auto_process: row
            .try_get::<i64, _>("auto_process")
            .map_err(quarry_store::StoreError::from)?
            != 0,
        created_at: created_at.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> Result<JobRun, OrchestratorError> {
    let status: String = row.try_get("status").map_err(quarry_store::StoreError::from)?;
    let parse_time = |raw: Option<String>| raw.and_then(|t| t.parse::<DateTime<Utc>>().ok());
    let checkpoint: Option<String> =
        row.try_get("checkpoint").map_err(quarry_store::StoreError::from)?;
    Ok(JobRun {
        run_id: row.try_get("run_id").map_err(quarry_store::StoreError::from)?,
        job_id: row.try_get("job_id").map_err(quarry_store::StoreError::from)?,
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
        started_at: parse_time(row.try_get("started_at").map_err(quarry_store::StoreError::from)?),
        ended_at: parse_time(row.try_get("ended_at").map_err(quarry_store::StoreError::from)?),
        checkpoint: checkpoint.and_then(|c| serde_json::from_str(&c).ok()),
        error_code: row.try_get("error_code").map_err(quarry_store::StoreError::from)?,
        error_message: row.try_get("error_message").map_err(quarry_store::StoreError::from)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> JobStore {
        JobStore::new(Database::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn job_and_run_round_trip() {
        let store = store().await;
        let mut job = Job::new(JobType::Mine, "vid1");
        job.auto_process = true;
        store.insert_job(&job).await.unwrap();

        let mut run = JobRun::queued(&job.job_id);
        store.insert_run(&run).await.unwrap();

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        store.update_run(&run).await.unwrap();

        let read = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(read.status, RunStatus::Running);
        assert!(read.started_at.is_some());

        let job_read = store.get_job(&job.job_id).await.unwrap().unwrap();
        assert!(job_read.auto_process);
        assert_eq!(job_read.job_type, JobType::Mine);
    }

    #[tokio::test]
    async fn checkpoint_saves_mid_run() {
        let store = store().await;
        let job = Job::new(JobType::Mine, "vid2");
        store.insert_job(&job).await.unwrap();
        let run = JobRun::queued(&job.job_id);
        store.insert_run(&run).await.unwrap();

        store
            .save_checkpoint(&run.run_id, &serde_json::json!({"windows_done": 3}))
            .await
            .unwrap();
        let read = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(read.checkpoint.unwrap()["windows_done"], 3);
    }

    #[tokio::test]
    async fn failed_runs_filters_by_type_and_latest_status() {
        let store = store().await;

        // Failed mine job
        let mine = Job::new(JobType::Mine, "vid3");
        store.insert_job(&mine).await.unwrap();
        let mut failed = JobRun::queued(&mine.job_id);
        failed.status = RunStatus::Failed;
        failed.started_at = Some(Utc::now());
        store.insert_run(&failed).await.unwrap();

        // Mine job that failed once then succeeded: must not resume
        let recovered = Job::new(JobType::Mine, "vid4");
        store.insert_job(&recovered).await.unwrap();
        let mut old_fail = JobRun::queued(&recovered.job_id);
        old_fail.status = RunStatus::Failed;
        old_fail.started_at = Some(Utc::now() - chrono::Duration::minutes(5));
        store.insert_run(&old_fail).await.unwrap();
        let mut success = JobRun::queued(&recovered.job_id);
        success.status = RunStatus::Succeeded;
        success.started_at = Some(Utc::now());
        store.insert_run(&success).await.unwrap();

        // Failed transcribe job, excluded by type filter
        let transcribe = Job::new(JobType::Transcribe, "vid5");
        store.insert_job(&transcribe).await.unwrap();
        let mut tfail = JobRun::queued(&transcribe.job_id);
        tfail.status = RunStatus::Failed;
        tfail.started_at = Some(Utc::now());
        store.insert_run(&tfail).await.unwrap();

        let failed = store.failed_runs(Some(JobType::Mine)).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0.input_id, "vid3");

        let all = store.failed_runs(None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn list_jobs_returns_latest_run() {
        let store = store().await;
        let job = Job::new(JobType::Download, "vid6");
        store.insert_job(&job).await.unwrap();
        let mut first = JobRun::queued(&job.job_id);
        first.status = RunStatus::Failed;
        first.started_at = Some(Utc::now() - chrono::Duration::minutes(1));
        store.insert_run(&first).await.unwrap();
        let mut second = JobRun::queued(&job.job_id);
        second.status = RunStatus::Succeeded;
        second.started_at = Some(Utc::now());
        store.insert_run(&second).await.unwrap();

        let jobs = store.list_jobs(10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].latest_run.as_ref().unwrap().status, RunStatus::Succeeded);
    }
}
