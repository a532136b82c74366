//! Media store
//!
//! Canonical record of every source, keyed by its deterministic id.
//! `get_or_create_source` is an idempotent merge: a second occurrence of the
//! same id updates metadata and never disturbs existing claims or an
//! existing audio path.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;

use quarry_core::{Segment, Source, SourceId, SourceType, Stage, StageState, StageStatus};

use crate::db::Database;
use crate::StoreError;

/// Partial update for [`MediaStore::update_source`].
#[derive(Debug, Clone, Default)]
pub struct SourceUpdate {
    pub title: Option<String>,
    pub duration_seconds: Option<f64>,
    pub uploader: Option<String>,
    pub upload_date: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub thumbnail_local_path: Option<String>,
    pub checksum: Option<String>,
    pub audio_file_path: Option<String>,
}

#[derive(Clone)]
pub struct MediaStore {
    db: Database,
}

impl MediaStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Idempotent upsert. On conflict, non-null attributes merge in;
    /// the id and an existing `audio_file_path` are preserved unless the
    /// caller explicitly passes a new one.
    pub async fn get_or_create_source(&self, source: Source) -> Result<Source, StoreError> {
        let mut tx = self.db.pool().begin().await?;

        let existing = fetch_source(&mut *tx, &source.id).await?;
        let merged = match existing {
            Some(mut current) => {
                current.merge_from(&source);
                current
            }
            None => source,
        };

        sqlx::query(
            r#"INSERT INTO sources (source_id, source_type, url, file_path, title,
                duration_seconds, uploader, upload_date, description, tags, chapters,
                thumbnail_local_path, checksum, audio_file_path, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(source_id) DO UPDATE SET
                 source_type = excluded.source_type,
                 url = excluded.url,
                 file_path = excluded.file_path,
                 title = excluded.title,
                 duration_seconds = excluded.duration_seconds,
                 uploader = excluded.uploader,
                 upload_date = excluded.upload_date,
                 description = excluded.description,
                 tags = excluded.tags,
                 chapters = excluded.chapters,
                 thumbnail_local_path = excluded.thumbnail_local_path,
                 checksum = excluded.checksum,
                 audio_file_path = excluded.audio_file_path"#,
        )
        .bind(merged.id.as_str())
        .bind(merged.source_type.as_str())
        .bind(&merged.url)
        .bind(&merged.file_path)
        .bind(&merged.title)
        .bind(merged.duration_seconds)
        .bind(&merged.uploader)
        .bind(&merged.upload_date)
        .bind(&merged.description)
        .bind(serde_json::to_string(&merged.tags)?)
        .bind(serde_json::to_string(&merged.chapters)?)
        .bind(&merged.thumbnail_local_path)
        .bind(&merged.checksum)
        .bind(&merged.audio_file_path)
        .bind(merged.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(source = %merged.id, "source upserted");
        Ok(merged)
    }

    /// Partial update of mutable metadata fields.
    pub async fn update_source(
        &self,
        source_id: &SourceId,
        update: SourceUpdate,
    ) -> Result<(), StoreError> {
        let Some(mut source) = self.get_source(source_id).await? else {
            return Err(StoreError::UnknownSource(source_id.to_string()));
        };

        macro_rules! apply {
            ($field:ident) => {
                if let Some(value) = update.$field {
                    source.$field = Some(value);
                }
            };
        }
        apply!(title);
        apply!(duration_seconds);
        apply!(uploader);
        apply!(upload_date);
        apply!(description);
        apply!(thumbnail_local_path);
        apply!(checksum);
        apply!(audio_file_path);
        if let Some(tags) = update.tags {
            source.tags = tags;
        }

        self.get_or_create_source(source).await?;
        Ok(())
    }

    pub async fn get_source(&self, source_id: &SourceId) -> Result<Option<Source>, StoreError> {
        fetch_source(self.db.pool(), source_id).await
    }

    /// Single-query batch fetch.
    pub async fn get_sources_batch(
        &self,
        source_ids: &[SourceId],
    ) -> Result<HashMap<SourceId, Source>, StoreError> {
        if source_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; source_ids.len()].join(", ");
        let sql = format!("SELECT * FROM sources WHERE source_id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in source_ids {
            query = query.bind(id.as_str());
        }
        let rows = query.fetch_all(self.db.pool()).await?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let source = row_to_source(&row)?;
            map.insert(source.id.clone(), source);
        }
        Ok(map)
    }

    /// Persist a source's transcript segments. Existing rows are kept, so
    /// a re-transcription of the same source never duplicates them.
    pub async fn save_segments(&self, segments: &[Segment]) -> Result<usize, StoreError> {
        let mut tx = self.db.pool().begin().await?;
        let mut written = 0usize;
        for segment in segments {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO segments (source_id, segment_id, t0, t1, text) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(segment.source_id.as_str())
            .bind(segment.segment_id)
            .bind(segment.t0.as_seconds())
            .bind(segment.t1.as_seconds())
            .bind(&segment.text)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(written)
    }

    /// Ordered transcript segments for one source.
    pub async fn segments_for_source(
        &self,
        source_id: &SourceId,
    ) -> Result<Vec<Segment>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM segments WHERE source_id = ? ORDER BY segment_id",
        )
        .bind(source_id.as_str())
        .fetch_all(self.db.pool())
        .await?;
        rows.iter()
            .map(|row| {
                Ok(Segment {
                    source_id: SourceId::new(row.try_get::<String, _>("source_id")?),
                    segment_id: row.try_get("segment_id")?,
                    t0: quarry_core::Timestamp::from_seconds(row.try_get("t0")?),
                    t1: quarry_core::Timestamp::from_seconds(row.try_get("t1")?),
                    text: row.try_get("text")?,
                })
            })
            .collect()
    }

    /// Atomic stage-status upsert; an update only lands when its
    /// `last_updated` is not older than the stored one.
    pub async fn upsert_stage_status(&self, status: &StageStatus) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO source_stage_status
                 (source_id, stage, status, progress_percent, worker_id, metadata, last_updated)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(source_id, stage) DO UPDATE SET
                 status = excluded.status,
                 progress_percent = excluded.progress_percent,
                 worker_id = excluded.worker_id,
                 metadata = excluded.metadata,
                 last_updated = excluded.last_updated
               WHERE excluded.last_updated >= source_stage_status.last_updated"#,
        )
        .bind(status.source_id.as_str())
        .bind(status.stage.as_str())
        .bind(status.state.as_str())
        .bind(status.progress_percent)
        .bind(&status.worker_id)
        .bind(
            status
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(status.last_updated.to_rfc3339())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// All stage statuses for one source.
    pub async fn stage_statuses(
        &self,
        source_id: &SourceId,
    ) -> Result<Vec<StageStatus>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM source_stage_status WHERE source_id = ? ORDER BY stage",
        )
        .bind(source_id.as_str())
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(row_to_stage_status).collect()
    }

    /// Snapshot across sources, optionally filtered, newest first.
    pub async fn stage_snapshot(
        &self,
        stage: Option<Stage>,
        state: Option<StageState>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StageStatus>, StoreError> {
        let mut sql = String::from("SELECT * FROM source_stage_status WHERE 1=1");
        if stage.is_some() {
            sql.push_str(" AND stage = ?");
        }
        if state.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY last_updated DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(stage) = stage {
            query = query.bind(stage.as_str());
        }
        if let Some(state) = state {
            query = query.bind(state.as_str());
        }
        query = query.bind(limit).bind(offset);

        let rows = query.fetch_all(self.db.pool()).await?;
        rows.iter().map(row_to_stage_status).collect()
    }
}

pub(crate) async fn fetch_source<'e, E>(
    executor: E,
    source_id: &SourceId,
) -> Result<Option<Source>, StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let row = sqlx::query("SELECT * FROM sources WHERE source_id = ?")
        .bind(source_id.as_str())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(row_to_source).transpose()
}

pub(crate) fn row_to_source(row: &sqlx::sqlite::SqliteRow) -> Result<Source, StoreError> {
    let source_type: String = row.try_get("source_type")?;
    let tags: String = row.try_get("tags")?;
    let chapters: String = row.try_get("chapters")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(Source {
        id: SourceId::new(row.try_get::<String, _>("source_id")?),
        source_type: SourceType::parse(&source_type).unwrap_or(SourceType::Url),
        url: row.try_get("url")?,
        file_path: row.try_get("file_path")?,
        title: row.try_get("title")?,
        duration_seconds: row.try_get("duration_seconds")?,
        uploader: row.try_get("uploader")?,
        upload_date: row.try_get("upload_date")?,
        description: row.try_get("description")?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        chapters: serde_json::from_str(&chapters).unwrap_or_default(),
        thumbnail_local_path: row.try_get("thumbnail_local_path")?,
        checksum: row.try_get("checksum")?,
        audio_file_path: row.try_get("audio_file_path")?,
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_stage_status(row: &sqlx::sqlite::SqliteRow) -> Result<StageStatus, StoreError> {
    let stage: String = row.try_get("stage")?;
    let status: String = row.try_get("status")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    let last_updated: String = row.try_get("last_updated")?;
    Ok(StageStatus {
        source_id: SourceId::new(row.try_get::<String, _>("source_id")?),
        stage: Stage::parse(&stage).unwrap_or(Stage::Download),
        state: StageState::parse(&status).unwrap_or(StageState::Pending),
        progress_percent: row.try_get("progress_percent")?,
        worker_id: row.try_get("worker_id")?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        last_updated: last_updated
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store() -> MediaStore {
        MediaStore::new(Database::open_in_memory().await.unwrap())
    }

    fn source(id: &str) -> Source {
        Source::new(SourceId::new(id), SourceType::Url)
    }

    #[tokio::test]
    async fn upsert_merges_without_clobbering_audio_path() {
        let store = store().await;

        let mut first = source("vid1");
        first.audio_file_path = Some("/audio/vid1.opus".into());
        first.title = Some("First title".into());
        store.get_or_create_source(first).await.unwrap();

        // Second occurrence: new title, no audio path
        let mut second = source("vid1");
        second.title = Some("Refreshed title".into());
        let merged = store.get_or_create_source(second).await.unwrap();

        assert_eq!(merged.title.as_deref(), Some("Refreshed title"));
        assert_eq!(merged.audio_file_path.as_deref(), Some("/audio/vid1.opus"));

        let reread = store.get_source(&SourceId::new("vid1")).await.unwrap().unwrap();
        assert_eq!(reread.audio_file_path.as_deref(), Some("/audio/vid1.opus"));
    }

    #[tokio::test]
    async fn batch_fetch_returns_requested_sources() {
        let store = store().await;
        for id in ["a", "b", "c"] {
            store.get_or_create_source(source(id)).await.unwrap();
        }
        let batch = store
            .get_sources_batch(&[SourceId::new("a"), SourceId::new("c"), SourceId::new("zz")])
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.contains_key(&SourceId::new("a")));
        assert!(batch.contains_key(&SourceId::new("c")));
    }

    #[tokio::test]
    async fn stage_status_is_last_write_wins_by_timestamp() {
        let store = store().await;
        store.get_or_create_source(source("vid2")).await.unwrap();
        let id = SourceId::new("vid2");

        let mut newer = StageStatus::new(id.clone(), Stage::Download, StageState::Completed);
        newer.last_updated = Utc::now();
        let mut older = StageStatus::new(id.clone(), Stage::Download, StageState::InProgress);
        older.last_updated = newer.last_updated - Duration::seconds(30);

        store.upsert_stage_status(&newer).await.unwrap();
        // A stale write must not regress the row
        store.upsert_stage_status(&older).await.unwrap();

        let statuses = store.stage_statuses(&id).await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, StageState::Completed);
    }

    #[tokio::test]
    async fn update_source_is_partial() {
        let store = store().await;
        let mut s = source("vid3");
        s.title = Some("Keep me".into());
        store.get_or_create_source(s).await.unwrap();

        store
            .update_source(
                &SourceId::new("vid3"),
                SourceUpdate { checksum: Some("abc123".into()), ..Default::default() },
            )
            .await
            .unwrap();

        let reread = store.get_source(&SourceId::new("vid3")).await.unwrap().unwrap();
        assert_eq!(reread.title.as_deref(), Some("Keep me"));
        assert_eq!(reread.checksum.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn segments_save_once_and_read_ordered() {
        let store = store().await;
        store.get_or_create_source(source("vid5")).await.unwrap();
        let id = SourceId::new("vid5");

        let segments: Vec<Segment> = (0..3)
            .map(|i| Segment {
                source_id: id.clone(),
                segment_id: i,
                t0: quarry_core::Timestamp::from_seconds(i as f64 * 5.0),
                t1: quarry_core::Timestamp::from_seconds((i + 1) as f64 * 5.0),
                text: format!("seg {i}"),
            })
            .collect();

        assert_eq!(store.save_segments(&segments).await.unwrap(), 3);
        // Re-transcription must not duplicate rows
        assert_eq!(store.save_segments(&segments).await.unwrap(), 0);

        let read = store.segments_for_source(&id).await.unwrap();
        assert_eq!(read.len(), 3);
        assert_eq!(read[0].segment_id, 0);
        assert_eq!(read[2].text, "seg 2");
    }

    #[tokio::test]
    async fn unknown_source_update_errors() {
        let store = store().await;
        let result = store
            .update_source(&SourceId::new("ghost"), SourceUpdate::default())
            .await;
        assert!(matches!(result, Err(StoreError::UnknownSource(_))));
    }

    #[tokio::test]
    async fn snapshot_filters_by_stage_and_state() {
        let store = store().await;
        store.get_or_create_source(source("vid4")).await.unwrap();
        let id = SourceId::new("vid4");
        store
            .upsert_stage_status(&StageStatus::new(id.clone(), Stage::Download, StageState::Completed))
            .await
            .unwrap();
        store
            .upsert_stage_status(&StageStatus::new(id.clone(), Stage::Mining, StageState::Failed))
            .await
            .unwrap();

        let failed = store
            .stage_snapshot(None, Some(StageState::Failed), 10, 0)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].stage, Stage::Mining);
    }
}
