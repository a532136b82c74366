//! Queue event bus and stage snapshots
//!
//! Events are emitted after each stage-status write and delivered over a
//! broadcast channel; slow subscribers lag rather than blocking the
//! emitter. The snapshot query behind the queue view is cached briefly
//! because the view polls faster than the table changes.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use quarry_core::{Stage, StageEvent, StageState, StageStatus};
use quarry_store::MediaStore;

use crate::OrchestratorError;

const EVENT_CAPACITY: usize = 256;
const SNAPSHOT_TTL: Duration = Duration::from_secs(2);

/// Filters for the queue view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotFilter {
    pub stage: Option<Stage>,
    pub state: Option<StageState>,
    pub limit: i64,
    pub offset: i64,
}

impl SnapshotFilter {
    pub fn normalized(mut self) -> Self {
        if self.limit <= 0 {
            self.limit = 100;
        }
        self
    }
}

/// One page of stage statuses, as served to the queue view.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub statuses: Vec<StageStatus>,
    pub fetched_at: Instant,
}

struct CachedSnapshot {
    filter: SnapshotFilter,
    snapshot: QueueSnapshot,
}

/// Broadcast bus over stage events, plus the cached snapshot query.
pub struct QueueEventBus {
    sender: broadcast::Sender<StageEvent>,
    cache: Mutex<Option<CachedSnapshot>>,
}

impl Default for QueueEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender, cache: Mutex::new(None) }
    }

    /// Emit an event for a freshly-written status row. Informational only;
    /// delivery is best-effort.
    pub fn emit(&self, status: &StageStatus) {
        let event = StageEvent::from(status);
        debug!(
            source = %event.source_id,
            stage = event.stage.as_str(),
            state = event.state.as_str(),
            "stage event"
        );
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a callback; events are delivered on a background task
    /// so the emitter is never blocked by a consumer.
    pub fn subscribe_with<F>(&self, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(StageEvent) + Send + 'static,
    {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Stage snapshot for the queue view, cached for a couple of seconds.
    pub async fn snapshot(
        &self,
        media: &MediaStore,
        filter: SnapshotFilter,
    ) -> Result<QueueSnapshot, OrchestratorError> {
        let filter = filter.normalized();
        {
            let cache = self.cache.lock();
            if let Some(cached) = cache.as_ref() {
                if cached.filter == filter && cached.snapshot.fetched_at.elapsed() < SNAPSHOT_TTL {
                    return Ok(cached.snapshot.clone());
                }
            }
        }

        let statuses = media
            .stage_snapshot(filter.stage, filter.state, filter.limit, filter.offset)
            .await?;
        let snapshot = QueueSnapshot { statuses, fetched_at: Instant::now() };
        *self.cache.lock() = Some(CachedSnapshot { filter, snapshot: snapshot.clone() });
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{Source, SourceId, SourceType};
    use quarry_store::Database;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let bus = QueueEventBus::new();
        let mut receiver = bus.subscribe();

        let status = StageStatus::new(SourceId::new("e1"), Stage::Mining, StageState::InProgress);
        bus.emit(&status);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.stage, Stage::Mining);
        assert_eq!(event.state, StageState::InProgress);
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_fine() {
        let bus = QueueEventBus::new();
        bus.emit(&StageStatus::new(SourceId::new("e2"), Stage::Download, StageState::Queued));
    }

    #[tokio::test]
    async fn snapshot_is_cached_within_ttl() {
        let db = Database::open_in_memory().await.unwrap();
        let media = MediaStore::new(db);
        media
            .get_or_create_source(Source::new(SourceId::new("e3"), SourceType::Url))
            .await
            .unwrap();
        media
            .upsert_stage_status(&StageStatus::new(
                SourceId::new("e3"),
                Stage::Download,
                StageState::Completed,
            ))
            .await
            .unwrap();

        let bus = QueueEventBus::new();
        let filter = SnapshotFilter::default();
        let first = bus.snapshot(&media, filter).await.unwrap();
        assert_eq!(first.statuses.len(), 1);

        // New write lands, but the cached page is still served
        media
            .upsert_stage_status(&StageStatus::new(
                SourceId::new("e3"),
                Stage::Transcription,
                StageState::Queued,
            ))
            .await
            .unwrap();
        let second = bus.snapshot(&media, filter).await.unwrap();
        assert_eq!(second.statuses.len(), 1);
        assert_eq!(second.fetched_at, first.fetched_at);
    }

    #[tokio::test]
    async fn different_filters_bypass_the_cache() {
        let db = Database::open_in_memory().await.unwrap();
        let media = MediaStore::new(db);
        let bus = QueueEventBus::new();

        let all = SnapshotFilter::default();
        let failed = SnapshotFilter { state: Some(StageState::Failed), ..Default::default() };
        bus.snapshot(&media, all).await.unwrap();
        // A different filter must hit the store, not the cache
        let result = bus.snapshot(&media, failed).await.unwrap();
        assert!(result.statuses.is_empty());
    }
}
