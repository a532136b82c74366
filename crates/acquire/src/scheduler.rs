//! Acquisition scheduler
//!
//! Per-URL algorithm:
//! 1. Skip when a valid audio file already exists.
//! 2. Rotate to the next paced identity, honoring the quiet-hours window.
//! 3. Attempt with a per-attempt timeout; bounded backoff on generic
//!    failures, identity rotation on auth failures. Retries never run
//!    unbounded.
//! 4. After the main pass, drain the retry queue against every
//!    still-enabled identity once.
//!
//! Persistent failures land in a timestamped `failed_urls` file; the batch
//! succeeds as long as at least one URL did.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quarry_core::{
    FetchFailureKind, FetchSpec, FetchedMedia, MediaFetcher, SourceId, Stage, StageState,
    StageStatus, SMALLEST_AUDIO_FORMAT,
};
use quarry_config::{Settings, YoutubeSettings};

use crate::archive::DownloadArchive;
use crate::identity::{Checkout, IdentityPool};
use crate::AcquireError;

/// Backoff before each generic-failure retry, roughly a minute in total.
/// Four retries, then the URL moves to the retry queue; a fifth retry never
/// occurs.
pub const RETRY_BACKOFF_SECS: [u64; 4] = [3, 8, 15, 34];
/// Poll interval while waiting on pacing, sleep windows, or cancellation.
const WAIT_POLL: Duration = Duration::from_millis(250);

/// Callback invoked on every download stage transition.
pub type StatusSink = Arc<dyn Fn(StageStatus) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub audio_dir: PathBuf,
    pub archive_path: PathBuf,
    pub failed_urls_dir: PathBuf,
    pub use_download_archive: bool,
    pub delay_min: Duration,
    pub delay_max: Duration,
    pub jitter_percent: f64,
    pub attempt_timeout: Duration,
    pub enable_sleep_period: bool,
    pub sleep_start_hour: u32,
    pub sleep_end_hour: u32,
    pub sleep_utc_offset: FixedOffset,
    /// Skip URLs with no proxied identity instead of downloading directly.
    pub strict_proxy: bool,
    pub format: String,
    /// Backoff schedule for generic-failure retries.
    pub retry_backoff: Vec<Duration>,
}

impl SchedulerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let yt: &YoutubeSettings = &settings.youtube;
        let offset = parse_utc_offset(&yt.sleep_timezone)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));
        Self {
            audio_dir: settings.storage.audio_dir.clone(),
            archive_path: settings.storage.archive_path.clone(),
            failed_urls_dir: settings.storage.failed_urls_dir.clone(),
            use_download_archive: yt.use_download_archive,
            delay_min: Duration::from_secs(yt.sequential_download_delay_min),
            delay_max: Duration::from_secs(yt.sequential_download_delay_max),
            jitter_percent: yt.delay_randomization_percent,
            attempt_timeout: Duration::from_secs(yt.download_timeout_secs),
            enable_sleep_period: yt.enable_sleep_period,
            sleep_start_hour: yt.sleep_start_hour,
            sleep_end_hour: yt.sleep_end_hour,
            sleep_utc_offset: offset,
            strict_proxy: settings.proxy.strict_mode,
            format: SMALLEST_AUDIO_FORMAT.to_string(),
            retry_backoff: RETRY_BACKOFF_SECS.iter().map(|&s| Duration::from_secs(s)).collect(),
        }
    }
}

/// Parse a `+05:30` / `-08:00` style offset.
fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    let (sign, rest) = match raw.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, raw.strip_prefix('+').unwrap_or(raw)),
    };
    let (hours, minutes) = rest.split_once(':')?;
    let seconds = sign * (hours.parse::<i32>().ok()? * 3600 + minutes.parse::<i32>().ok()? * 60);
    FixedOffset::east_opt(seconds)
}

/// Seconds until the quiet-hours window ends, if `now` is inside it.
fn sleep_window_remaining(
    now: DateTime<FixedOffset>,
    start_hour: u32,
    end_hour: u32,
) -> Option<Duration> {
    let hour = now.hour();
    let inside = if start_hour <= end_hour {
        hour >= start_hour && hour < end_hour
    } else {
        // Window wraps midnight, e.g. 22:00-06:00
        hour >= start_hour || hour < end_hour
    };
    if !inside {
        return None;
    }
    let seconds_today = (now.hour() * 3600 + now.minute() * 60 + now.second()) as i64;
    let end_seconds = (end_hour * 3600) as i64;
    let remaining = if end_seconds > seconds_today {
        end_seconds - seconds_today
    } else {
        86_400 - seconds_today + end_seconds
    };
    Some(Duration::from_secs(remaining as u64))
}

/// Final status of one URL in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlStatus {
    Downloaded,
    AlreadyDownloaded,
    Failed,
    NoProxyAvailable,
}

#[derive(Debug, Clone)]
pub struct UrlOutcome {
    pub url: String,
    pub source_id: Option<SourceId>,
    pub status: UrlStatus,
    pub error: Option<String>,
    /// Cause of the last failed attempt, when one was made.
    pub failure_kind: Option<FetchFailureKind>,
    pub media: Option<FetchedMedia>,
}

/// Batch result with per-URL outcomes.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcomes: Vec<UrlOutcome>,
    pub failed_urls_file: Option<PathBuf>,
    pub archive_entries_removed: usize,
}

impl BatchReport {
    pub fn downloaded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status == UrlStatus::Downloaded).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == UrlStatus::AlreadyDownloaded)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status == UrlStatus::Failed).count()
    }

    /// The batch succeeds as long as at least one URL was acquired or was
    /// already present.
    pub fn is_success(&self) -> bool {
        self.outcomes.is_empty() || self.downloaded() + self.skipped() > 0
    }
}

pub struct AcquisitionScheduler {
    fetcher: Arc<dyn MediaFetcher>,
    pool: IdentityPool,
    archive: DownloadArchive,
    config: SchedulerConfig,
    status_sink: Option<StatusSink>,
}

impl AcquisitionScheduler {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        pool: IdentityPool,
        config: SchedulerConfig,
    ) -> Self {
        let archive = DownloadArchive::new(&config.archive_path);
        Self { fetcher, pool, archive, config, status_sink: None }
    }

    /// Register a callback for download stage transitions.
    pub fn with_status_sink(mut self, sink: StatusSink) -> Self {
        self.status_sink = Some(sink);
        self
    }

    fn emit(&self, status: StageStatus) {
        if let Some(sink) = &self.status_sink {
            sink(status);
        }
    }

    /// Run a batch. Probes identities first; a multi-URL batch with zero
    /// healthy identities refuses to start rather than exposing the
    /// operator's primary identity.
    pub async fn run(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<BatchReport, AcquireError> {
        if !self.pool.is_empty() {
            let healthy = self.pool.probe_all(self.fetcher.as_ref()).await;
            if healthy == 0 && urls.len() > 1 {
                return Err(AcquireError::NoIdentities);
            }
        }

        let archive_entries_removed = if self.config.use_download_archive {
            self.archive.validate(&self.config.audio_dir)?.len()
        } else {
            0
        };

        let mut outcomes = Vec::with_capacity(urls.len());
        let mut retry_queue: VecDeque<(String, SourceId)> = VecDeque::new();

        for url in urls {
            if cancel.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }
            let outcome = self.process_url(url, &mut retry_queue, cancel).await?;
            if let Some(outcome) = outcome {
                outcomes.push(outcome);
            }
        }

        // Retry pass: each queued URL against every still-enabled identity once
        while let Some((url, source_id)) = retry_queue.pop_front() {
            if cancel.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }
            outcomes.push(self.retry_url(&url, &source_id, cancel).await?);
        }

        let failed: Vec<&UrlOutcome> =
            outcomes.iter().filter(|o| o.status == UrlStatus::Failed).collect();
        let failed_urls_file = if failed.is_empty() {
            None
        } else {
            Some(self.write_failed_urls(&failed)?)
        };

        info!(
            total = outcomes.len(),
            downloaded = outcomes.iter().filter(|o| o.status == UrlStatus::Downloaded).count(),
            failed = failed.len(),
            "acquisition batch complete"
        );

        Ok(BatchReport { outcomes, failed_urls_file, archive_entries_removed })
    }

    /// Main-pass handling for one URL. Returns `None` when the URL was
    /// deferred to the retry queue.
    async fn process_url(
        &self,
        url: &str,
        retry_queue: &mut VecDeque<(String, SourceId)>,
        cancel: &CancellationToken,
    ) -> Result<Option<UrlOutcome>, AcquireError> {
        let Some(source_id) = SourceId::from_url(url) else {
            return Ok(Some(UrlOutcome {
                url: url.to_string(),
                source_id: None,
                status: UrlStatus::Failed,
                error: Some("no recognizable video id".to_string()),
                failure_kind: None,
                media: None,
            }));
        };

        // Already acquired?
        if DownloadArchive::find_valid_audio(&self.config.audio_dir, source_id.as_str()).is_some() {
            self.emit(
                StageStatus::new(source_id.clone(), Stage::Download, StageState::Skipped)
                    .with_metadata(serde_json::json!({"reason": "already_downloaded"})),
            );
            return Ok(Some(UrlOutcome {
                url: url.to_string(),
                source_id: Some(source_id),
                status: UrlStatus::AlreadyDownloaded,
                error: None,
                failure_kind: None,
                media: None,
            }));
        }

        self.emit(StageStatus::new(source_id.clone(), Stage::Download, StageState::Queued));
        self.wait_out_sleep_window(cancel).await?;

        let identity = match self.checkout_identity(cancel).await? {
            Some(identity) => identity,
            None => {
                // Every identity disabled; park for the retry pass (which
                // will fail fast if nothing recovers)
                retry_queue.push_back((url.to_string(), source_id));
                return Ok(None);
            }
        };

        if self.config.strict_proxy && identity.proxy.is_none() {
            self.emit(
                StageStatus::new(source_id.clone(), Stage::Download, StageState::Skipped)
                    .with_metadata(serde_json::json!({"reason": "no_proxy"})),
            );
            return Ok(Some(UrlOutcome {
                url: url.to_string(),
                source_id: Some(source_id),
                status: UrlStatus::NoProxyAvailable,
                error: None,
                failure_kind: None,
                media: None,
            }));
        }

        self.emit(
            StageStatus::new(source_id.clone(), Stage::Download, StageState::InProgress)
                .with_worker(identity.index.to_string()),
        );

        let spec = self.fetch_spec(url, &source_id, &identity.cookie_file, &identity.proxy);

        // Bounded backoff on generic failures; auth failures rotate instead
        let backoffs = self.config.retry_backoff.clone();
        for (attempt, backoff) in std::iter::once(None).chain(backoffs.iter().map(Some)).enumerate()
        {
            if let Some(&delay) = backoff {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                }
            }

            match self.fetcher.fetch(&spec).await {
                Ok(media) => {
                    self.finish_success(&source_id, &identity.index).await;
                    return Ok(Some(UrlOutcome {
                        url: url.to_string(),
                        source_id: Some(source_id),
                        status: UrlStatus::Downloaded,
                        error: None,
                        failure_kind: None,
                        media: Some(media),
                    }));
                }
                Err(failure) if failure.is_auth() => {
                    warn!(url, identity = identity.index, "auth failure, rotating identity");
                    self.pool.record_auth_failure(identity.index);
                    retry_queue.push_back((url.to_string(), source_id));
                    return Ok(None);
                }
                Err(failure) => {
                    self.pool.record_generic_failure(identity.index);
                    warn!(url, attempt, error = %failure, "download attempt failed");
                    if failure.kind == FetchFailureKind::Unavailable {
                        // Retrying an unavailable video wastes the budget
                        break;
                    }
                }
            }
        }

        // Retries exhausted; hand to the retry pass for identity failover
        retry_queue.push_back((url.to_string(), source_id));
        Ok(None)
    }

    /// Retry pass: one attempt per still-enabled identity.
    async fn retry_url(
        &self,
        url: &str,
        source_id: &SourceId,
        cancel: &CancellationToken,
    ) -> Result<UrlOutcome, AcquireError> {
        let mut last_error = "no enabled identities remained".to_string();
        let mut last_kind = None;

        for identity in self.pool.enabled_identities() {
            if cancel.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }
            let spec = self.fetch_spec(url, source_id, &identity.cookie_file, &identity.proxy);
            match self.fetcher.fetch(&spec).await {
                Ok(media) => {
                    self.finish_success(source_id, &identity.index).await;
                    return Ok(UrlOutcome {
                        url: url.to_string(),
                        source_id: Some(source_id.clone()),
                        status: UrlStatus::Downloaded,
                        error: None,
                        failure_kind: None,
                        media: Some(media),
                    });
                }
                Err(failure) => {
                    if failure.is_auth() {
                        self.pool.record_auth_failure(identity.index);
                    }
                    last_error = failure.to_string();
                    last_kind = Some(failure.kind);
                }
            }
        }

        self.emit(
            StageStatus::new(source_id.clone(), Stage::Download, StageState::Failed)
                .with_metadata(serde_json::json!({"error": last_error.clone()})),
        );
        Ok(UrlOutcome {
            url: url.to_string(),
            source_id: Some(source_id.clone()),
            status: UrlStatus::Failed,
            error: Some(last_error),
            failure_kind: last_kind,
            media: None,
        })
    }

    async fn finish_success(&self, source_id: &SourceId, identity_index: &usize) {
        if self.config.use_download_archive {
            if let Err(e) = self.archive.append("youtube", source_id.as_str()) {
                warn!(error = %e, "failed to write archive entry");
            }
        }
        self.pool.record_success(*identity_index, self.next_delay());
        self.emit(
            StageStatus::new(source_id.clone(), Stage::Download, StageState::Completed)
                .with_progress(100.0)
                .with_worker(identity_index.to_string()),
        );
    }

    fn fetch_spec(
        &self,
        url: &str,
        source_id: &SourceId,
        cookie_file: &Option<PathBuf>,
        proxy: &Option<String>,
    ) -> FetchSpec {
        FetchSpec {
            url: url.to_string(),
            source_id: source_id.clone(),
            output_dir: self.config.audio_dir.clone(),
            cookie_file: cookie_file.clone(),
            proxy: proxy.clone(),
            format: self.config.format.clone(),
            timeout: self.config.attempt_timeout,
        }
    }

    /// Pacing delay drawn from `[delay_min, delay_max]` with jitter.
    fn next_delay(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let min = self.config.delay_min.as_secs_f64();
        let max = self.config.delay_max.as_secs_f64();
        let base = if max > min { rng.gen_range(min..=max) } else { min };
        let jitter = self.config.jitter_percent / 100.0;
        let factor = rng.gen_range((1.0 - jitter).max(0.0)..=1.0 + jitter);
        Duration::from_secs_f64(base * factor)
    }

    async fn checkout_identity(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<crate::identity::Identity>, AcquireError> {
        if self.pool.is_empty() {
            // Single-URL direct mode: no identity, plain fetch
            return Ok(Some(crate::identity::Identity {
                index: 0,
                label: "direct".to_string(),
                cookie_file: None,
                proxy: None,
            }));
        }
        loop {
            if cancel.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }
            match self.pool.checkout() {
                Checkout::Ready(identity) => return Ok(Some(identity)),
                Checkout::Exhausted => return Ok(None),
                Checkout::Wait(wait) => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait.min(WAIT_POLL)) => {}
                        _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                    }
                }
            }
        }
    }

    async fn wait_out_sleep_window(&self, cancel: &CancellationToken) -> Result<(), AcquireError> {
        if !self.config.enable_sleep_period {
            return Ok(());
        }
        loop {
            let now = Utc::now().with_timezone(&self.config.sleep_utc_offset);
            let Some(remaining) = sleep_window_remaining(
                now,
                self.config.sleep_start_hour,
                self.config.sleep_end_hour,
            ) else {
                return Ok(());
            };
            info!(remaining_s = remaining.as_secs(), "inside quiet-hours window, parking");
            tokio::select! {
                _ = tokio::time::sleep(remaining.min(Duration::from_secs(60))) => {}
                _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
            }
        }
    }

    fn write_failed_urls(&self, failed: &[&UrlOutcome]) -> Result<PathBuf, AcquireError> {
        std::fs::create_dir_all(&self.config.failed_urls_dir)?;
        let path = self
            .config
            .failed_urls_dir
            .join(format!("failed_urls_{}.txt", Utc::now().format("%Y%m%d_%H%M%S")));
        let body: String = failed.iter().map(|o| format!("{}\n", o.url)).collect();
        std::fs::write(&path, body)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use quarry_core::{FetchFailure, FetchedMedia};
    use std::collections::HashMap;

    /// Scripted fetcher: per-URL sequences of failure kinds, then success.
    struct ScriptedFetcher {
        audio_dir: PathBuf,
        calls: Mutex<Vec<(String, Option<PathBuf>)>>,
        failures: Mutex<HashMap<String, Vec<FetchFailureKind>>>,
        probe_failures: Mutex<Vec<usize>>,
    }

    impl ScriptedFetcher {
        fn new(audio_dir: PathBuf) -> Self {
            Self {
                audio_dir,
                calls: Mutex::new(Vec::new()),
                failures: Mutex::new(HashMap::new()),
                probe_failures: Mutex::new(Vec::new()),
            }
        }

        fn script_failures(&self, url: &str, kinds: Vec<FetchFailureKind>) {
            self.failures.lock().insert(url.to_string(), kinds);
        }

        fn call_count(&self, url: &str) -> usize {
            self.calls.lock().iter().filter(|(u, _)| u == url).count()
        }
    }

    #[async_trait]
    impl MediaFetcher for ScriptedFetcher {
        async fn fetch(&self, spec: &FetchSpec) -> Result<FetchedMedia, FetchFailure> {
            self.calls.lock().push((spec.url.clone(), spec.cookie_file.clone()));
            let mut failures = self.failures.lock();
            if let Some(kinds) = failures.get_mut(&spec.url) {
                if !kinds.is_empty() {
                    let kind = kinds.remove(0);
                    return Err(FetchFailure::new(kind, "scripted"));
                }
            }
            drop(failures);
            let path = self.audio_dir.join(format!("{}.opus", spec.source_id.as_str()));
            std::fs::create_dir_all(&self.audio_dir).unwrap();
            std::fs::write(&path, vec![0u8; 20 * 1024]).unwrap();
            Ok(FetchedMedia {
                audio_path: path,
                title: Some("scripted".into()),
                duration_seconds: Some(60.0),
                uploader: None,
                upload_date: None,
                description: None,
                tags: vec![],
                chapters: vec![],
                thumbnail_local_path: None,
            })
        }

        async fn probe_identity(
            &self,
            cookie_file: Option<&PathBuf>,
            _proxy: Option<&str>,
        ) -> Result<(), FetchFailure> {
            let index: usize = cookie_file
                .and_then(|p| p.file_stem())
                .and_then(|s| s.to_string_lossy().parse().ok())
                .unwrap_or(0);
            if self.probe_failures.lock().contains(&index) {
                Err(FetchFailure::new(FetchFailureKind::Auth, "dead cookies"))
            } else {
                Ok(())
            }
        }
    }

    fn test_config(dir: &std::path::Path) -> SchedulerConfig {
        SchedulerConfig {
            audio_dir: dir.join("audio"),
            archive_path: dir.join("download_archive.txt"),
            failed_urls_dir: dir.to_path_buf(),
            use_download_archive: true,
            delay_min: Duration::from_millis(0),
            delay_max: Duration::from_millis(1),
            jitter_percent: 25.0,
            attempt_timeout: Duration::from_secs(60),
            enable_sleep_period: false,
            sleep_start_hour: 0,
            sleep_end_hour: 6,
            sleep_utc_offset: FixedOffset::east_opt(0).unwrap(),
            strict_proxy: false,
            format: SMALLEST_AUDIO_FORMAT.to_string(),
            retry_backoff: vec![Duration::from_millis(1); 4],
        }
    }

    fn identities(n: usize) -> Vec<Identity> {
        (0..n)
            .map(|i| Identity {
                index: i,
                label: format!("id-{i}"),
                cookie_file: Some(PathBuf::from(format!("{i}.txt"))),
                proxy: None,
            })
            .collect()
    }

    use crate::identity::Identity;

    fn url(id: &str) -> String {
        format!("https://www.youtube.com/watch?v={id}")
    }

    #[tokio::test]
    async fn batch_downloads_and_archives() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new(dir.path().join("audio")));
        let scheduler = AcquisitionScheduler::new(
            fetcher.clone(),
            IdentityPool::new(identities(2)),
            test_config(dir.path()),
        );

        let urls = vec![url("aaaaaaaaaaa"), url("bbbbbbbbbbb")];
        let report = scheduler.run(&urls, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.downloaded(), 2);
        assert!(report.is_success());
        assert!(report.failed_urls_file.is_none());
        let archive = DownloadArchive::new(dir.path().join("download_archive.txt"));
        assert!(archive.contains("aaaaaaaaaaa").unwrap());
        assert!(archive.contains("bbbbbbbbbbb").unwrap());
    }

    #[tokio::test]
    async fn existing_valid_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let audio_dir = dir.path().join("audio");
        std::fs::create_dir_all(&audio_dir).unwrap();
        std::fs::write(audio_dir.join("ccccccccccc.opus"), vec![0u8; 20 * 1024]).unwrap();

        let fetcher = Arc::new(ScriptedFetcher::new(audio_dir));
        let events: Arc<Mutex<Vec<StageStatus>>> = Arc::new(Mutex::new(Vec::new()));
        let events2 = events.clone();
        let scheduler = AcquisitionScheduler::new(
            fetcher.clone(),
            IdentityPool::new(identities(1)),
            test_config(dir.path()),
        )
        .with_status_sink(Arc::new(move |s| events2.lock().push(s)));

        let report = scheduler.run(&[url("ccccccccccc")], &CancellationToken::new()).await.unwrap();

        assert_eq!(report.skipped(), 1);
        assert_eq!(fetcher.call_count(&url("ccccccccccc")), 0);
        let events = events.lock();
        assert!(events
            .iter()
            .any(|e| e.state == StageState::Skipped
                && e.metadata.as_ref().map(|m| m["reason"] == "already_downloaded").unwrap_or(false)));
    }

    #[tokio::test]
    async fn auth_failures_disable_identity_and_fail_over() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new(dir.path().join("audio")));
        // First three URLs hit auth failures on the identity that serves them
        for id in ["ddddddddddd", "eeeeeeeeeee", "fffffffffff"] {
            fetcher.script_failures(&url(id), vec![FetchFailureKind::Auth]);
        }
        let scheduler = AcquisitionScheduler::new(
            fetcher.clone(),
            IdentityPool::new(identities(2)),
            test_config(dir.path()),
        );

        let urls: Vec<String> =
            ["ddddddddddd", "eeeeeeeeeee", "fffffffffff", "ggggggggggg"].iter().map(|id| url(id)).collect();
        let report = scheduler.run(&urls, &CancellationToken::new()).await.unwrap();

        // All four succeed: auth-failed URLs recover in the retry pass
        assert_eq!(report.downloaded(), 4);
        assert!(report.failed_urls_file.is_none());
    }

    #[tokio::test]
    async fn generic_failures_back_off_then_retry_queue() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new(dir.path().join("audio")));
        // More failures than the backoff budget: 5 main-pass attempts fail,
        // then the retry pass succeeds
        fetcher.script_failures(&url("hhhhhhhhhhh"), vec![FetchFailureKind::Other; 5]);

        let scheduler = AcquisitionScheduler::new(
            fetcher.clone(),
            IdentityPool::new(identities(1)),
            test_config(dir.path()),
        );

        let report = scheduler.run(&[url("hhhhhhhhhhh")], &CancellationToken::new()).await.unwrap();
        assert_eq!(report.downloaded(), 1);
        // Main pass: 1 + 4 retries; retry pass: 1. Never a fifth retry.
        assert_eq!(fetcher.call_count(&url("hhhhhhhhhhh")), 6);
    }

    #[tokio::test]
    async fn persistent_failure_lands_in_failed_urls_file() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new(dir.path().join("audio")));
        fetcher.script_failures(&url("iiiiiiiiiii"), vec![FetchFailureKind::Other; 10]);

        let scheduler = AcquisitionScheduler::new(
            fetcher.clone(),
            IdentityPool::new(identities(1)),
            test_config(dir.path()),
        );

        let report = scheduler.run(&[url("iiiiiiiiiii")], &CancellationToken::new()).await.unwrap();
        assert_eq!(report.failed(), 1);
        assert!(!report.is_success());
        assert_eq!(report.outcomes[0].failure_kind, Some(FetchFailureKind::Other));
        let file = report.failed_urls_file.expect("failed urls file");
        let body = std::fs::read_to_string(file).unwrap();
        assert!(body.contains("iiiiiiiiiii"));
    }

    #[tokio::test]
    async fn rate_limited_failure_reports_its_kind() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new(dir.path().join("audio")));
        fetcher.script_failures(&url("lllllllllll"), vec![FetchFailureKind::RateLimited; 10]);

        let scheduler = AcquisitionScheduler::new(
            fetcher.clone(),
            IdentityPool::new(identities(1)),
            test_config(dir.path()),
        );

        let report = scheduler.run(&[url("lllllllllll")], &CancellationToken::new()).await.unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.outcomes[0].failure_kind, Some(FetchFailureKind::RateLimited));
    }

    #[tokio::test]
    async fn zero_healthy_identities_refuses_multi_url_batch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new(dir.path().join("audio")));
        *fetcher.probe_failures.lock() = vec![0, 1];

        let scheduler = AcquisitionScheduler::new(
            fetcher.clone(),
            IdentityPool::new(identities(2)),
            test_config(dir.path()),
        );

        let urls = vec![url("jjjjjjjjjjj"), url("kkkkkkkkkkk")];
        let result = scheduler.run(&urls, &CancellationToken::new()).await;
        assert!(matches!(result, Err(AcquireError::NoIdentities)));
        assert_eq!(fetcher.calls.lock().len(), 0);
    }

    #[test]
    fn sleep_window_math() {
        use chrono::TimeZone;
        let offset = FixedOffset::east_opt(0).unwrap();
        let at = |h: u32| offset.with_ymd_and_hms(2026, 3, 1, h, 30, 0).unwrap();

        // Simple window 0-6
        assert!(sleep_window_remaining(at(3), 0, 6).is_some());
        assert!(sleep_window_remaining(at(7), 0, 6).is_none());
        let remaining = sleep_window_remaining(at(5), 0, 6).unwrap();
        assert_eq!(remaining.as_secs(), 1800);

        // Wrapping window 22-06
        assert!(sleep_window_remaining(at(23), 22, 6).is_some());
        assert!(sleep_window_remaining(at(2), 22, 6).is_some());
        assert!(sleep_window_remaining(at(12), 22, 6).is_none());
        let wrap = sleep_window_remaining(at(23), 22, 6).unwrap();
        assert_eq!(wrap.as_secs(), (7 * 3600 - 1800) as u64);
    }

    #[test]
    fn offset_parsing() {
        assert_eq!(parse_utc_offset("+05:30").unwrap().local_minus_utc(), 5 * 3600 + 1800);
        assert_eq!(parse_utc_offset("-08:00").unwrap().local_minus_utc(), -8 * 3600);
        assert_eq!(parse_utc_offset("00:00").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("asia/kolkata").is_none());
    }
}
