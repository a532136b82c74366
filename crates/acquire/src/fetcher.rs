//! yt-dlp subprocess fetcher
//!
//! One fetch is one subprocess invocation with the identity's cookies and
//! proxy, a per-attempt timeout, and JSON metadata on stdout. Failure kinds
//! are classified from exit output so the scheduler can rotate identities.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use quarry_core::{
    Chapter, FetchFailure, FetchFailureKind, FetchSpec, FetchedMedia, MediaFetcher, Timestamp,
    SMALLEST_AUDIO_SORT,
};

use crate::archive::DownloadArchive;

/// Probe target: cheap authenticated page that 403s on dead cookies.
const PROBE_URL: &str = "https://www.youtube.com/feed/you";
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct YtDlpFetcher {
    binary: PathBuf,
}

impl YtDlpFetcher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    fn classify(stderr: &str) -> FetchFailureKind {
        let lower = stderr.to_lowercase();
        if lower.contains("403") || lower.contains("401") || lower.contains("sign in") || lower.contains("cookies") {
            FetchFailureKind::Auth
        } else if lower.contains("429") || lower.contains("rate-limit") || lower.contains("too many requests") {
            FetchFailureKind::RateLimited
        } else if lower.contains("unavailable")
            || lower.contains("private")
            || lower.contains("removed")
            || lower.contains("not available")
        {
            FetchFailureKind::Unavailable
        } else {
            FetchFailureKind::Other
        }
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, spec: &FetchSpec) -> Result<FetchedMedia, FetchFailure> {
        std::fs::create_dir_all(&spec.output_dir)
            .map_err(|e| FetchFailure::new(FetchFailureKind::Other, e.to_string()))?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-f")
            .arg(&spec.format)
            .args(["-S", SMALLEST_AUDIO_SORT])
            .arg("--no-playlist")
            .arg("--write-thumbnail")
            .arg("--print-json")
            .arg("-o")
            .arg(spec.output_dir.join("%(id)s.%(ext)s"))
            .arg(&spec.url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cookies) = &spec.cookie_file {
            cmd.arg("--cookies").arg(cookies);
        }
        if let Some(proxy) = &spec.proxy {
            cmd.args(["--proxy", proxy]);
        }

        debug!(url = %spec.url, timeout_s = spec.timeout.as_secs(), "starting download");

        let output = tokio::time::timeout(spec.timeout, cmd.output())
            .await
            .map_err(|_| FetchFailure::new(FetchFailureKind::Timeout, "attempt deadline exceeded"))?
            .map_err(|e| FetchFailure::new(FetchFailureKind::Other, format!("spawn: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let kind = Self::classify(&stderr);
            return Err(FetchFailure::new(
                kind,
                stderr.chars().take(500).collect::<String>(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let metadata: DownloaderJson = stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str(line).ok())
            .ok_or_else(|| {
                FetchFailure::new(FetchFailureKind::Other, "no metadata JSON in downloader output")
            })?;

        let audio_path = DownloadArchive::find_valid_audio(&spec.output_dir, spec.source_id.as_str())
            .ok_or_else(|| {
                FetchFailure::new(
                    FetchFailureKind::Other,
                    "download reported success but produced no valid audio file",
                )
            })?;

        let thumbnail_local_path = find_thumbnail(&spec.output_dir, spec.source_id.as_str());

        Ok(FetchedMedia {
            audio_path,
            title: metadata.title,
            duration_seconds: metadata.duration,
            uploader: metadata.uploader,
            upload_date: metadata.upload_date,
            description: metadata.description,
            tags: metadata.tags,
            chapters: metadata
                .chapters
                .into_iter()
                .map(|c| Chapter {
                    title: c.title.unwrap_or_default(),
                    t0: Timestamp::from_seconds(c.start_time.unwrap_or(0.0)),
                    t1: Timestamp::from_seconds(c.end_time.unwrap_or(0.0)),
                })
                .collect(),
            thumbnail_local_path,
        })
    }

    async fn probe_identity(
        &self,
        cookie_file: Option<&PathBuf>,
        proxy: Option<&str>,
    ) -> Result<(), FetchFailure> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--simulate")
            .arg("--skip-download")
            .args(["--playlist-items", "1"])
            .arg(PROBE_URL)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cookies) = cookie_file {
            cmd.arg("--cookies").arg(cookies);
        }
        if let Some(proxy) = proxy {
            cmd.args(["--proxy", proxy]);
        }

        let output = tokio::time::timeout(PROBE_TIMEOUT, cmd.output())
            .await
            .map_err(|_| FetchFailure::new(FetchFailureKind::Timeout, "probe deadline exceeded"))?
            .map_err(|e| FetchFailure::new(FetchFailureKind::Other, format!("spawn: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(FetchFailure::new(
                Self::classify(&stderr),
                stderr.chars().take(300).collect::<String>(),
            ))
        }
    }
}

fn find_thumbnail(dir: &Path, video_id: &str) -> Option<PathBuf> {
    const THUMB_EXTENSIONS: [&str; 3] = ["jpg", "webp", "png"];
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .flatten()
        .map(|e| e.path())
        .find(|p| {
            let name = p.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
            let ext = p
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            name.contains(video_id) && THUMB_EXTENSIONS.contains(&ext.as_str())
        })
}

#[derive(Debug, Deserialize)]
struct DownloaderJson {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    upload_date: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    chapters: Vec<DownloaderChapter>,
}

#[derive(Debug, Deserialize)]
struct DownloaderChapter {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    start_time: Option<f64>,
    #[serde(default)]
    end_time: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_classification() {
        assert_eq!(
            YtDlpFetcher::classify("HTTP Error 403: Forbidden"),
            FetchFailureKind::Auth
        );
        assert_eq!(
            YtDlpFetcher::classify("Sign in to confirm you're not a bot"),
            FetchFailureKind::Auth
        );
        assert_eq!(
            YtDlpFetcher::classify("HTTP Error 429: Too Many Requests"),
            FetchFailureKind::RateLimited
        );
        assert_eq!(
            YtDlpFetcher::classify("ERROR: Video unavailable"),
            FetchFailureKind::Unavailable
        );
        assert_eq!(
            YtDlpFetcher::classify("ssl handshake wobbled"),
            FetchFailureKind::Other
        );
    }

    #[test]
    fn metadata_json_parses_from_mixed_output() {
        let line = r#"{"title": "A Talk", "duration": 1234.5, "uploader": "chan", "tags": ["ai"], "chapters": [{"title": "Intro", "start_time": 0.0, "end_time": 60.0}]}"#;
        let parsed: DownloaderJson = serde_json::from_str(line).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("A Talk"));
        assert_eq!(parsed.chapters.len(), 1);
    }
}
