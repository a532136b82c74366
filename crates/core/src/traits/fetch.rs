//! Media fetching trait
//!
//! Downloads one URL as smallest-bitrate audio using an authenticated
//! identity. The scheduler needs failure *kinds* to drive identity rotation,
//! so fetch errors are structured rather than stringly typed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::{Chapter, SourceId};

/// One fetch attempt.
#[derive(Debug, Clone)]
pub struct FetchSpec {
    pub url: String,
    pub source_id: SourceId,
    /// Directory the audio file lands in.
    pub output_dir: PathBuf,
    /// Cookie bundle for the identity performing this attempt.
    pub cookie_file: Option<PathBuf>,
    /// Proxy URL, when the identity routes through one.
    pub proxy: Option<String>,
    /// Format selector passed to the downloader.
    pub format: String,
    pub timeout: Duration,
}

/// Smallest audio-only format, sorted by ascending bitrate then sample rate.
/// No codec preference; the sort picks.
pub const SMALLEST_AUDIO_FORMAT: &str = "worstaudio[vcodec=none]/worstaudio";

/// Sort key matching [`SMALLEST_AUDIO_FORMAT`].
pub const SMALLEST_AUDIO_SORT: &str = "+abr,+asr";

/// Successful fetch result with the platform metadata that came with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedMedia {
    pub audio_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_local_path: Option<PathBuf>,
}

/// Why a fetch attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailureKind {
    /// 401/403 or cookie rejection. Counts against the identity.
    Auth,
    /// Platform throttling.
    RateLimited,
    /// Attempt exceeded its deadline.
    Timeout,
    /// Video missing, private, or geo-blocked.
    Unavailable,
    /// Anything else.
    Other,
}

/// Structured fetch failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("fetch failed ({kind:?}): {message}")]
pub struct FetchFailure {
    pub kind: FetchFailureKind,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: FetchFailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn is_auth(&self) -> bool {
        self.kind == FetchFailureKind::Auth
    }
}

/// Downloader interface.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, spec: &FetchSpec) -> std::result::Result<FetchedMedia, FetchFailure>;

    /// Lightweight authenticated probe used to test an identity at startup.
    async fn probe_identity(
        &self,
        cookie_file: Option<&PathBuf>,
        proxy: Option<&str>,
    ) -> std::result::Result<(), FetchFailure>;
}
