//! Sources: one acquired media item
//!
//! A source id is deterministic so the same video or file can never be
//! acquired twice: URL-backed sources use the platform video id, local files
//! and documents use a truncated content-path hash.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::Timestamp;

/// What kind of media a source is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Url,
    LocalAudio,
    LocalVideo,
    Document,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Url => "url",
            SourceType::LocalAudio => "local_audio",
            SourceType::LocalVideo => "local_video",
            SourceType::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "url" => Some(SourceType::Url),
            "local_audio" => Some(SourceType::LocalAudio),
            "local_video" => Some(SourceType::LocalVideo),
            "document" => Some(SourceType::Document),
            _ => None,
        }
    }
}

/// Content variant used to select the miner prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    TranscriptOwn,
    TranscriptThirdParty,
    Document,
}

static VIDEO_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"[?&]v=([A-Za-z0-9_-]{11})",
        r"youtu\.be/([A-Za-z0-9_-]{11})",
        r"/shorts/([A-Za-z0-9_-]{11})",
        r"/embed/([A-Za-z0-9_-]{11})",
        r"/live/([A-Za-z0-9_-]{11})",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

/// Stable, deterministic identifier for a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    /// Extract the platform video id from a URL. Returns `None` for URLs
    /// that carry no recognizable id (playlists, channels).
    pub fn from_url(url: &str) -> Option<Self> {
        VIDEO_ID_PATTERNS
            .iter()
            .find_map(|re| re.captures(url))
            .map(|c| Self(c[1].to_string()))
    }

    /// Path-hash id for a local media file.
    pub fn from_path(path: &Path) -> Self {
        Self(format!("local_{}", path_digest(path)))
    }

    /// Path-hash id for a document.
    pub fn from_document_path(path: &Path) -> Self {
        Self(format!("doc_{}", path_digest(path)))
    }

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn path_digest(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chapter marker carried over from platform metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub t0: Timestamp,
    pub t1: Timestamp,
}

/// One acquired media item. Created on first reference, never deleted by the
/// pipeline itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
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
    pub thumbnail_local_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_file_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Source {
    pub fn new(id: SourceId, source_type: SourceType) -> Self {
        Self {
            id,
            source_type,
            url: None,
            file_path: None,
            title: None,
            duration_seconds: None,
            uploader: None,
            upload_date: None,
            description: None,
            tags: Vec::new(),
            chapters: Vec::new(),
            thumbnail_local_path: None,
            checksum: None,
            audio_file_path: None,
            created_at: Utc::now(),
        }
    }

    /// Merge non-null attributes from `other` into self. The id and an
    /// existing `audio_file_path` are never overwritten unless `other`
    /// explicitly carries a new path.
    pub fn merge_from(&mut self, other: &Source) {
        macro_rules! take_if_some {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field.clone();
                }
            };
        }
        take_if_some!(url);
        take_if_some!(file_path);
        take_if_some!(title);
        take_if_some!(duration_seconds);
        take_if_some!(uploader);
        take_if_some!(upload_date);
        take_if_some!(description);
        take_if_some!(thumbnail_local_path);
        take_if_some!(checksum);
        take_if_some!(audio_file_path);
        if !other.tags.is_empty() {
            self.tags = other.tags.clone();
        }
        if !other.chapters.is_empty() {
            self.chapters = other.chapters.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn video_id_from_common_url_shapes() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?t=5",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/watch?list=PLx&v=dQw4w9WgXcQ",
        ] {
            assert_eq!(
                SourceId::from_url(url).unwrap().as_str(),
                "dQw4w9WgXcQ",
                "failed for {url}"
            );
        }
    }

    #[test]
    fn no_id_for_channel_urls() {
        assert!(SourceId::from_url("https://www.youtube.com/@somechannel").is_none());
    }

    #[test]
    fn path_ids_are_deterministic_and_prefixed() {
        let p = PathBuf::from("/media/short_audio_multi.mp3");
        let a = SourceId::from_path(&p);
        let b = SourceId::from_path(&p);
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("local_"));
        assert!(SourceId::from_document_path(&p).as_str().starts_with("doc_"));
    }

    #[test]
    fn merge_keeps_existing_audio_path() {
        let id = SourceId::new("abc");
        let mut existing = Source::new(id.clone(), SourceType::Url);
        existing.audio_file_path = Some("/out/abc.opus".into());

        let mut update = Source::new(id, SourceType::Url);
        update.title = Some("Better title".into());
        existing.merge_from(&update);

        assert_eq!(existing.title.as_deref(), Some("Better title"));
        assert_eq!(existing.audio_file_path.as_deref(), Some("/out/abc.opus"));
    }
}
