//! Download archive
//!
//! Newline-delimited `<platform> <video_id>` entries, authoritative for
//! "already acquired" — but only after reconciliation against the
//! filesystem. An archive entry whose audio file is missing or truncated is
//! dropped so the URL can be retried.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::AcquireError;

/// Audio files smaller than this are treated as failed downloads.
pub const MIN_AUDIO_BYTES: u64 = 10 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArchiveEntry {
    pub platform: String,
    pub video_id: String,
}

/// File-backed archive of acquired video ids.
pub struct DownloadArchive {
    path: PathBuf,
}

impl DownloadArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<BTreeSet<ArchiveEntry>, AcquireError> {
        if !self.path.exists() {
            return Ok(BTreeSet::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(raw
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                match (parts.next(), parts.next()) {
                    (Some(platform), Some(id)) => Some(ArchiveEntry {
                        platform: platform.to_string(),
                        video_id: id.to_string(),
                    }),
                    _ => None,
                }
            })
            .collect())
    }

    pub fn contains(&self, video_id: &str) -> Result<bool, AcquireError> {
        Ok(self.load()?.iter().any(|e| e.video_id == video_id))
    }

    pub fn append(&self, platform: &str, video_id: &str) -> Result<(), AcquireError> {
        let mut entries = self.load()?;
        entries.insert(ArchiveEntry {
            platform: platform.to_string(),
            video_id: video_id.to_string(),
        });
        self.write(&entries)
    }

    pub fn remove(&self, video_id: &str) -> Result<(), AcquireError> {
        let mut entries = self.load()?;
        entries.retain(|e| e.video_id != video_id);
        self.write(&entries)
    }

    fn write(&self, entries: &BTreeSet<ArchiveEntry>) -> Result<(), AcquireError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let body: String = entries
            .iter()
            .map(|e| format!("{} {}\n", e.platform, e.video_id))
            .collect();
        std::fs::write(&self.path, body)?;
        Ok(())
    }

    /// Locate a valid audio file for `video_id` in `audio_dir`: the file
    /// name must contain the id and the size must be at least 10 KiB.
    pub fn find_valid_audio(audio_dir: &Path, video_id: &str) -> Option<PathBuf> {
        let entries = std::fs::read_dir(audio_dir).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.contains(video_id) {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if meta.is_file() && meta.len() >= MIN_AUDIO_BYTES {
                    return Some(entry.path());
                }
            }
        }
        None
    }

    /// Reconcile the archive with the filesystem: drop entries whose audio
    /// file is gone or too small. Returns the removed video ids.
    pub fn validate(&self, audio_dir: &Path) -> Result<Vec<String>, AcquireError> {
        let entries = self.load()?;
        let mut kept = BTreeSet::new();
        let mut removed = Vec::new();

        for entry in entries {
            if Self::find_valid_audio(audio_dir, &entry.video_id).is_some() {
                kept.insert(entry);
            } else {
                warn!(video_id = %entry.video_id, "archive entry has no valid audio file, dropping");
                removed.push(entry.video_id);
            }
        }

        if !removed.is_empty() {
            self.write(&kept)?;
        }
        debug!(kept = kept.len(), removed = removed.len(), "archive validated");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(dir: &Path, name: &str, bytes: usize) {
        std::fs::write(dir.join(name), vec![0u8; bytes]).unwrap();
    }

    #[test]
    fn append_and_contains_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = DownloadArchive::new(dir.path().join("download_archive.txt"));
        archive.append("youtube", "abc123def45").unwrap();
        assert!(archive.contains("abc123def45").unwrap());
        assert!(!archive.contains("other").unwrap());
        // Duplicate appends collapse
        archive.append("youtube", "abc123def45").unwrap();
        assert_eq!(archive.load().unwrap().len(), 1);
    }

    #[test]
    fn validate_drops_entries_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let audio_dir = dir.path().join("audio");
        std::fs::create_dir_all(&audio_dir).unwrap();
        let archive = DownloadArchive::new(dir.path().join("archive.txt"));

        archive.append("youtube", "keepme12345").unwrap();
        archive.append("youtube", "gone1234567").unwrap();
        archive.append("youtube", "tiny1234567").unwrap();

        write_file(&audio_dir, "keepme12345.opus", 20 * 1024);
        write_file(&audio_dir, "tiny1234567.opus", 512);

        let removed = archive.validate(&audio_dir).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&"gone1234567".to_string()));
        assert!(removed.contains(&"tiny1234567".to_string()));
        assert!(archive.contains("keepme12345").unwrap());
        assert!(!archive.contains("tiny1234567").unwrap());
    }

    #[test]
    fn find_valid_audio_respects_size_floor() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "vid12345678.m4a", 512);
        assert!(DownloadArchive::find_valid_audio(dir.path(), "vid12345678").is_none());
        write_file(dir.path(), "vid12345678.m4a", (MIN_AUDIO_BYTES + 1) as usize);
        assert!(DownloadArchive::find_valid_audio(dir.path(), "vid12345678").is_some());
    }

    #[test]
    fn missing_archive_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let archive = DownloadArchive::new(dir.path().join("nope.txt"));
        assert!(archive.load().unwrap().is_empty());
    }
}
