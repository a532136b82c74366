//! Markdown artifacts
//!
//! Two files per source: a transcript and a summary. Both carry YAML
//! frontmatter and no H1 heading (renderers surface the frontmatter title).
//! Transcript paragraphs are grouped by consecutive same-speaker runs using
//! the miner's per-claim speaker labels; file names keep their spaces.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use tracing::info;

use quarry_core::{Claim, Segment, Source, SourceType, Timestamp};

use crate::db::Database;
use crate::StoreError;

/// Optional generated summary bodies. Sections render with a placeholder
/// note when absent.
#[derive(Debug, Clone, Default)]
pub struct SummaryContent {
    pub short_summary: Option<String>,
    pub long_summary: Option<String>,
}

#[derive(Clone)]
pub struct MarkdownWriter {
    db: Database,
    output_dir: PathBuf,
}

impl MarkdownWriter {
    pub fn new(db: Database, output_dir: impl Into<PathBuf>) -> Self {
        Self { db, output_dir: output_dir.into() }
    }

    /// Write (or overwrite) the transcript file and record it in
    /// `generated_files`.
    pub async fn write_transcript(
        &self,
        source: &Source,
        segments: &[Segment],
        claims: &[Claim],
    ) -> Result<PathBuf, StoreError> {
        let mut body = String::new();
        body.push_str(&frontmatter(source));

        if source.thumbnail_local_path.is_some() {
            if let Some(video_id) = video_id(source) {
                body.push_str(&format!("![Thumbnail](Thumbnails/{video_id}.jpg)\n\n"));
            }
        }

        for paragraph in speaker_paragraphs(segments, claims) {
            body.push_str(&paragraph);
            body.push_str("\n\n");
        }

        let path = self.artifact_path(source, None);
        self.persist(source, "transcript_md", &path, &body).await?;
        Ok(path)
    }

    /// Write (or overwrite) the summary file and record it.
    pub async fn write_summary(
        &self,
        source: &Source,
        claims: &[Claim],
        content: &SummaryContent,
    ) -> Result<PathBuf, StoreError> {
        let mut body = String::new();
        body.push_str(&frontmatter(source));

        body.push_str("## Source Information\n\n");
        push_info(&mut body, "Title", source.title.as_deref());
        push_info(&mut body, "Channel", source.uploader.as_deref());
        push_info(&mut body, "Date", source.upload_date.as_deref().map(human_date).as_deref());
        push_info(&mut body, "URL", source.url.as_deref());
        push_info(
            &mut body,
            "Duration",
            source
                .duration_seconds
                .map(|d| Timestamp::from_seconds(d).to_mmss())
                .as_deref(),
        );
        push_info(
            &mut body,
            "Description",
            source.description.as_deref().map(|d| clip(d, 500)).as_deref(),
        );
        if !source.tags.is_empty() {
            body.push_str(&format!("- **Tags**: {}\n", source.tags.join(", ")));
        }
        if !source.chapters.is_empty() {
            body.push_str("- **Chapters**:\n");
            for chapter in &source.chapters {
                body.push_str(&format!("  - [{}] {}\n", chapter.t0.to_mmss(), chapter.title));
            }
        }
        body.push('\n');

        body.push_str("## Summary\n\n");
        body.push_str(
            content
                .short_summary
                .as_deref()
                .unwrap_or("_No summary generated._"),
        );
        body.push_str("\n\n## Extended Summary\n\n");
        body.push_str(
            content
                .long_summary
                .as_deref()
                .unwrap_or("_No extended summary generated._"),
        );
        body.push_str("\n\n## Claims\n\n");

        for (i, claim) in claims.iter().enumerate() {
            body.push_str(&format!("{}. {}\n", i + 1, claim.canonical_text));
            let mut meta = vec![format!("Type: {}", claim.claim_type.as_str())];
            if let Some(tier) = claim.tier {
                meta.push(format!("Tier: {}", tier.as_str()));
            }
            if let Some(t) = claim.temporality {
                meta.push(format!(
                    "Temporality: {} ({:.2})",
                    t.temporality.as_str(),
                    t.confidence
                ));
            }
            if let Some(importance) = claim.importance() {
                meta.push(format!("importance: {importance:.1}"));
            }
            if let Some(dims) = claim.dimensions {
                meta.push(format!("specificity: {:.1}", dims.scope));
                meta.push(format!("verifiability: {:.1}", dims.verifiability));
            }
            body.push_str(&format!("   {}\n", meta.join(" | ")));
        }

        let path = self.artifact_path(source, Some("Summary"));
        self.persist(source, "summary_md", &path, &body).await?;
        Ok(path)
    }

    fn artifact_path(&self, source: &Source, suffix: Option<&str>) -> PathBuf {
        let title = source
            .title
            .clone()
            .unwrap_or_else(|| source.id.to_string());
        // Keep spaces; strip only what the filesystem cannot take
        let safe: String = title
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':' | '\0') { '-' } else { c })
            .collect();
        let name = match suffix {
            Some(suffix) => format!("{safe} {suffix}.md"),
            None => format!("{safe}.md"),
        };
        self.output_dir.join(name)
    }

    async fn persist(
        &self,
        source: &Source,
        file_type: &str,
        path: &Path,
        body: &str,
    ) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, body)?;
        sqlx::query(
            r#"INSERT INTO generated_files (source_id, file_type, path, created_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(source_id, file_type) DO UPDATE SET
                 path = excluded.path,
                 created_at = excluded.created_at"#,
        )
        .bind(source.id.as_str())
        .bind(file_type)
        .bind(path.to_string_lossy().as_ref())
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await?;
        info!(source = %source.id, file_type, path = %path.display(), "markdown artifact written");
        Ok(())
    }
}

fn video_id(source: &Source) -> Option<String> {
    match source.source_type {
        SourceType::Url => Some(source.id.to_string()),
        _ => None,
    }
}

fn frontmatter(source: &Source) -> String {
    let mut fm = String::from("---\n");
    fm.push_str(&format!(
        "title: \"{}\"\n",
        source.title.as_deref().unwrap_or("Untitled").replace('"', "\\\"")
    ));
    let (source_line, type_line) = match source.source_type {
        SourceType::Url => (source.url.clone().unwrap_or_default(), "YouTube"),
        SourceType::LocalAudio | SourceType::LocalVideo => ("Local Audio".to_string(), "Local Audio"),
        SourceType::Document => ("Document".to_string(), "Document"),
    };
    fm.push_str(&format!("source: \"{source_line}\"\n"));
    fm.push_str(&format!("source_type: \"{type_line}\"\n"));
    if let Some(video_id) = video_id(source) {
        fm.push_str(&format!("video_id: \"{video_id}\"\n"));
    }
    if let Some(uploader) = &source.uploader {
        fm.push_str(&format!("uploader: \"{}\"\n", uploader.replace('"', "\\\"")));
    }
    if let Some(date) = &source.upload_date {
        fm.push_str(&format!("upload_date: \"{}\"\n", human_date(date)));
    }
    if let Some(duration) = source.duration_seconds {
        fm.push_str(&format!(
            "duration: \"{}\"\n",
            Timestamp::from_seconds(duration).to_mmss()
        ));
    }
    fm.push_str("tags:\n");
    for tag in &source.tags {
        fm.push_str(&format!("  - \"{}\"\n", tag.replace('"', "\\\"")));
    }
    fm.push_str("categories: []\n");
    if let Some(description) = &source.description {
        fm.push_str(&format!(
            "description: \"{}\"\n",
            clip(description, 500).replace('"', "\\\"").replace('\n', " ")
        ));
    }
    fm.push_str("---\n\n");
    fm
}

/// Format a `YYYYMMDD` platform date for humans; anything else passes
/// through unchanged.
fn human_date(raw: &str) -> String {
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .map(|d| d.format("%B %-d, %Y").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn clip(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}

/// Group consecutive segments by inferred speaker. The speaker of a segment
/// is the speaker of any claim whose evidence overlaps it; the name is shown
/// once at the start of each run, not per segment.
fn speaker_paragraphs(segments: &[Segment], claims: &[Claim]) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current_speaker: Option<String> = None;
    let mut current_text: Vec<String> = Vec::new();

    let flush =
        |paragraphs: &mut Vec<String>, speaker: &Option<String>, text: &mut Vec<String>| {
            if text.is_empty() {
                return;
            }
            let joined = text.join(" ");
            match speaker {
                Some(name) => paragraphs.push(format!("**{name}**: {joined}")),
                None => paragraphs.push(joined),
            }
            text.clear();
        };

    for segment in segments {
        let speaker = speaker_for_segment(segment, claims);
        if speaker != current_speaker && !current_text.is_empty() {
            flush(&mut paragraphs, &current_speaker, &mut current_text);
        }
        current_speaker = speaker;
        current_text.push(segment.text.trim().to_string());
    }
    flush(&mut paragraphs, &current_speaker, &mut current_text);
    paragraphs
}

fn speaker_for_segment(segment: &Segment, claims: &[Claim]) -> Option<String> {
    claims.iter().find_map(|claim| {
        let speaker = claim.speaker.clone()?;
        let overlaps = claim.evidence.iter().any(|span| {
            span.t0.as_seconds() < segment.t1.as_seconds()
                && span.t1.as_seconds() > segment.t0.as_seconds()
        });
        overlaps.then_some(speaker)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{ClaimType, ContextType, EvidenceSpan, SourceId};

    fn segment(i: i64, t0: f64, t1: f64, text: &str) -> Segment {
        Segment {
            source_id: SourceId::new("md1"),
            segment_id: i,
            t0: Timestamp::from_seconds(t0),
            t1: Timestamp::from_seconds(t1),
            text: text.into(),
        }
    }

    fn claim_with_speaker(speaker: &str, t0: f64, t1: f64) -> Claim {
        let mut claim = Claim::new("c", SourceId::new("md1"), "x", ClaimType::Factual);
        claim.speaker = Some(speaker.into());
        claim.evidence.push(EvidenceSpan {
            sequence: 0,
            t0: Timestamp::from_seconds(t0),
            t1: Timestamp::from_seconds(t1),
            quote: "q".into(),
            context_text: None,
            context_type: ContextType::Exact,
        });
        claim
    }

    fn source_for_test() -> Source {
        let mut source = Source::new(SourceId::new("vidABC12345"), SourceType::Url);
        source.title = Some("A Long Talk About Rates".into());
        source.url = Some("https://www.youtube.com/watch?v=vidABC12345".into());
        source.uploader = Some("Finance Channel".into());
        source.upload_date = Some("20260115".into());
        source.duration_seconds = Some(754.0);
        source.tags = vec!["finance".into(), "rates".into()];
        source.thumbnail_local_path = Some("/thumbs/vidABC12345.jpg".into());
        source
    }

    #[tokio::test]
    async fn transcript_has_frontmatter_thumbnail_and_no_h1() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let source = source_for_test();
        // The generated_files row needs its source present
        crate::media::MediaStore::new(db.clone())
            .get_or_create_source(source.clone())
            .await
            .unwrap();
        let writer = MarkdownWriter::new(db, dir.path());

        let segments = vec![
            segment(0, 0.0, 10.0, "Welcome to the show."),
            segment(1, 10.0, 20.0, "Glad to be here."),
        ];
        let claims = vec![
            claim_with_speaker("Host", 0.0, 9.0),
            claim_with_speaker("Guest", 11.0, 19.0),
        ];

        let path = writer.write_transcript(&source, &segments, &claims).await.unwrap();
        let body = std::fs::read_to_string(&path).unwrap();

        assert!(body.starts_with("---\n"));
        assert!(body.contains("title: \"A Long Talk About Rates\""));
        assert!(body.contains("video_id: \"vidABC12345\""));
        assert!(body.contains("upload_date: \"January 15, 2026\""));
        assert!(body.contains("![Thumbnail](Thumbnails/vidABC12345.jpg)"));
        assert!(body.contains("**Host**: Welcome to the show."));
        assert!(body.contains("**Guest**: Glad to be here."));
        // No H1 in the body
        assert!(!body.lines().any(|l| l.starts_with("# ")));
        // Spaces preserved in the file name
        assert!(path.file_name().unwrap().to_string_lossy().contains(' '));
    }

    #[tokio::test]
    async fn summary_lists_claims_with_metadata_lines() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let source = source_for_test();
        crate::media::MediaStore::new(db.clone())
            .get_or_create_source(source.clone())
            .await
            .unwrap();
        let writer = MarkdownWriter::new(db, dir.path());

        let mut claim = claim_with_speaker("Host", 0.0, 5.0);
        claim.canonical_text = "Rates drive valuations.".into();
        claim.dimensions = Some(quarry_core::DimensionScores::new(8.0, 5.0, 6.0, 9.0, 7.0, 6.0));
        claim.tier = Some(quarry_core::Tier::B);
        claim.temporality = Some(quarry_core::TemporalityJudgment {
            temporality: quarry_core::Temporality::MediumTerm,
            confidence: 0.7,
        });
        claim.profile_scores = Some(quarry_core::ProfileScores {
            scores: vec![("scientist".into(), 7.2)],
        });

        let path = writer
            .write_summary(&source, &[claim], &SummaryContent::default())
            .await
            .unwrap();
        let body = std::fs::read_to_string(&path).unwrap();

        assert!(body.contains("## Source Information"));
        assert!(body.contains("1. Rates drive valuations."));
        assert!(body.contains("Type: factual | Tier: B | Temporality: medium-term (0.70)"));
        assert!(body.contains("importance: 7.2"));
        assert!(body.contains("verifiability: 9.0"));
    }

    #[tokio::test]
    async fn rewrite_updates_generated_files_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let source = source_for_test();
        crate::media::MediaStore::new(db.clone())
            .get_or_create_source(source.clone())
            .await
            .unwrap();
        let writer = MarkdownWriter::new(db.clone(), dir.path());

        writer.write_transcript(&source, &[], &[]).await.unwrap();
        let first: (String,) =
            sqlx::query_as("SELECT created_at FROM generated_files WHERE file_type = 'transcript_md'")
                .fetch_one(db.pool())
                .await
                .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        writer.write_transcript(&source, &[], &[]).await.unwrap();
        let second: (String,) =
            sqlx::query_as("SELECT created_at FROM generated_files WHERE file_type = 'transcript_md'")
                .fetch_one(db.pool())
                .await
                .unwrap();

        assert!(second.0 > first.0, "timestamp must move forward on overwrite");
        // Still one row per file type
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM generated_files")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[test]
    fn human_dates() {
        assert_eq!(human_date("20260115"), "January 15, 2026");
        assert_eq!(human_date("2026-01-15"), "2026-01-15");
    }

    #[test]
    fn speaker_runs_group_consecutive_segments() {
        let segments = vec![
            segment(0, 0.0, 10.0, "One."),
            segment(1, 10.0, 20.0, "Two."),
            segment(2, 20.0, 30.0, "Three."),
        ];
        // Host speaks over the first two segments
        let claims = vec![claim_with_speaker("Host", 0.0, 19.0)];
        let paragraphs = speaker_paragraphs(&segments, &claims);
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[0], "**Host**: One. Two.");
        assert_eq!(paragraphs[1], "Three.");
    }
}
