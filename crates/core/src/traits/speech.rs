//! Transcription trait
//!
//! Implementations produce ordered timestamped segments with no speaker
//! labels. Speaker attribution happens downstream in the miner.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::Result;

/// Transcription request for one normalized audio file.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    /// Path to canonical PCM WAV audio.
    pub audio_path: PathBuf,
    /// Model size, e.g. `medium`.
    pub model_size: String,
    /// Explicit language code (`en`, `de`). `None` opts into auto-detection,
    /// which callers should avoid unless deliberate.
    pub language: Option<String>,
    /// Context prompt reducing domain drift: first tags or the document title.
    pub initial_prompt: Option<String>,
}

impl TranscriptionRequest {
    pub fn new(audio_path: impl Into<PathBuf>) -> Self {
        Self {
            audio_path: audio_path.into(),
            model_size: "medium".to_string(),
            language: Some("en".to_string()),
            initial_prompt: None,
        }
    }
}

/// One raw output segment from the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start, in seconds.
    pub t0: f64,
    /// End, in seconds.
    pub t1: f64,
    pub text: String,
}

/// Engine output before quality validation and cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTranscript {
    pub segments: Vec<TranscriptSegment>,
    /// Language the engine detected or was told.
    pub language: String,
}

/// Speech-to-text engine interface.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, request: &TranscriptionRequest) -> Result<RawTranscript>;

    /// Engine name for logging.
    fn engine_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTranscriber;

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, _request: &TranscriptionRequest) -> Result<RawTranscript> {
            Ok(RawTranscript {
                segments: vec![TranscriptSegment { t0: 0.0, t1: 2.5, text: "hello there".into() }],
                language: "en".into(),
            })
        }

        fn engine_name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn mock_transcriber_round_trip() {
        let t = FixedTranscriber;
        let out = t
            .transcribe(&TranscriptionRequest::new("/tmp/a.wav"))
            .await
            .unwrap();
        assert_eq!(out.segments.len(), 1);
        assert_eq!(out.language, "en");
    }

    #[test]
    fn request_defaults_to_explicit_english() {
        let req = TranscriptionRequest::new("/tmp/a.wav");
        assert_eq!(req.language.as_deref(), Some("en"));
        assert_eq!(req.model_size, "medium");
    }
}
