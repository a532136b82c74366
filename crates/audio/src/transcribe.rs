//! Subprocess transcription engine
//!
//! Drives a whisper.cpp-compatible CLI with JSON output and maps its
//! segments onto [`RawTranscript`]. The engine produces no speaker labels.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use quarry_core::{RawTranscript, Result, Transcriber, TranscriptSegment, TranscriptionRequest};

use crate::AudioError;

#[derive(Debug, Clone)]
pub struct WhisperTranscriberConfig {
    pub binary_path: PathBuf,
    /// Directory containing `ggml-<size>.bin` model files.
    pub model_dir: PathBuf,
    pub use_gpu: bool,
}

impl Default for WhisperTranscriberConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("whisper-cli"),
            model_dir: PathBuf::from("models"),
            use_gpu: false,
        }
    }
}

/// Whisper-family subprocess transcriber.
pub struct WhisperTranscriber {
    config: WhisperTranscriberConfig,
}

impl WhisperTranscriber {
    pub fn new(config: WhisperTranscriberConfig) -> Self {
        Self { config }
    }

    fn model_path(&self, size: &str) -> PathBuf {
        self.config.model_dir.join(format!("ggml-{size}.bin"))
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, request: &TranscriptionRequest) -> Result<RawTranscript> {
        let out_dir = tempfile::tempdir().map_err(AudioError::Io)?;
        let out_base = out_dir.path().join("transcript");

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg("-m")
            .arg(self.model_path(&request.model_size))
            .arg("-f")
            .arg(&request.audio_path)
            .arg("-oj")
            .arg("-of")
            .arg(&out_base)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // Language is explicit; "auto" only reaches here when the caller
        // opted in deliberately.
        match &request.language {
            Some(code) => {
                cmd.args(["-l", code]);
            }
            None => {
                cmd.args(["-l", "auto"]);
            }
        }

        if let Some(prompt) = &request.initial_prompt {
            cmd.arg("--prompt").arg(prompt);
        }
        if !self.config.use_gpu {
            cmd.arg("-ng");
        }

        debug!(audio = %request.audio_path.display(), model = %request.model_size, "starting transcription");

        let output = cmd
            .output()
            .await
            .map_err(|e| AudioError::Subprocess(format!("transcriber spawn: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AudioError::Subprocess(format!(
                "transcriber exited with {}: {}",
                output.status,
                stderr.chars().take(500).collect::<String>()
            ))
            .into());
        }

        let json_path = out_base.with_extension("json");
        let raw = tokio::fs::read_to_string(&json_path)
            .await
            .map_err(|_| AudioError::MissingOutput(json_path.display().to_string()))?;

        let parsed: WhisperJson = serde_json::from_str(&raw)
            .map_err(|e| AudioError::MissingOutput(format!("unparseable engine output: {e}")))?;

        let transcript = parsed.into_raw_transcript(request.language.as_deref());
        info!(
            segments = transcript.segments.len(),
            language = %transcript.language,
            "transcription complete"
        );
        Ok(transcript)
    }

    fn engine_name(&self) -> &str {
        "whisper-cli"
    }
}

// whisper.cpp JSON output shapes

#[derive(Debug, Deserialize)]
struct WhisperJson {
    #[serde(default)]
    result: Option<WhisperResult>,
    #[serde(default)]
    transcription: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperResult {
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    offsets: WhisperOffsets,
    text: String,
}

#[derive(Debug, Deserialize)]
struct WhisperOffsets {
    /// Milliseconds.
    from: u64,
    to: u64,
}

impl WhisperJson {
    fn into_raw_transcript(self, requested_language: Option<&str>) -> RawTranscript {
        let language = self
            .result
            .and_then(|r| r.language)
            .or_else(|| requested_language.map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());

        let segments = self
            .transcription
            .into_iter()
            .filter_map(|s| {
                let text = s.text.trim().to_string();
                if text.is_empty() {
                    return None;
                }
                Some(TranscriptSegment {
                    t0: s.offsets.from as f64 / 1000.0,
                    t1: s.offsets.to as f64 / 1000.0,
                    text,
                })
            })
            .collect();

        RawTranscript { segments, language }
    }
}
