//! Audio preparation and transcription
//!
//! This crate owns the path from an acquired media file to mining windows:
//! - Normalization to canonical PCM WAV with long-silence removal
//! - Subprocess transcription producing timestamped segments
//! - Transcript quality validation and repetition cleanup
//! - Grouping segments into mining windows

pub mod normalize;
pub mod transcribe;
pub mod quality;
pub mod segmenter;

pub use normalize::{NormalizedAudio, Normalizer, NormalizerConfig};
pub use transcribe::{WhisperTranscriber, WhisperTranscriberConfig};
pub use quality::{
    collapse_repetitions, english_word_ratio, validate_quality, RepetitionReport,
    RepetitionSeverity,
};
pub use segmenter::{Segmenter, SegmenterConfig};

use thiserror::Error;

/// Audio-layer errors.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("subprocess failed: {0}")]
    Subprocess(String),

    #[error("transcript quality below threshold: {ratio:.1}% recognized words for language {language}")]
    QualityGate { language: String, ratio: f64 },

    #[error("engine produced no output: {0}")]
    MissingOutput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wav error: {0}")]
    Wav(String),
}

impl AudioError {
    pub fn code(&self) -> &'static str {
        match self {
            AudioError::QualityGate { .. } => "transcription_quality_error",
            AudioError::MissingOutput(_) => "transcription_partial",
            AudioError::Decode(_) | AudioError::Wav(_) => "audio_decode_failed",
            AudioError::Subprocess(_) => "audio_subprocess_failed",
            AudioError::Io(_) => "audio_io_failed",
        }
    }
}

impl From<AudioError> for quarry_core::Error {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::QualityGate { .. } | AudioError::MissingOutput(_) => {
                quarry_core::Error::Transcription(err.to_string())
            }
            other => quarry_core::Error::Audio(other.to_string()),
        }
    }
}

impl From<hound::Error> for AudioError {
    fn from(err: hound::Error) -> Self {
        AudioError::Wav(err.to_string())
    }
}
