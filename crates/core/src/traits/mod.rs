//! Trait seams for pluggable backends

pub mod speech;
pub mod fetch;
pub mod iolog;

pub use speech::{RawTranscript, Transcriber, TranscriptSegment, TranscriptionRequest};
pub use fetch::{
    FetchFailure, FetchFailureKind, FetchSpec, FetchedMedia, MediaFetcher, SMALLEST_AUDIO_FORMAT,
    SMALLEST_AUDIO_SORT,
};
pub use iolog::{LlmIoLog, NoopLlmIoLog};
