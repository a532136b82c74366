//! Core traits and types for the quarry knowledge pipeline
//!
//! This crate provides foundational types used across all other crates:
//! - Source / segment / claim / entity data model
//! - Timestamps (`MM:SS` canonical form)
//! - Stage tracking and job state types
//! - Evaluation score vectors and tiers
//! - Error envelope and severity taxonomy
//! - Core traits for pluggable backends (transcription, media fetching, LLM I/O logging)

pub mod error;
pub mod timestamp;
pub mod source;
pub mod segment;
pub mod claim;
pub mod entity;
pub mod scoring;
pub mod stage;
pub mod job;
pub mod llm_types;
pub mod traits;

// Re-exports from data model modules
pub use error::{Error, ErrorEnvelope, Result, Severity};
pub use timestamp::Timestamp;
pub use source::{Chapter, ContentType, Source, SourceId, SourceType};
pub use segment::{MiningWindow, Segment};
pub use claim::{
    Claim, ClaimType, ContextType, EvidenceSpan, Temporality, TemporalityJudgment, Tier,
};
pub use entity::{EntityEvidence, EntityKind, JargonTerm, MentalModel, Person};
pub use scoring::{DimensionScores, ProfileScores, DIMENSION_COUNT};
pub use stage::{Stage, StageEvent, StageState, StageStatus};
pub use job::{Job, JobRun, JobType, RunStatus};
pub use llm_types::{
    FinishReason, GenerateRequest, GenerateResponse, LlmRequestRecord, LlmResponseRecord, Message,
    Role, TokenUsage,
};

// Trait re-exports
pub use traits::{
    FetchFailure, FetchFailureKind, FetchSpec, FetchedMedia, LlmIoLog, MediaFetcher, NoopLlmIoLog,
    Transcriber, TranscriptionRequest, RawTranscript, TranscriptSegment, SMALLEST_AUDIO_FORMAT,
    SMALLEST_AUDIO_SORT,
};
