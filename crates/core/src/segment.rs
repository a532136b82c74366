//! Transcript segments and mining windows
//!
//! Segments carry no speaker field. Speaker attribution is a per-claim
//! inference made by the miner from textual cues.

use serde::{Deserialize, Serialize};

use crate::{SourceId, Timestamp};

/// One timestamped transcript fragment, ordered within its source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub source_id: SourceId,
    /// Position within the source, starting at 0.
    pub segment_id: i64,
    pub t0: Timestamp,
    pub t1: Timestamp,
    pub text: String,
}

/// A group of consecutive segments sent to the miner in one extraction call.
/// Windows carry absolute timestamps so evidence spans can be anchored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningWindow {
    /// Window position within the source, starting at 0.
    pub index: usize,
    pub t0: Timestamp,
    pub t1: Timestamp,
    /// Concatenated segment text, one line per segment prefixed with its
    /// `[MM:SS]` start mark.
    pub text: String,
    /// Indices of the first and one-past-last segment in this window.
    pub segment_start: usize,
    pub segment_end: usize,
}

impl MiningWindow {
    pub fn segment_count(&self) -> usize {
        self.segment_end.saturating_sub(self.segment_start)
    }
}
