//! Transcript quality validation and repetition cleanup
//!
//! Two post-transcription passes:
//! - English transcripts must contain at least 10% recognized English words,
//!   catching wrong-language and degenerate outputs.
//! - Runs of identical consecutive segments (3 or more) are collapsed; the
//!   engine emits these when it latches onto silence or music.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use quarry_core::TranscriptSegment;

use crate::AudioError;

/// Minimum recognized-English ratio for English transcripts.
const MIN_ENGLISH_RATIO: f64 = 0.10;
/// Identical consecutive segments at or above this count are a repetition run.
const REPETITION_RUN: usize = 3;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z']+").expect("static pattern"));

static ENGLISH_LEXICON: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "be", "to", "of", "and", "a", "in", "that", "have", "i", "it", "for", "not", "on",
        "with", "he", "as", "you", "do", "at", "this", "but", "his", "by", "from", "they", "we",
        "say", "her", "she", "or", "an", "will", "my", "one", "all", "would", "there", "their",
        "what", "so", "up", "out", "if", "about", "who", "get", "which", "go", "me", "when",
        "make", "can", "like", "time", "no", "just", "him", "know", "take", "people", "into",
        "year", "your", "good", "some", "could", "them", "see", "other", "than", "then", "now",
        "look", "only", "come", "its", "over", "think", "also", "back", "after", "use", "two",
        "how", "our", "work", "first", "well", "way", "even", "new", "want", "because", "any",
        "these", "give", "day", "most", "us", "is", "was", "are", "were", "been", "has", "had",
        "did", "said", "got", "going", "really", "very", "more", "much", "where", "why", "here",
        "thing", "things", "something", "right", "yeah", "okay", "mean", "kind", "lot", "actually",
    ]
    .into_iter()
    .collect()
});

/// Fraction of words recognized as common English.
pub fn english_word_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut hits = 0usize;
    for m in WORD_RE.find_iter(text) {
        total += 1;
        if ENGLISH_LEXICON.contains(m.as_str().to_lowercase().as_str()) {
            hits += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Fail English transcripts with too few recognized words. Other languages
/// short-circuit: no English-word heuristic is run for them.
pub fn validate_quality(segments: &[TranscriptSegment], language: &str) -> Result<(), AudioError> {
    let lang = language.to_lowercase();
    if lang != "en" && lang != "english" {
        return Ok(());
    }

    let text: String = segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");
    let ratio = english_word_ratio(&text);
    if ratio < MIN_ENGLISH_RATIO {
        return Err(AudioError::QualityGate { language: lang, ratio: ratio * 100.0 });
    }
    Ok(())
}

/// How much of the transcript was repetition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepetitionSeverity {
    Light,
    Moderate,
    Heavy,
}

#[derive(Debug, Clone)]
pub struct RepetitionReport {
    /// Number of collapsed runs.
    pub runs: usize,
    /// Segments dropped across all runs.
    pub removed_segments: usize,
    pub severity: RepetitionSeverity,
}

impl RepetitionReport {
    fn classify(removed: usize, total: usize) -> RepetitionSeverity {
        if total == 0 {
            return RepetitionSeverity::Light;
        }
        let fraction = removed as f64 / total as f64;
        if fraction < 0.05 {
            RepetitionSeverity::Light
        } else if fraction < 0.20 {
            RepetitionSeverity::Moderate
        } else {
            RepetitionSeverity::Heavy
        }
    }
}

/// Collapse runs of identical consecutive segments, keeping the first of
/// each run. Identity is trimmed, case-insensitive text.
pub fn collapse_repetitions(
    segments: Vec<TranscriptSegment>,
) -> (Vec<TranscriptSegment>, RepetitionReport) {
    let total = segments.len();
    let mut out: Vec<TranscriptSegment> = Vec::with_capacity(total);
    let mut runs = 0usize;
    let mut removed = 0usize;

    let mut i = 0;
    while i < segments.len() {
        let key = segments[i].text.trim().to_lowercase();
        let mut j = i + 1;
        while j < segments.len() && segments[j].text.trim().to_lowercase() == key {
            j += 1;
        }
        let run_len = j - i;
        if run_len >= REPETITION_RUN {
            // Keep the first occurrence, stretch its end over the run
            let mut kept = segments[i].clone();
            kept.t1 = segments[j - 1].t1;
            out.push(kept);
            runs += 1;
            removed += run_len - 1;
        } else {
            out.extend_from_slice(&segments[i..j]);
        }
        i = j;
    }

    let report = RepetitionReport {
        runs,
        removed_segments: removed,
        severity: RepetitionReport::classify(removed, total),
    };
    (out, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(t0: f64, t1: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment { t0, t1, text: text.to_string() }
    }

    #[test]
    fn english_text_passes() {
        let segments = vec![seg(0.0, 2.0, "so the thing is that we know this will work")];
        assert!(validate_quality(&segments, "en").is_ok());
    }

    #[test]
    fn gibberish_fails_for_english() {
        let segments = vec![seg(0.0, 2.0, "zzxqv frulm grintz vopak shleem drazzle")];
        let err = validate_quality(&segments, "en").unwrap_err();
        assert!(matches!(err, AudioError::QualityGate { .. }));
        assert_eq!(err.code(), "transcription_quality_error");
    }

    #[test]
    fn non_english_short_circuits() {
        // German text has almost no lexicon hits; must still pass
        let segments = vec![seg(0.0, 2.0, "das ist ein ziemlich langer deutscher satz")];
        assert!(validate_quality(&segments, "de").is_ok());
    }

    #[test]
    fn triple_repeat_collapses() {
        let segments = vec![
            seg(0.0, 1.0, "Thanks for watching."),
            seg(1.0, 2.0, "thanks for watching. "),
            seg(2.0, 3.0, "Thanks for watching."),
            seg(3.0, 4.0, "Now the content."),
        ];
        let (out, report) = collapse_repetitions(segments);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].t1, 3.0);
        assert_eq!(report.runs, 1);
        assert_eq!(report.removed_segments, 2);
    }

    #[test]
    fn double_repeat_is_kept() {
        let segments = vec![
            seg(0.0, 1.0, "again"),
            seg(1.0, 2.0, "again"),
            seg(2.0, 3.0, "done"),
        ];
        let (out, report) = collapse_repetitions(segments);
        assert_eq!(out.len(), 3);
        assert_eq!(report.runs, 0);
    }

    #[test]
    fn severity_scales_with_removed_fraction() {
        // 8 of 10 segments removed in one run
        let mut segments: Vec<_> = (0..9).map(|i| seg(i as f64, i as f64 + 1.0, "loop")).collect();
        segments.push(seg(9.0, 10.0, "end"));
        let (_, report) = collapse_repetitions(segments);
        assert_eq!(report.severity, RepetitionSeverity::Heavy);
    }
}
