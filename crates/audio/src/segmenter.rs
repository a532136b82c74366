//! Mining-window segmentation
//!
//! Groups transcript segments into windows sized for one extraction call.
//! Windows are non-overlapping by default; a small overlap can be configured
//! when entity continuity across boundaries matters, with deduplication
//! handled downstream.

use quarry_core::{MiningWindow, Segment, Timestamp};

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Close a window once it reaches this many seconds, budget permitting.
    pub min_window_secs: f64,
    /// Hard ceiling on window length.
    pub max_window_secs: f64,
    /// Overlap between consecutive windows; 0 disables.
    pub overlap_secs: f64,
    /// Character budget bounding the miner prompt.
    pub char_budget: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_window_secs: 120.0,
            max_window_secs: 240.0,
            overlap_secs: 0.0,
            char_budget: 12_000,
        }
    }
}

impl SegmenterConfig {
    pub fn from_settings(settings: &quarry_config::MiningSettings) -> Self {
        Self {
            min_window_secs: settings.window_min_secs,
            max_window_secs: settings.window_max_secs,
            overlap_secs: settings.window_overlap_secs,
            char_budget: settings.window_char_budget,
        }
    }
}

pub struct Segmenter {
    config: SegmenterConfig,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    /// Partition ordered segments into mining windows.
    pub fn windows(&self, segments: &[Segment]) -> Vec<MiningWindow> {
        let mut windows = Vec::new();
        if segments.is_empty() {
            return windows;
        }

        let mut start = 0usize;
        while start < segments.len() {
            let window_t0 = segments[start].t0.as_seconds();
            let mut end = start;
            let mut chars = 0usize;

            while end < segments.len() {
                let seg = &segments[end];
                let line_len = seg.text.len() + 10;
                let duration = seg.t1.as_seconds() - window_t0;
                let over_budget = chars + line_len > self.config.char_budget;
                let over_time = duration > self.config.max_window_secs;
                // Always take at least one segment per window
                if end > start && (over_budget || over_time) {
                    break;
                }
                chars += line_len;
                end += 1;
                if duration >= self.config.min_window_secs && chars >= self.config.char_budget / 2 {
                    break;
                }
            }

            windows.push(self.build_window(segments, windows.len(), start, end));

            start = if self.config.overlap_secs > 0.0 && end < segments.len() {
                let resume_at = segments[end - 1].t1.as_seconds() - self.config.overlap_secs;
                // Walk back to the first segment still inside the overlap
                let mut s = end;
                while s > start + 1 && segments[s - 1].t0.as_seconds() >= resume_at {
                    s -= 1;
                }
                s
            } else {
                end
            };
        }

        windows
    }

    /// Windows over pre-extracted document text. Paragraphs are packed by
    /// the character budget; offsets are synthetic zero timestamps.
    pub fn windows_from_text(&self, text: &str) -> Vec<MiningWindow> {
        let mut windows = Vec::new();
        let mut current = String::new();
        let mut flush = |windows: &mut Vec<MiningWindow>, buf: &mut String| {
            if !buf.trim().is_empty() {
                let index = windows.len();
                windows.push(MiningWindow {
                    index,
                    t0: Timestamp::from_seconds(0.0),
                    t1: Timestamp::from_seconds(0.0),
                    text: std::mem::take(buf).trim().to_string(),
                    segment_start: index,
                    segment_end: index + 1,
                });
            } else {
                buf.clear();
            }
        };

        for paragraph in text.split("\n\n") {
            if current.len() + paragraph.len() > self.config.char_budget && !current.is_empty() {
                flush(&mut windows, &mut current);
            }
            current.push_str(paragraph);
            current.push_str("\n\n");
        }
        flush(&mut windows, &mut current);
        windows
    }

    fn build_window(
        &self,
        segments: &[Segment],
        index: usize,
        start: usize,
        end: usize,
    ) -> MiningWindow {
        let slice = &segments[start..end];
        let text = slice
            .iter()
            .map(|s| format!("[{}] {}", s.t0.to_mmss(), s.text))
            .collect::<Vec<_>>()
            .join("\n");
        MiningWindow {
            index,
            t0: slice[0].t0,
            t1: slice[slice.len() - 1].t1,
            text,
            segment_start: start,
            segment_end: end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::SourceId;

    fn segments(count: usize, secs_each: f64) -> Vec<Segment> {
        (0..count)
            .map(|i| Segment {
                source_id: SourceId::new("test"),
                segment_id: i as i64,
                t0: Timestamp::from_seconds(i as f64 * secs_each),
                t1: Timestamp::from_seconds((i + 1) as f64 * secs_each),
                text: format!("segment number {i} with a little bit of content"),
            })
            .collect()
    }

    fn segmenter(overlap: f64) -> Segmenter {
        Segmenter::new(SegmenterConfig {
            min_window_secs: 120.0,
            max_window_secs: 240.0,
            overlap_secs: overlap,
            char_budget: 12_000,
        })
    }

    #[test]
    fn empty_transcript_yields_no_windows() {
        assert!(segmenter(0.0).windows(&[]).is_empty());
    }

    #[test]
    fn windows_cover_all_segments_without_overlap() {
        // 60 segments x 10s = 600s -> expect ~3-5 windows of 2-4 minutes
        let segs = segments(60, 10.0);
        let windows = segmenter(0.0).windows(&segs);
        assert!(windows.len() >= 2, "got {}", windows.len());
        assert_eq!(windows[0].segment_start, 0);
        assert_eq!(windows.last().unwrap().segment_end, 60);
        // Contiguous coverage
        for pair in windows.windows(2) {
            assert_eq!(pair[0].segment_end, pair[1].segment_start);
        }
        // Every window respects the time ceiling
        for w in &windows {
            assert!(w.t1.as_seconds() - w.t0.as_seconds() <= 250.0);
        }
    }

    #[test]
    fn windows_carry_absolute_timestamps_and_marks() {
        let segs = segments(30, 10.0);
        let windows = segmenter(0.0).windows(&segs);
        assert_eq!(windows[0].t0.as_seconds(), 0.0);
        assert!(windows[0].text.starts_with("[00:00] segment number 0"));
        if windows.len() > 1 {
            assert!(windows[1].t0.as_seconds() > 0.0);
        }
    }

    #[test]
    fn overlap_repeats_boundary_segments() {
        let segs = segments(60, 10.0);
        let windows = segmenter(10.0).windows(&segs);
        assert!(windows.len() >= 2);
        // Second window starts at or before the first window's end
        assert!(windows[1].segment_start <= windows[0].segment_end);
        assert!(windows[1].segment_start >= windows[0].segment_end - 2);
    }

    #[test]
    fn tiny_transcript_is_one_window() {
        let segs = segments(3, 5.0);
        let windows = segmenter(0.0).windows(&segs);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].segment_count(), 3);
    }

    #[test]
    fn document_text_packs_by_budget() {
        let para = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(40);
        let text = format!("{para}\n\n{para}\n\n{para}");
        let segmenter = Segmenter::new(SegmenterConfig { char_budget: 3000, ..Default::default() });
        let windows = segmenter.windows_from_text(&text);
        assert!(windows.len() >= 2);
        for (i, w) in windows.iter().enumerate() {
            assert_eq!(w.index, i);
            assert!(!w.text.is_empty());
        }
    }
}
