//! File-backed, time-ordered transcript index.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::matching::{collapse_whitespace, FuzzyMatcher};
use crate::transcript::types::{Segment, TranscriptError};

/// Serialized shape of the artifact on disk.
#[derive(Debug, Serialize, Deserialize)]
struct Artifact {
    segments: Vec<Segment>,
}

/// Time-ordered segments of recognized text for one mapping.
///
/// Immutable once built. Also holds the concatenation of all segment texts
/// with per-segment char offsets so fuzzy search can run over the whole
/// transcript and map a hit back to a timestamp.
#[derive(Debug, Clone)]
pub struct TranscriptIndex {
    segments: Vec<Segment>,
    joined: String,
    offsets: Vec<usize>,
    duration: f64,
}

impl TranscriptIndex {
    /// Build an index from raw segments. Segments are sorted by start time
    /// and their texts whitespace-collapsed; empty segments are dropped.
    pub fn from_segments(segments: Vec<Segment>) -> Result<Self, TranscriptError> {
        let mut segments: Vec<Segment> = segments
            .into_iter()
            .map(|s| Segment {
                start_time: s.start_time,
                end_time: s.end_time.max(s.start_time),
                text: collapse_whitespace(&s.text),
            })
            .filter(|s| !s.text.is_empty())
            .collect();
        if segments.is_empty() {
            return Err(TranscriptError::Empty);
        }
        segments.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

        let mut joined = String::new();
        let mut offsets = Vec::with_capacity(segments.len());
        let mut offset = 0usize;
        for seg in &segments {
            if !joined.is_empty() {
                joined.push(' ');
                offset += 1;
            }
            offsets.push(offset);
            joined.push_str(&seg.text);
            offset += seg.text.chars().count();
        }
        let duration = segments
            .iter()
            .map(|s| s.end_time)
            .fold(0.0f64, f64::max);

        Ok(Self {
            segments,
            joined,
            offsets,
            duration,
        })
    }

    /// Load the artifact produced by a transcriber collaborator.
    pub fn load(path: &Path) -> Result<Self, TranscriptError> {
        if !path.exists() {
            return Err(TranscriptError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = fs::read_to_string(path)?;
        let artifact: Artifact = serde_json::from_str(&raw)?;
        Self::from_segments(artifact.segments)
    }

    /// Persist as the on-disk artifact shape (write-temp-then-rename).
    pub fn save(&self, path: &Path) -> Result<(), TranscriptError> {
        let artifact = Artifact {
            segments: self.segments.clone(),
        };
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&artifact)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Total duration in seconds (largest segment end time).
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Text of the segment whose interval contains `t`.
    ///
    /// A `t` inside a silence gap resolves to the nearer neighbour; values
    /// before the first segment or after the last clamp to those segments.
    pub fn text_at_time(&self, t: f64) -> Option<&str> {
        let idx = self
            .segments
            .partition_point(|s| s.start_time <= t);
        if idx == 0 {
            return self.segments.first().map(|s| s.text.as_str());
        }
        let before = &self.segments[idx - 1];
        if t <= before.end_time {
            return Some(&before.text);
        }
        match self.segments.get(idx) {
            // silence gap: pick the nearer edge
            Some(after) if (after.start_time - t) < (t - before.end_time) => {
                Some(&after.text)
            }
            Some(_) => Some(&before.text),
            None => Some(&before.text),
        }
    }

    /// Locate `query` in the transcript and return the start time of the
    /// segment containing the match midpoint.
    pub fn time_for_text(&self, matcher: &FuzzyMatcher, query: &str) -> Option<f64> {
        let span = matcher.find(query, &self.joined)?;
        let mid = span.midpoint();
        let idx = self.offsets.partition_point(|&o| o <= mid).saturating_sub(1);
        Some(self.segments[idx].start_time)
    }
}
