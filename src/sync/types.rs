//! Reconciliation-related type definitions

use thiserror::Error;

use crate::ebook::EbookError;
use crate::store::{MappingStatus, StoreError};
use crate::transcript::TranscriptError;

/// Change-detection thresholds. All configurable; defaults match the
/// shipped configuration.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Seconds the audiobook position must move to count as a change.
    pub audio_seconds: f64,
    /// Fraction either ebook-side position must move to count as a change.
    pub ebook_fraction: f64,
    /// Char distance that escalates a sub-threshold ebook fraction move.
    pub char_window: u64,
    /// Tolerated backwards move before a change is treated as a regression.
    pub regression: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            audio_seconds: 60.0,
            ebook_fraction: 0.01,
            char_window: 2000,
            regression: 0.05,
        }
    }
}

/// One cycle's raw readings from the three authorities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub audio_seconds: f64,
    pub ebook_fraction: f64,
    pub readalong_fraction: f64,
}

/// The three progress authorities, in conflict priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Audiobook,
    EbookSync,
    Readalong,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Audiobook => write!(f, "audiobook"),
            Source::EbookSync => write!(f, "ebook-sync"),
            Source::Readalong => write!(f, "read-along"),
        }
    }
}

/// Which sources crossed their change threshold this cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub audiobook: bool,
    pub ebook_sync: bool,
    pub readalong: bool,
}

impl ChangeSet {
    pub fn any(&self) -> bool {
        self.audiobook || self.ebook_sync || self.readalong
    }

    pub fn count(&self) -> usize {
        usize::from(self.audiobook) + usize::from(self.ebook_sync) + usize::from(self.readalong)
    }

    /// Conflict resolution: the audiobook clock is the most objective
    /// signal, the sync fraction is semi-symbolic, the read-along snapshot
    /// least trusted.
    pub fn winner(&self) -> Option<Source> {
        if self.audiobook {
            Some(Source::Audiobook)
        } else if self.ebook_sync {
            Some(Source::EbookSync)
        } else if self.readalong {
            Some(Source::Readalong)
        } else {
            None
        }
    }
}

/// Typed outcome of reconciling one mapping, selected step by step so the
/// loop's behavior stays directly testable.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Nothing moved.
    Idle,
    /// Sub-threshold drift accepted into stored state without propagating.
    Absorbed,
    /// One source won and its position was written to the other two.
    Propagated { source: Source },
    /// A backwards move beyond tolerance blocked all writes.
    RegressionBlocked { source: Source },
    /// Translation or a write failed; stored state snapped to the observed
    /// values so the next cycle starts quiescent.
    Snapped {
        source: Source,
        reason: &'static str,
    },
    /// A transport read failed; state untouched, retried next cycle.
    Skipped { reason: String },
    /// A required artifact is missing; the mapping went back to a pending
    /// state.
    Deferred { status: MappingStatus },
}

/// Reconciliation errors that cannot be expressed as an outcome.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transcript(#[from] TranscriptError),

    #[error(transparent)]
    Ebook(#[from] EbookError),
}
