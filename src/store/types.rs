//! Store-related type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Lifecycle state of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    /// Waiting for transcription and index priming.
    Pending,
    /// Waiting for an externally produced transcript artifact to appear.
    PendingTranscript,
    /// A job is running for this mapping right now.
    Processing,
    /// Reconciled every cycle.
    Active,
    /// Last job attempt failed; requeued on the next job tick.
    FailedRetry,
    /// Unrecoverable (for example, no audio files exist).
    Failed,
    /// Marked at startup when a job was interrupted by a crash.
    Crashed,
}

/// User-created link between one audiobook and one ebook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    /// Audiobook server item id; unique key of the registry.
    pub audiobook_id: String,
    /// Content hash of the ebook, used as the sync service document id.
    pub ebook_doc_id: String,
    /// Ebook filename, resolved under the books directory.
    pub ebook_file: String,
    /// Display title.
    pub title: String,
    /// Path of the transcript artifact, once produced.
    pub transcript_ref: Option<PathBuf>,
    pub status: MappingStatus,
}

/// Last reconciled triple plus auxiliary cursors for one mapping.
///
/// The invariant after any successful cycle: the stored triple equals what
/// was observed or written during that cycle, so the next cycle never sees
/// our own write as a change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconState {
    pub audio_seconds: f64,
    pub ebook_fraction: f64,
    pub readalong_fraction: f64,
    /// Wall clock of the last persisted update, unix seconds.
    pub last_updated: f64,
    /// Char offset matching the committed ebook fraction; tie-breaker for
    /// sub-threshold percentage drift.
    pub ebook_char_cursor: u64,
}

impl Default for ReconState {
    fn default() -> Self {
        Self {
            audio_seconds: 0.0,
            ebook_fraction: 0.0,
            readalong_fraction: 0.0,
            last_updated: 0.0,
            ebook_char_cursor: 0,
        }
    }
}

/// Store persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
