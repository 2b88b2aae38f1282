//! Transcript-related type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// One recognized stretch of speech with its time interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}

/// Transcript artifact errors
#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("transcript artifact not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("transcript artifact unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("transcript artifact malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("transcript contains no segments")]
    Empty,
}

/// Transcriber collaborator errors
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("transcription backend failed: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
