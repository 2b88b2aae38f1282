//! Narrow read/write contracts to the three progress authorities
//!
//! Each adapter wraps its transport (HTTP for the audiobook server and the
//! ebook sync service, SQLite for the read-along database) behind a small
//! async trait so the reconciliation engine owns an injected bundle of
//! capabilities rather than process-wide clients.

pub mod audiobook;
pub mod ebook_sync;
pub mod readalong;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::ebook::Locator;

pub use audiobook::AudiobookClient;
pub use ebook_sync::EbookSyncClient;
pub use readalong::ReadalongStore;

/// Transport failures, typed so the engine can treat them uniformly as
/// "skip this mapping this tick".
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response status {status} from {endpoint}")]
    Status { status: u16, endpoint: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("malformed payload: {0}")]
    Payload(String),
}

/// A read-along position row, optionally carrying a precise anchor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadalongPosition {
    pub fraction: Option<f64>,
    pub timestamp_ms: i64,
    /// Container path of the sub-document the reader is inside.
    pub href: Option<String>,
    /// Sentence-level element id inside that sub-document.
    pub fragment_id: Option<String>,
}

/// Audiobook progress authority. Positions are seconds of playback.
#[async_trait]
pub trait AudiobookApi: Send + Sync {
    async fn check_connection(&self) -> bool;

    async fn get_progress(&self, item_id: &str) -> Result<f64, SourceError>;

    async fn update_progress(&self, item_id: &str, seconds: f64) -> Result<(), SourceError>;

    /// Library paths of the item's audio files, for the transcriber.
    async fn audio_files(&self, item_id: &str) -> Result<Vec<PathBuf>, SourceError>;
}

/// Ebook sync authority. Positions are fractions plus a locator anchor.
#[async_trait]
pub trait EbookSyncApi: Send + Sync {
    async fn check_connection(&self) -> bool;

    async fn get_progress(&self, doc_id: &str) -> Result<f64, SourceError>;

    async fn update_progress(
        &self,
        doc_id: &str,
        fraction: f64,
        locator: &Locator,
    ) -> Result<(), SourceError>;
}

/// Read-along database. Positions are fractions with the app's own
/// timestamps; writes must apply the leapfrog rule.
#[async_trait]
pub trait ReadalongDb: Send + Sync {
    async fn check_connection(&self) -> bool;

    /// `(None, 0)` when the book has no position rows.
    async fn get_progress(&self, ebook_file: &str) -> Result<(Option<f64>, i64), SourceError>;

    async fn get_progress_with_anchor(
        &self,
        ebook_file: &str,
    ) -> Result<ReadalongPosition, SourceError>;

    /// Returns whether a row was actually written.
    async fn update_progress(
        &self,
        ebook_file: &str,
        fraction: f64,
        source_ts_s: f64,
    ) -> Result<bool, SourceError>;
}
