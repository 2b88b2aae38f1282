//! HTTP client for the audiobook server.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::{AudiobookApi, SourceError};

#[derive(Debug, Deserialize)]
struct MediaProgress {
    #[serde(rename = "currentTime", default)]
    current_time: f64,
}

#[derive(Debug, Serialize)]
struct ProgressUpdate {
    #[serde(rename = "currentTime")]
    current_time: f64,
}

#[derive(Debug, Deserialize)]
struct LibraryItem {
    #[serde(default)]
    media: Media,
}

#[derive(Debug, Default, Deserialize)]
struct Media {
    #[serde(rename = "audioFiles", default)]
    audio_files: Vec<AudioFile>,
}

#[derive(Debug, Deserialize)]
struct AudioFile {
    metadata: AudioFileMetadata,
}

#[derive(Debug, Deserialize)]
struct AudioFileMetadata {
    path: PathBuf,
}

/// Token-authenticated client for the audiobook server API.
#[derive(Debug, Clone)]
pub struct AudiobookClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl AudiobookClient {
    pub fn new(base_url: String, token: String) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl AudiobookApi for AudiobookClient {
    async fn check_connection(&self) -> bool {
        match self.http.get(self.url("/ping")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn get_progress(&self, item_id: &str) -> Result<f64, SourceError> {
        let endpoint = self.url(&format!("/api/me/progress/{item_id}"));
        let resp = self
            .http
            .get(&endpoint)
            .bearer_auth(&self.token)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            // never listened yet
            return Ok(0.0);
        }
        if !resp.status().is_success() {
            return Err(SourceError::Status {
                status: resp.status().as_u16(),
                endpoint,
            });
        }
        let progress: MediaProgress = resp.json().await?;
        debug!(item_id, seconds = progress.current_time, "audiobook progress read");
        Ok(progress.current_time)
    }

    async fn update_progress(&self, item_id: &str, seconds: f64) -> Result<(), SourceError> {
        let endpoint = self.url(&format!("/api/me/progress/{item_id}"));
        let resp = self
            .http
            .patch(&endpoint)
            .bearer_auth(&self.token)
            .json(&ProgressUpdate {
                current_time: seconds,
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SourceError::Status {
                status: resp.status().as_u16(),
                endpoint,
            });
        }
        Ok(())
    }

    async fn audio_files(&self, item_id: &str) -> Result<Vec<PathBuf>, SourceError> {
        let endpoint = self.url(&format!("/api/items/{item_id}?expanded=1"));
        let resp = self
            .http
            .get(&endpoint)
            .bearer_auth(&self.token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SourceError::Status {
                status: resp.status().as_u16(),
                endpoint,
            });
        }
        let item: LibraryItem = resp.json().await?;
        Ok(item
            .media
            .audio_files
            .into_iter()
            .map(|f| f.metadata.path)
            .collect())
    }
}
