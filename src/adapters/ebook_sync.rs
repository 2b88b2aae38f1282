//! HTTP client for the ebook sync service.
//!
//! The service keys documents by content hash and authenticates with
//! username plus hashed-key headers. Progress is a fraction together with
//! an XPath-like position string, which we derive from the locator.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::{EbookSyncApi, SourceError};
use crate::ebook::Locator;

const DEVICE_NAME: &str = "abridge";

#[derive(Debug, Deserialize)]
struct ProgressDoc {
    #[serde(default)]
    percentage: f64,
}

#[derive(Debug, Serialize)]
struct ProgressPut<'a> {
    document: &'a str,
    percentage: f64,
    progress: String,
    device: &'a str,
    device_id: &'a str,
}

/// Client for the ebook sync service.
#[derive(Debug, Clone)]
pub struct EbookSyncClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    key_hash: String,
    device_id: String,
}

impl EbookSyncClient {
    pub fn new(base_url: String, username: String, password: &str) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        let key_hash = format!("{:x}", md5::compute(password.as_bytes()));
        let device_id = format!("{:x}", md5::compute(DEVICE_NAME.as_bytes()));
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            key_hash,
            device_id,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header("x-auth-user", &self.username)
            .header("x-auth-key", &self.key_hash)
            .header("accept", "application/vnd.koreader.v1+json")
    }
}

#[async_trait]
impl EbookSyncApi for EbookSyncClient {
    async fn check_connection(&self) -> bool {
        match self
            .request(reqwest::Method::GET, "/users/auth")
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn get_progress(&self, doc_id: &str) -> Result<f64, SourceError> {
        let path = format!("/syncs/progress/{doc_id}");
        let resp = self.request(reqwest::Method::GET, &path).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(0.0);
        }
        if !resp.status().is_success() {
            return Err(SourceError::Status {
                status: resp.status().as_u16(),
                endpoint: path,
            });
        }
        let doc: ProgressDoc = resp.json().await?;
        debug!(doc_id, fraction = doc.percentage, "ebook sync progress read");
        Ok(doc.percentage)
    }

    async fn update_progress(
        &self,
        doc_id: &str,
        fraction: f64,
        locator: &Locator,
    ) -> Result<(), SourceError> {
        let body = ProgressPut {
            document: doc_id,
            percentage: fraction,
            progress: locator.to_string(),
            device: DEVICE_NAME,
            device_id: &self.device_id,
        };
        let resp = self
            .request(reqwest::Method::PUT, "/syncs/progress")
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SourceError::Status {
                status: resp.status().as_u16(),
                endpoint: "/syncs/progress".to_string(),
            });
        }
        Ok(())
    }
}
