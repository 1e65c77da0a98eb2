//! Offline-download service client
//!
//! The organizer and monitor only see the [DownloadClient] trait.
//! [HttpDownloadClient] talks to a JSON API with a session cookie; its wire
//! shape is an adapter detail.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, header};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::RemoteConfig;
use crate::services::rate_limiter::{
    RateLimitConfig, RateLimitedClient, ResponseExt, RetryConfig, retry_async,
};

/// Remote job state as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl RemoteStatus {
    /// Map the service's numeric status: 2 is done, negative is failed
    pub fn from_code(code: i64, percent_done: f64) -> Self {
        match code {
            2 => RemoteStatus::Completed,
            c if c < 0 => RemoteStatus::Failed,
            _ if percent_done > 0.0 => RemoteStatus::Downloading,
            1 => RemoteStatus::Downloading,
            _ => RemoteStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteTask {
    pub id: String,
    pub name: String,
    pub status: RemoteStatus,
    pub percent_done: f64,
    pub error: Option<String>,
}

/// One file inside a finished remote job
#[derive(Debug, Clone, Serialize)]
pub struct RemoteFile {
    /// Location of the file in the local download tree
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transient: network failure, throttling, 5xx
    #[error("remote service unavailable: {0}")]
    Unavailable(String),

    #[error("remote service rejected the request: {0}")]
    Rejected(String),

    #[error("remote task '{0}' not found")]
    NotFound(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

#[async_trait]
pub trait DownloadClient: Send + Sync {
    /// Submit a magnet link, returning the remote task id when the service reports one
    async fn submit(&self, magnet: &str, download_path: &Path) -> Result<Option<String>, RemoteError>;

    async fn list_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError>;

    async fn list_files(&self, task_id: &str) -> Result<Vec<RemoteFile>, RemoteError>;

    async fn remove_task(&self, task_id: &str) -> Result<(), RemoteError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    state: bool,
    #[serde(default)]
    error_msg: Option<String>,
    #[serde(default = "Option::default")]
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct WireTask {
    info_hash: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    percent_done: f64,
    #[serde(default)]
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    #[serde(rename = "n")]
    name: String,
    #[serde(rename = "s", default)]
    size: u64,
    /// Entries without a file id are directories
    #[serde(rename = "fid", default)]
    file_id: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    #[serde(default)]
    info_hash: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    url: &'a str,
    save_path: &'a str,
}

/// HTTP/JSON adapter for the offline-download service
pub struct HttpDownloadClient {
    http: RateLimitedClient,
    base_url: String,
    cookies: String,
    retry: RetryConfig,
}

impl HttpDownloadClient {
    pub fn new(config: &RemoteConfig) -> anyhow::Result<Self> {
        let http = RateLimitedClient::new(
            "offline",
            RateLimitConfig::default(),
            Duration::from_secs(config.request_timeout_secs.max(1)),
        )
        .context("Failed to build offline-download HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            cookies: config.cookies.clone(),
            retry: RetryConfig::default(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// One request/response exchange, classifying failures for retry
    async fn exchange<B, T>(&self, method: Method, url: &str, body: Option<&B>) -> Result<T, RemoteError>
    where
        B: Serialize + Sync,
        T: serde::de::DeserializeOwned + Send,
    {
        let mut request = self
            .http
            .request(method, url)
            .await
            .header(header::COOKIE, &self.cookies);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        if response.is_transient_error() {
            return Err(RemoteError::Unavailable(format!("HTTP {}", response.status())));
        }
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(url.to_string()));
        }
        if !response.status().is_success() {
            return Err(RemoteError::Rejected(format!("HTTP {}", response.status())));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| RemoteError::Unavailable(format!("malformed response: {}", e)))?;

        if !envelope.state {
            return Err(RemoteError::Rejected(
                envelope.error_msg.unwrap_or_else(|| "request refused".to_string()),
            ));
        }
        match envelope.data {
            Some(data) => Ok(data),
            // Endpoints without a payload still have to decode as "nothing"
            None => serde_json::from_value(serde_json::Value::Null)
                .map_err(|_| RemoteError::Rejected("response carried no data".to_string())),
        }
    }

    async fn call<B, T>(&self, method: Method, url: &str, body: Option<&B>, name: &str) -> Result<T, RemoteError>
    where
        B: Serialize + Sync,
        T: serde::de::DeserializeOwned + Send,
    {
        retry_async(
            || self.exchange(method.clone(), url, body),
            RemoteError::is_transient,
            &self.retry,
            name,
        )
        .await
    }
}

#[async_trait]
impl DownloadClient for HttpDownloadClient {
    async fn submit(&self, magnet: &str, download_path: &Path) -> Result<Option<String>, RemoteError> {
        let save_path = download_path.to_string_lossy();
        let body = SubmitRequest {
            url: magnet,
            save_path: &save_path,
        };
        let data: SubmitData = self
            .call(Method::POST, &self.url("/offline/tasks"), Some(&body), "offline.submit")
            .await?;

        info!(save_path = %save_path, info_hash = ?data.info_hash, "Submitted offline task");
        Ok(data.info_hash.map(|h| h.to_ascii_lowercase()))
    }

    async fn list_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        let tasks: Vec<WireTask> = self
            .call::<(), _>(Method::GET, &self.url("/offline/tasks"), None, "offline.list_tasks")
            .await?;

        debug!(count = tasks.len(), "Fetched remote task listing");
        Ok(tasks
            .into_iter()
            .map(|t| RemoteTask {
                id: t.info_hash.to_ascii_lowercase(),
                status: RemoteStatus::from_code(t.status, t.percent_done),
                name: t.name,
                percent_done: t.percent_done,
                error: t.error_msg.filter(|e| !e.is_empty()),
            })
            .collect())
    }

    async fn list_files(&self, task_id: &str) -> Result<Vec<RemoteFile>, RemoteError> {
        let url = self.url(&format!("/offline/tasks/{}/files", urlencoding::encode(task_id)));
        let files: Vec<WireFile> = self
            .call::<(), _>(Method::GET, &url, None, "offline.list_files")
            .await?;

        Ok(files
            .into_iter()
            .filter(|f| f.file_id.is_some())
            .map(|f| RemoteFile {
                path: f
                    .path
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(&f.name)),
                name: f.name,
                size: f.size,
            })
            .collect())
    }

    async fn remove_task(&self, task_id: &str) -> Result<(), RemoteError> {
        let url = self.url(&format!("/offline/tasks/{}", urlencoding::encode(task_id)));
        let _: Option<serde_json::Value> = self
            .call::<(), _>(Method::DELETE, &url, None, "offline.remove_task")
            .await?;

        info!(task_id = %task_id, "Removed remote offline task");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RemoteStatus::from_code(2, 100.0), RemoteStatus::Completed);
        assert_eq!(RemoteStatus::from_code(-1, 10.0), RemoteStatus::Failed);
        assert_eq!(RemoteStatus::from_code(1, 42.0), RemoteStatus::Downloading);
        assert_eq!(RemoteStatus::from_code(0, 0.0), RemoteStatus::Pending);
        assert_eq!(RemoteStatus::from_code(0, 5.0), RemoteStatus::Downloading);
    }

    #[test]
    fn test_wire_file_listing_skips_directories() {
        let json = r#"{
            "state": true,
            "data": [
                {"n": "ABC-123.mp4", "s": 1048576, "fid": "1", "path": "/dl/ABC-123.mp4"},
                {"n": "extras", "s": 0}
            ]
        }"#;
        let envelope: Envelope<Vec<WireFile>> = serde_json::from_str(json).unwrap();
        let files = envelope.data.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files.iter().filter(|f| f.file_id.is_some()).count(), 1);
    }

    #[test]
    fn test_envelope_without_data() {
        let envelope: Envelope<Option<serde_json::Value>> =
            serde_json::from_str(r#"{"state": true}"#).unwrap();
        assert!(envelope.state);
        assert!(envelope.data.is_none());

        let refused: Envelope<Vec<WireTask>> =
            serde_json::from_str(r#"{"state": false, "error_msg": "login required"}"#).unwrap();
        assert!(!refused.state);
        assert_eq!(refused.error_msg.as_deref(), Some("login required"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Unavailable("timeout".to_string()).is_transient());
        assert!(!RemoteError::Rejected("bad".to_string()).is_transient());
    }
}
