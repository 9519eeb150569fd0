//! Where the poller gets its snapshots from.

use async_trait::async_trait;
use presence_core::PresenceSnapshot;
use thiserror::Error;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {0}")]
    Status(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid status URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self) -> Result<PresenceSnapshot, WatchError>;
}

pub struct HttpStatusSource {
    http: reqwest::Client,
    url: String,
}

impl HttpStatusSource {
    /// Every request is abandoned after `timeout`, so an unresponsive server
    /// surfaces as a network error.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, WatchError> {
        let url = url.into();
        reqwest::Url::parse(&url).map_err(|err| WatchError::InvalidUrl {
            url: url.clone(),
            reason: err.to_string(),
        })?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WatchError::Network(e.to_string()))?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self) -> Result<PresenceSnapshot, WatchError> {
        debug!(event = "status_fetch", url = %self.url);
        let response = self
            .http
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| WatchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WatchError::Status(status.to_string()));
        }

        response
            .json::<PresenceSnapshot>()
            .await
            .map_err(|e| WatchError::Decode(e.to_string()))
    }
}
