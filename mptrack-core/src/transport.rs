//! Outbound HTTP delivery of encoded hits
//!
//! A hit is a single POST with every field in the query string and an empty
//! body. [`Transport`] is the seam between the dispatcher and the network:
//! [`HttpTransport`] sends for real, [`RecordingTransport`] keeps requests in
//! memory for dry runs and tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::TrackerConfig;
use crate::error::{Error, Result};

/// Fully built request for one hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Endpoint plus encoded query string
    pub url: String,
    /// Header name/value pairs, in insertion order
    pub headers: Vec<(String, String)>,
}

impl OutboundRequest {
    /// Encoded query part of the URL (empty when there is none)
    pub fn query(&self) -> &str {
        self.url.split_once('?').map(|(_, q)| q).unwrap_or("")
    }

    /// Decoded query fields
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.query().as_bytes())
            .into_owned()
            .collect()
    }

    /// First decoded value of a query field
    pub fn param(&self, key: &str) -> Option<String> {
        self.query_pairs()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Header value, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Sends one request and reports the HTTP status
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<u16>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Build the HTTP client; no timeout unless `timeout_secs` is set
    pub fn new(config: &TrackerConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let http_client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<u16> {
        let mut builder = self.http_client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        Ok(response.status().as_u16())
    }
}

/// Transport that records requests instead of sending them
///
/// Clones share the same log.
#[derive(Debug, Clone)]
pub struct RecordingTransport {
    requests: Arc<Mutex<Vec<OutboundRequest>>>,
    status: u16,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::with_status(204)
    }
}

impl RecordingTransport {
    /// Records requests and answers 204
    pub fn new() -> Self {
        Self::default()
    }

    /// Records requests and answers `status`
    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            status,
        }
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Most recent request
    pub fn last(&self) -> Option<OutboundRequest> {
        self.requests().pop()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<u16> {
        self.requests
            .lock()
            .map_err(|_| Error::Transport("recording transport lock poisoned".to_string()))?
            .push(request.clone());
        Ok(self.status)
    }
}
