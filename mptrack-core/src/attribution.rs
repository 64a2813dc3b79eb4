//! Deep-link attribution capture
//!
//! Watches the URLs the host was opened with and stores any `click_id` query
//! parameter as the attribution ID, which the tracker then attaches to every
//! later event as `ep.click_id`.
//!
//! Two sources feed it:
//! - the launch URL, if the process was cold-started from a link
//! - a channel of "URL opened" events for the rest of the process lifetime
//!
//! The last link wins; there is no dedup. Malformed URLs are logged and
//! ignored.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::{Error, Result};
use crate::tracker::Tracker;

/// Query parameter carrying the click identifier
pub const CLICK_ID_PARAM: &str = "click_id";

/// Extract a non-empty `click_id` from a URL
///
/// Custom schemes (`app://open?click_id=X`) are accepted. Returns
/// [`Error::InvalidUrl`] when the string does not parse as a URL.
pub fn extract_click_id(raw: &str) -> Result<Option<String>> {
    let url = Url::parse(raw.trim()).map_err(|e| Error::InvalidUrl(format!("{}: {}", raw, e)))?;

    Ok(url
        .query_pairs()
        .find(|(key, _)| key == CLICK_ID_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty()))
}

/// Routes incoming links into the tracker's attribution ID
#[derive(Clone)]
pub struct AttributionCapture {
    tracker: Arc<Tracker>,
}

impl AttributionCapture {
    pub fn new(tracker: Arc<Tracker>) -> Self {
        Self { tracker }
    }

    /// Process one URL; returns the click ID that was stored, if any
    pub async fn handle_url(&self, url: &str) -> Option<String> {
        tracing::debug!(url = %url, "Received URL");

        match extract_click_id(url) {
            Ok(Some(click_id)) => {
                tracing::info!(click_id = %click_id, "Found click_id");
                self.tracker.set_attribution_id(&click_id).await;
                Some(click_id)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!(error = %e, "Ignoring unparseable URL");
                None
            }
        }
    }

    /// Process the cold-start launch URL, if there was one
    pub async fn capture_initial(&self, initial_url: Option<&str>) -> Option<String> {
        match initial_url {
            Some(url) => self.handle_url(url).await,
            None => None,
        }
    }

    /// Process every URL received on `urls` until the sender side closes
    pub fn spawn_listener(&self, mut urls: mpsc::Receiver<String>) -> JoinHandle<()> {
        let capture = self.clone();
        tokio::spawn(async move {
            while let Some(url) = urls.recv().await {
                capture.handle_url(&url).await;
            }
            tracing::debug!("URL listener stopped");
        })
    }

    /// Capture the launch URL, then listen for later ones
    pub async fn start(
        &self,
        initial_url: Option<&str>,
        urls: mpsc::Receiver<String>,
    ) -> JoinHandle<()> {
        self.capture_initial(initial_url).await;
        self.spawn_listener(urls)
    }
}
