//! Event dispatcher
//!
//! [`Tracker`] is the context object hosts construct once at bootstrap and
//! share by handle. Each [`track_event`](Tracker::track_event) call:
//!
//! 1. awaits the shared one-shot initialization
//! 2. records a heartbeat
//! 3. builds the hit: envelope, page fields, items, attribution, device and
//!    caller parameters
//! 4. sends it once and reports a [`DispatchOutcome`]
//!
//! Delivery is best effort. Nothing here returns an error to the host or
//! retries a failed send.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, TrackerConfig};
use crate::device::DeviceInfo;
use crate::encoder::{self, EventParams, WireQuery, PAGE_LOCATION, PAGE_TITLE};
use crate::error::Result;
use crate::identity::{IdentityState, SessionManager};
use crate::store::{KeyValueStore, StorageKey};
use crate::transport::{HttpTransport, OutboundRequest, Transport};

/// Value of the `v` field
pub const PROTOCOL_VERSION: &str = "2";

/// Event name used by [`Tracker::log_page_view`]
pub const PAGE_VIEW_EVENT: &str = "page_view";

/// Header carrying the tag preview token
pub const PREVIEW_HEADER: &str = "x-gtm-server-preview";

/// What happened to one tracked event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Endpoint answered with a 2xx status
    Sent { status: u16 },
    /// Event was not delivered
    Dropped { reason: DropReason },
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchOutcome::Sent { .. })
    }
}

impl std::fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchOutcome::Sent { status } => write!(f, "sent (HTTP {})", status),
            DispatchOutcome::Dropped { reason } => write!(f, "dropped: {}", reason),
        }
    }
}

/// Why an event was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Event name was empty
    EmptyEventName,
    /// Request never got a response
    Transport(String),
    /// Endpoint answered with a non-2xx status
    Status(u16),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::EmptyEventName => f.write_str("empty event name"),
            DropReason::Transport(e) => write!(f, "{}", e),
            DropReason::Status(status) => write!(f, "HTTP {}", status),
        }
    }
}

/// Session-aware measurement-protocol tracker
pub struct Tracker {
    config: TrackerConfig,
    device: DeviceInfo,
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    identity: SessionManager,
    ready: OnceCell<()>,
}

impl Tracker {
    /// Create an uninitialized tracker using the system clock
    pub fn new(
        config: TrackerConfig,
        device: DeviceInfo,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            device,
            identity: SessionManager::new(Arc::clone(&store)),
            store,
            transport,
            clock: Arc::new(SystemClock),
            ready: OnceCell::new(),
        }
    }

    /// Create a tracker that sends over HTTP
    ///
    /// Returns an error if the tracker configuration is incomplete.
    pub fn from_config(config: &Config, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        config.tracker.validate()?;
        let transport = HttpTransport::new(&config.tracker)?;
        Ok(Self::new(
            config.tracker.clone(),
            DeviceInfo::detect(&config.device),
            store,
            Arc::new(transport),
        ))
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Initialize and hand out a shareable handle
    pub async fn bootstrap(self) -> Arc<Self> {
        self.ensure_ready().await;
        Arc::new(self)
    }

    /// Run initialization once; concurrent callers wait on the same run
    pub async fn ensure_ready(&self) {
        self.ready
            .get_or_init(|| async {
                self.identity.initialize(self.clock.now_millis()).await;
            })
            .await;
    }

    /// Whether initialization has completed
    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    /// Track an event
    ///
    /// Never fails: transport errors and non-2xx answers come back as
    /// [`DispatchOutcome::Dropped`].
    pub async fn track_event(&self, name: &str, params: EventParams) -> DispatchOutcome {
        if name.is_empty() {
            tracing::warn!("Refusing to track an event without a name");
            return DispatchOutcome::Dropped {
                reason: DropReason::EmptyEventName,
            };
        }

        self.ensure_ready().await;
        self.identity.heartbeat(self.clock.now_millis()).await;

        let identity = self.identity.take_for_event().await;
        let attribution_id = self.attribution_id().await;
        let request = self.build_request(name, &identity, attribution_id.as_deref(), params);

        tracing::debug!(event = %name, url = %request.url, "Sending event");
        self.send(name, &request).await
    }

    /// Track a screen view with a synthesized page location
    pub async fn log_page_view(&self, screen_name: &str) -> DispatchOutcome {
        let params = EventParams::new()
            .with(
                PAGE_LOCATION,
                format!("{}{}", self.config.page_url_prefix, screen_name),
            )
            .with(PAGE_TITLE, screen_name);
        self.track_event(PAGE_VIEW_EVENT, params).await
    }

    /// Set (login) or clear (logout, `None`) the user ID
    ///
    /// Leaves initialization to the next event, so the first visit and
    /// session start are still reported on it.
    pub async fn set_user_id(&self, user_id: Option<&str>) {
        self.identity.set_user_id(user_id).await;
    }

    /// Persist a click ID for later events; empty IDs are ignored
    pub async fn set_attribution_id(&self, click_id: &str) {
        if click_id.is_empty() {
            return;
        }
        match self
            .store
            .set(StorageKey::AttributionId.as_str(), click_id)
            .await
        {
            Ok(()) => tracing::info!(click_id = %click_id, "Attribution ID saved"),
            Err(e) => tracing::error!(error = %e, "Failed to save attribution ID"),
        }
    }

    /// Forget the stored click ID
    pub async fn clear_attribution_id(&self) {
        match self.store.remove(StorageKey::AttributionId.as_str()).await {
            Ok(()) => tracing::info!("Attribution ID cleared"),
            Err(e) => tracing::error!(error = %e, "Failed to clear attribution ID"),
        }
    }

    /// Stored click ID, if any
    pub async fn attribution_id(&self) -> Option<String> {
        match self.store.get(StorageKey::AttributionId.as_str()).await {
            Ok(id) => id.filter(|id| !id.is_empty()),
            Err(e) => {
                tracing::error!(error = %e, "Failed to read attribution ID");
                None
            }
        }
    }

    /// Current identity state, one-shot flags included
    pub async fn identity(&self) -> IdentityState {
        self.identity.snapshot().await
    }

    fn build_request(
        &self,
        name: &str,
        identity: &IdentityState,
        attribution_id: Option<&str>,
        params: EventParams,
    ) -> OutboundRequest {
        let mut query = WireQuery::new();
        query.push("v", PROTOCOL_VERSION);
        query.push(
            "tid",
            self.config.measurement_id.as_deref().unwrap_or_default(),
        );
        query.push("cid", identity.client_id_or_unknown());
        if let Some(uid) = identity.user_id() {
            query.push("uid", uid);
        }
        query.push("en", name);
        query.push("sid", identity.session_id_or_unknown());
        if identity.is_session_start {
            query.push("_ss", "1");
        }
        if identity.is_first_visit {
            query.push("_fv", "1");
        }
        if let Some(click_id) = attribution_id {
            query.push("ep.click_id", click_id);
        }

        let mut merged = self.device.to_params();
        merged.extend(params);
        encoder::encode_params(&merged, &mut query);

        if self.config.preview_enabled {
            query.push("_dbg", "1");
        }

        let endpoint = self.config.endpoint.as_deref().unwrap_or_default();
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        let url = format!("{}{}{}", endpoint, separator, query.encode());

        let mut headers = vec![("User-Agent".to_string(), self.config.user_agent.clone())];
        if let Some(token) = self.config.preview_token() {
            headers.push((PREVIEW_HEADER.to_string(), token.to_string()));
        }

        OutboundRequest { url, headers }
    }

    async fn send(&self, name: &str, request: &OutboundRequest) -> DispatchOutcome {
        match self.transport.send(request).await {
            Ok(status) if (200..300).contains(&status) => {
                tracing::debug!(event = %name, status, "Event sent");
                DispatchOutcome::Sent { status }
            }
            Ok(status) => {
                tracing::warn!(event = %name, status, "Endpoint rejected event");
                DispatchOutcome::Dropped {
                    reason: DropReason::Status(status),
                }
            }
            Err(e) => {
                tracing::error!(event = %name, error = %e, "Send failed");
                DispatchOutcome::Dropped {
                    reason: DropReason::Transport(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DeviceConfig;
    use crate::encoder::Item;
    use crate::store::MemoryStore;
    use crate::transport::RecordingTransport;

    const T0: i64 = 1_700_000_000_000;

    fn tracker_config() -> TrackerConfig {
        TrackerConfig {
            endpoint: Some("https://sgtm.example.com/mp/collect".to_string()),
            measurement_id: Some("G-TEST".to_string()),
            ..Default::default()
        }
    }

    fn device() -> DeviceInfo {
        DeviceInfo::detect(&DeviceConfig {
            os_name: Some("iOS".to_string()),
            os_version: Some("17.0".to_string()),
            device_model: Some("iPhone15,2".to_string()),
            ..Default::default()
        })
    }

    fn tracker_with(
        config: TrackerConfig,
        store: &MemoryStore,
        transport: &RecordingTransport,
    ) -> Tracker {
        Tracker::new(
            config,
            device(),
            Arc::new(store.clone()),
            Arc::new(transport.clone()),
        )
        .with_clock(Arc::new(ManualClock::new(T0)))
    }

    #[tokio::test]
    async fn test_first_event_carries_envelope_and_one_shot_flags() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::new();
        let tracker = tracker_with(tracker_config(), &store, &transport);

        let outcome = tracker.track_event("app_open", EventParams::new()).await;
        assert_eq!(outcome, DispatchOutcome::Sent { status: 204 });

        let req = transport.last().unwrap();
        assert!(req.url.starts_with("https://sgtm.example.com/mp/collect?v=2&tid=G-TEST&cid="));
        assert_eq!(req.param("cid"), store.peek("ga4_cid"));
        assert_eq!(req.param("en").as_deref(), Some("app_open"));
        assert_eq!(req.param("sid").as_deref(), Some("1700000000"));
        assert_eq!(req.param("_ss").as_deref(), Some("1"));
        assert_eq!(req.param("_fv").as_deref(), Some("1"));
        assert_eq!(req.param("uid"), None);
        assert_eq!(req.param("_dbg"), None);
        assert_eq!(req.param("ep.platform").as_deref(), Some("mobile_app"));
        assert_eq!(req.param("ep.os_name").as_deref(), Some("iOS"));
        assert_eq!(req.param("ep.os_version").as_deref(), Some("17.0"));
        assert_eq!(req.param("ep.device_model").as_deref(), Some("iPhone15,2"));
        assert_eq!(req.header("User-Agent"), Some(crate::config::DEFAULT_USER_AGENT));
        assert_eq!(req.header(PREVIEW_HEADER), None);

        tracker.track_event("second", EventParams::new()).await;
        let req = transport.last().unwrap();
        assert_eq!(req.param("_ss"), None);
        assert_eq!(req.param("_fv"), None);
    }

    #[tokio::test]
    async fn test_caller_params_override_device_params() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::new();
        let tracker = tracker_with(tracker_config(), &store, &transport);

        let params = EventParams::new()
            .with("platform", "tablet")
            .with("value", 12.5)
            .with("meta", serde_json::json!({"a": 1}));
        tracker.track_event("purchase", params).await;

        let pairs = transport.last().unwrap().query_pairs();
        let platforms: Vec<_> = pairs.iter().filter(|(k, _)| k == "ep.platform").collect();
        assert_eq!(platforms.len(), 1);
        assert_eq!(platforms[0].1, "tablet");

        let req = transport.last().unwrap();
        assert_eq!(req.param("ep.value").as_deref(), Some("12.5"));
        assert_eq!(req.param("ep.meta").as_deref(), Some(r#"{"a":1}"#));
    }

    #[tokio::test]
    async fn test_items_keep_literal_tildes() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::new();
        let tracker = tracker_with(tracker_config(), &store, &transport);

        let params = EventParams::new()
            .with("transaction_id", "T 1/2")
            .with_items(&[Item::new("A1").price(1299i64).quantity(2i64)]);
        tracker.track_event("purchase", params).await;

        let req = transport.last().unwrap();
        assert!(req.query().contains("pr1=idA1~pr1299~qt2"));
        assert!(req.query().contains("ep.transaction_id=T+1%2F2"));
        assert!(!req.query().contains("ep.items"));
    }

    #[tokio::test]
    async fn test_preview_mode_adds_debug_flag_and_header() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::new();
        let config = TrackerConfig {
            preview_enabled: true,
            preview_header: Some("ZW52LTV8".to_string()),
            ..tracker_config()
        };
        let tracker = tracker_with(config, &store, &transport);

        tracker.track_event("debug_me", EventParams::new()).await;
        let req = transport.last().unwrap();
        assert_eq!(req.param("_dbg").as_deref(), Some("1"));
        assert_eq!(req.header(PREVIEW_HEADER), Some("ZW52LTV8"));
        assert!(req.query().ends_with("_dbg=1"));
    }

    #[tokio::test]
    async fn test_preview_without_token_sends_no_header() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::new();
        let config = TrackerConfig {
            preview_enabled: true,
            ..tracker_config()
        };
        let tracker = tracker_with(config, &store, &transport);

        tracker.track_event("debug_me", EventParams::new()).await;
        let req = transport.last().unwrap();
        assert_eq!(req.param("_dbg").as_deref(), Some("1"));
        assert_eq!(req.header(PREVIEW_HEADER), None);
    }

    #[tokio::test]
    async fn test_non_2xx_is_dropped() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::with_status(503);
        let tracker = tracker_with(tracker_config(), &store, &transport);

        let outcome = tracker.track_event("x", EventParams::new()).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Dropped {
                reason: DropReason::Status(503)
            }
        );
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_event_name_is_dropped_without_sending() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::new();
        let tracker = tracker_with(tracker_config(), &store, &transport);

        let outcome = tracker.track_event("", EventParams::new()).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Dropped {
                reason: DropReason::EmptyEventName
            }
        );
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_page_view_uses_reserved_fields() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::new();
        let tracker = tracker_with(tracker_config(), &store, &transport);

        tracker.log_page_view("Home").await;
        let req = transport.last().unwrap();
        assert_eq!(req.param("en").as_deref(), Some("page_view"));
        assert_eq!(req.param("dl").as_deref(), Some("app://Home"));
        assert_eq!(req.param("dt").as_deref(), Some("Home"));
        assert_eq!(req.param("ep.page_location"), None);
        assert_eq!(req.param("ep.page_title"), None);
    }

    #[tokio::test]
    async fn test_user_id_is_sent_after_login() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::new();
        let tracker = tracker_with(tracker_config(), &store, &transport);

        tracker.set_user_id(Some("user-42")).await;
        tracker.track_event("login", EventParams::new()).await;
        assert_eq!(transport.last().unwrap().param("uid").as_deref(), Some("user-42"));

        tracker.set_user_id(None).await;
        tracker.track_event("logout", EventParams::new()).await;
        assert_eq!(transport.last().unwrap().param("uid"), None);
    }

    #[tokio::test]
    async fn test_login_before_first_event_keeps_one_shot_flags() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::new();
        let tracker = tracker_with(tracker_config(), &store, &transport);

        tracker.set_user_id(Some("user-42")).await;
        assert!(!tracker.is_ready());

        tracker.log_page_view("Home").await;
        let req = transport.last().unwrap();
        assert_eq!(req.param("uid").as_deref(), Some("user-42"));
        assert_eq!(req.param("_fv").as_deref(), Some("1"));
        assert_eq!(req.param("_ss").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_attribution_mutators() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::new();
        let tracker = tracker_with(tracker_config(), &store, &transport);

        tracker.set_attribution_id("").await;
        assert_eq!(tracker.attribution_id().await, None);

        tracker.set_attribution_id("XYZ").await;
        tracker.track_event("x", EventParams::new()).await;
        assert_eq!(transport.last().unwrap().param("ep.click_id").as_deref(), Some("XYZ"));

        tracker.clear_attribution_id().await;
        tracker.track_event("y", EventParams::new()).await;
        assert_eq!(transport.last().unwrap().param("ep.click_id"), None);
    }

    #[tokio::test]
    async fn test_endpoint_with_existing_query() {
        let store = MemoryStore::new();
        let transport = RecordingTransport::new();
        let config = TrackerConfig {
            endpoint: Some("https://sgtm.example.com/collect?src=app".to_string()),
            ..tracker_config()
        };
        let tracker = tracker_with(config, &store, &transport);

        tracker.track_event("x", EventParams::new()).await;
        let req = transport.last().unwrap();
        assert!(req.url.starts_with("https://sgtm.example.com/collect?src=app&v=2"));
    }

    #[test]
    fn test_from_config_requires_endpoint() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        assert!(Tracker::from_config(&Config::default(), Arc::clone(&store)).is_err());

        let config = Config {
            tracker: tracker_config(),
            ..Default::default()
        };
        assert!(Tracker::from_config(&config, store).is_ok());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(DispatchOutcome::Sent { status: 204 }.to_string(), "sent (HTTP 204)");
        assert_eq!(
            DispatchOutcome::Dropped {
                reason: DropReason::Status(500)
            }
            .to_string(),
            "dropped: HTTP 500"
        );
    }
}
