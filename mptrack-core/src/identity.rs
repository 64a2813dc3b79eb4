//! Identity & session state
//!
//! Owns the client ID, user ID, session ID and the two one-shot flags
//! (`first_visit`, `session_start`). State is loaded from the durable store once
//! per tracker lifetime by [`SessionManager::initialize`] and mutated in place
//! by every tracked event afterwards.
//!
//! ## Session rules
//!
//! - A session expires when more than [`SESSION_TIMEOUT_MS`] has passed since
//!   the last heartbeat, or when no heartbeat was ever recorded.
//! - Expiry is evaluated only at initialization. A long-lived process keeps
//!   its session no matter how long it idles.
//! - Session IDs are whole seconds since the epoch.
//!
//! Store failures never escape this module: they are logged and the manager
//! continues with whatever it could load.

use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::{KeyValueStore, StorageKey};

/// Inactivity window after which a new session starts (30 minutes)
pub const SESSION_TIMEOUT_MS: i64 = 30 * 60 * 1000;

/// Substituted on the wire for a missing client or session ID
pub const UNKNOWN: &str = "unknown";

/// In-memory identity state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityState {
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub is_first_visit: bool,
    pub is_session_start: bool,
}

impl IdentityState {
    /// Client ID, or `"unknown"` in degraded mode
    pub fn client_id_or_unknown(&self) -> &str {
        non_empty(self.client_id.as_deref()).unwrap_or(UNKNOWN)
    }

    /// Session ID, or `"unknown"` in degraded mode
    pub fn session_id_or_unknown(&self) -> &str {
        non_empty(self.session_id.as_deref()).unwrap_or(UNKNOWN)
    }

    /// User ID, if one is set and non-empty
    pub fn user_id(&self) -> Option<&str> {
        non_empty(self.user_id.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Whether a session whose last heartbeat was `last_active` has expired at `now`
pub fn session_expired(last_active: Option<i64>, now: i64) -> bool {
    match last_active {
        None | Some(0) => true,
        Some(last) => match now.checked_sub(last) {
            Some(idle) => idle > SESSION_TIMEOUT_MS,
            None => true,
        },
    }
}

/// Session ID for a session starting at `now` (epoch seconds)
pub fn generate_session_id(now: i64) -> String {
    now.div_euclid(1000).to_string()
}

/// Loads, owns and persists identity state
pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
    state: Mutex<IdentityState>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            state: Mutex::new(IdentityState::default()),
        }
    }

    /// Load or create identity state
    ///
    /// Runs the steps in order: client ID, user ID, first visit and session
    /// expiry, then the heartbeat. Each step is independent, so a failed
    /// store read in one still lets the next run.
    pub async fn initialize(&self, now: i64) {
        let mut state = self.state.lock().await;
        let client_id = self.load_client_id().await;
        let user_id = self.read(StorageKey::UserId).await.unwrap_or(None);
        let is_first_visit = self.check_first_visit().await;
        let (session_id, is_session_start) = self.resolve_session(now).await;
        self.heartbeat(now).await;

        tracing::info!(
            client_id = client_id.as_deref().unwrap_or(UNKNOWN),
            session_id = session_id.as_deref().unwrap_or(UNKNOWN),
            user_id = user_id.as_deref().unwrap_or("-"),
            first_visit = is_first_visit,
            session_start = is_session_start,
            "Tracker initialized"
        );

        *state = IdentityState {
            client_id,
            user_id,
            session_id,
            is_first_visit,
            is_session_start,
        };
    }

    async fn load_client_id(&self) -> Option<String> {
        match self.read(StorageKey::ClientId).await {
            Ok(Some(cid)) if !cid.is_empty() => Some(cid),
            Ok(_) => {
                let cid = Uuid::new_v4().to_string();
                self.write(StorageKey::ClientId, &cid).await.then_some(cid)
            }
            // Minting a new ID here could orphan the persisted one.
            Err(()) => None,
        }
    }

    async fn check_first_visit(&self) -> bool {
        match self.read(StorageKey::FirstVisit).await {
            Ok(Some(_)) => false,
            Ok(None) => {
                self.write(StorageKey::FirstVisit, "true").await;
                true
            }
            Err(()) => false,
        }
    }

    async fn resolve_session(&self, now: i64) -> (Option<String>, bool) {
        let last_active = self
            .read(StorageKey::LastActive)
            .await
            .unwrap_or(None)
            .and_then(|raw| raw.trim().parse::<i64>().ok());

        if !session_expired(last_active, now) {
            if let Ok(Some(sid)) = self.read(StorageKey::SessionId).await {
                if !sid.is_empty() {
                    return (Some(sid), false);
                }
            }
        }

        let sid = generate_session_id(now);
        self.write(StorageKey::SessionId, &sid).await;
        (Some(sid), true)
    }

    /// Record activity at `now`
    pub async fn heartbeat(&self, now: i64) {
        self.write(StorageKey::LastActive, &now.to_string()).await;
    }

    /// Set or clear (`None` or empty) the user ID
    ///
    /// Does not require initialization: the persisted value is what
    /// [`SessionManager::initialize`] loads.
    pub async fn set_user_id(&self, user_id: Option<&str>) {
        let user_id = non_empty(user_id).map(str::to_string);
        let mut state = self.state.lock().await;
        state.user_id = user_id.clone();

        match user_id {
            Some(uid) => {
                if self.write(StorageKey::UserId, &uid).await {
                    tracing::info!(user_id = %uid, "User ID set");
                }
            }
            None => {
                if self.delete(StorageKey::UserId).await {
                    tracing::info!("User ID cleared");
                }
            }
        }
    }

    /// Copy of the state for one outbound event, consuming the one-shot flags
    pub async fn take_for_event(&self) -> IdentityState {
        let mut state = self.state.lock().await;
        let snapshot = state.clone();
        state.is_first_visit = false;
        state.is_session_start = false;
        snapshot
    }

    /// Copy of the current state without consuming anything
    pub async fn snapshot(&self) -> IdentityState {
        self.state.lock().await.clone()
    }

    async fn read(&self, key: StorageKey) -> Result<Option<String>, ()> {
        self.store.get(key.as_str()).await.map_err(|e| {
            tracing::error!(key = %key, error = %e, "Failed to read identity state");
        })
    }

    async fn write(&self, key: StorageKey, value: &str) -> bool {
        match self.store.set(key.as_str(), value).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to persist identity state");
                false
            }
        }
    }

    async fn delete(&self, key: StorageKey) -> bool {
        match self.store.remove(key.as_str()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to remove identity state");
                false
            }
        }
    }
}
