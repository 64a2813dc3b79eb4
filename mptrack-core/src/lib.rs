//! # mptrack-core
//!
//! Client-side measurement-protocol tracker.
//!
//! This library provides:
//! - Persistent client, user and session identity over a pluggable store
//! - Deep-link attribution capture (`click_id`)
//! - Event encoding, including tilde-delimited e-commerce item tokens
//! - Best-effort dispatch of hits to a collection endpoint
//! - Configuration and logging infrastructure
//!
//! ## Architecture
//!
//! A host builds one [`Tracker`] at startup and shares it by `Arc`:
//! - **Store:** [`store::KeyValueStore`] keeps identity across restarts
//! - **Identity:** [`identity::SessionManager`] decides first visit and session start
//! - **Encoder:** [`encoder`] turns parameters into wire fields
//! - **Dispatcher:** [`Tracker`] assembles and sends each hit once
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mptrack_core::{Config, EventParams, JsonFileStore, Tracker};
//!
//! # async fn run() -> mptrack_core::Result<()> {
//! let config = Config::load()?;
//! let store = Arc::new(JsonFileStore::open(Config::store_path()));
//! let tracker = Tracker::from_config(&config, store)?.bootstrap().await;
//!
//! tracker.log_page_view("Home").await;
//! tracker
//!     .track_event("add_to_cart", EventParams::new().with("value", 1299))
//!     .await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use attribution::{extract_click_id, AttributionCapture};
pub use config::Config;
pub use encoder::{EventParams, Item, ItemValue};
pub use error::{Error, Result};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, StorageKey};
pub use tracker::{DispatchOutcome, DropReason, Tracker};

// Public modules
pub mod attribution;
pub mod clock;
pub mod config;
pub mod device;
pub mod encoder;
pub mod error;
pub mod identity;
pub mod logging;
pub mod store;
pub mod tracker;
pub mod transport;
