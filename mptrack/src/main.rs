//! mptrack - command-line host for the measurement-protocol tracker
//!
//! Stands in for an application shell: it owns the durable store, feeds
//! deep links to attribution capture and fires events through the tracker.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Store: $XDG_DATA_HOME/mptrack/store.json (~/.local/share/mptrack/store.json)
//! - Config: $XDG_CONFIG_HOME/mptrack/config.toml (~/.config/mptrack/config.toml)
//! - Logs: $XDG_STATE_HOME/mptrack/mptrack.log.YYYY-MM-DD (only with --verbose)

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use mptrack_core::device::DeviceInfo;
use mptrack_core::encoder::ITEMS;
use mptrack_core::transport::RecordingTransport;
use mptrack_core::{
    AttributionCapture, Config, DispatchOutcome, EventParams, JsonFileStore, KeyValueStore,
    StorageKey, Tracker,
};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "mptrack")]
#[command(about = "Send measurement-protocol events with persistent identity")]
#[command(version)]
struct Args {
    /// Write logs to the state directory
    #[arg(short, long)]
    verbose: bool,

    /// Print hits instead of sending them (identity in the store is still updated)
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration and persisted identity
    Status,

    /// Track a custom event
    Track {
        /// Event name
        event: String,

        /// Event parameter as key=value (value parsed as JSON when valid)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Line item as a JSON object
        #[arg(short, long = "item", value_parser = parse_item)]
        items: Vec<Value>,
    },

    /// Track a screen view
    PageView {
        /// Screen name
        screen: String,
    },

    /// Handle an opened deep link
    Open {
        /// URL the app was opened with
        url: String,
    },

    /// Set the user ID
    Login {
        /// User ID assigned by the backend
        user_id: String,
    },

    /// Clear the user ID
    Logout,

    /// Forget the stored click ID
    ClearAttribution,
}

/// What a sending command asks the tracker to do
enum Hit {
    Event(String, EventParams),
    PageView(String),
}

fn parse_param(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err("parameter key must not be empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn parse_item(raw: &str) -> std::result::Result<Value, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err("item must be a JSON object".to_string()),
        Err(e) => Err(format!("invalid item JSON: {}", e)),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(mptrack_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    let store = Arc::new(JsonFileStore::open(Config::store_path()));
    tracing::debug!(store = %store.path().display(), "Opened store");

    match args.command {
        Command::Status => cmd_status(&config, &store).await,
        Command::Track {
            event,
            params,
            items,
        } => {
            let mut event_params: EventParams = params.into_iter().collect();
            if !items.is_empty() {
                event_params.insert(ITEMS, Value::Array(items));
            }
            cmd_send(&config, store, args.dry_run, Hit::Event(event, event_params)).await
        }
        Command::PageView { screen } => {
            cmd_send(&config, store, args.dry_run, Hit::PageView(screen)).await
        }
        Command::Open { url } => cmd_open(&config, store, &url).await,
        Command::Login { user_id } => cmd_set_user(&config, store, Some(&user_id)).await,
        Command::Logout => cmd_set_user(&config, store, None).await,
        Command::ClearAttribution => {
            local_tracker(&config, store).clear_attribution_id().await;
            println!("Attribution ID cleared");
            Ok(())
        }
    }
}

/// Tracker that records instead of sending, for commands that never send
fn local_tracker(config: &Config, store: Arc<dyn KeyValueStore>) -> Tracker {
    Tracker::new(
        config.tracker.clone(),
        DeviceInfo::detect(&config.device),
        store,
        Arc::new(RecordingTransport::new()),
    )
}

async fn cmd_status(config: &Config, store: &JsonFileStore) -> Result<()> {
    let tracker = &config.tracker;

    println!("mptrack Configuration");
    println!("=====================");
    println!();
    println!(
        "Endpoint:        {}",
        tracker.endpoint.as_deref().unwrap_or("<not set>")
    );
    println!(
        "Measurement ID:  {}",
        tracker.measurement_id.as_deref().unwrap_or("<not set>")
    );
    println!("Preview:         {}", tracker.preview_enabled);
    println!(
        "Preview Header:  {}",
        if tracker.preview_header.is_some() {
            "<set>"
        } else {
            "<not set>"
        }
    );
    println!("Store:           {}", store.path().display());
    println!(
        "Log File:        {}",
        mptrack_core::logging::log_file_path(chrono::Utc::now().date_naive()).display()
    );

    println!();
    match tracker.validate() {
        Ok(()) => println!("Status: Ready to send"),
        Err(e) => println!("Status: Not ready ({})", e),
    }

    let entries = store
        .entries()
        .await
        .with_context(|| format!("failed to read store {}", store.path().display()))?;
    let value = |key: StorageKey| {
        entries
            .get(key.as_str())
            .cloned()
            .unwrap_or_else(|| "<not set>".to_string())
    };

    let last_active = entries
        .get(StorageKey::LastActive.as_str())
        .and_then(|raw| raw.parse::<i64>().ok())
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "<never>".to_string());

    println!();
    println!("Identity");
    println!("--------");
    println!("Client ID:       {}", value(StorageKey::ClientId));
    println!("Session ID:      {}", value(StorageKey::SessionId));
    println!("User ID:         {}", value(StorageKey::UserId));
    println!("Attribution ID:  {}", value(StorageKey::AttributionId));
    println!("Last Active:     {}", last_active);
    println!(
        "First Visit:     {}",
        if entries.contains_key(StorageKey::FirstVisit.as_str()) {
            "recorded"
        } else {
            "pending"
        }
    );

    Ok(())
}

async fn cmd_send(
    config: &Config,
    store: Arc<JsonFileStore>,
    dry_run: bool,
    hit: Hit,
) -> Result<()> {
    let recorder = RecordingTransport::new();

    let tracker = if dry_run {
        Tracker::new(
            config.tracker.clone(),
            DeviceInfo::detect(&config.device),
            store,
            Arc::new(recorder.clone()),
        )
    } else {
        if !config.tracker.is_ready() {
            println!("Tracker is not configured. Run 'status' for details.");
            return Ok(());
        }
        Tracker::from_config(config, store).context("failed to create tracker")?
    };
    let tracker = tracker.bootstrap().await;

    let outcome = match hit {
        Hit::Event(name, params) => tracker.track_event(&name, params).await,
        Hit::PageView(screen) => tracker.log_page_view(&screen).await,
    };

    if dry_run {
        let request = recorder
            .last()
            .ok_or_else(|| anyhow!("event was not dispatched: {}", outcome))?;
        println!("POST {}", request.url);
        for (name, value) in &request.headers {
            println!("{}: {}", name, value);
        }
        println!();
        println!("Outcome: not sent (dry run)");
        return Ok(());
    }

    println!("Outcome: {}", outcome);
    if let DispatchOutcome::Dropped { .. } = outcome {
        tracing::warn!(outcome = %outcome, "Event dropped");
    }
    Ok(())
}

async fn cmd_open(config: &Config, store: Arc<JsonFileStore>, url: &str) -> Result<()> {
    let tracker = Arc::new(local_tracker(config, store));
    let capture = AttributionCapture::new(tracker);

    match capture.handle_url(url).await {
        Some(click_id) => println!("Stored click_id: {}", click_id),
        None => println!("No click_id found in URL"),
    }
    Ok(())
}

async fn cmd_set_user(
    config: &Config,
    store: Arc<JsonFileStore>,
    user_id: Option<&str>,
) -> Result<()> {
    let tracker = local_tracker(config, store);
    tracker.set_user_id(user_id).await;

    match tracker.identity().await.user_id() {
        Some(uid) => println!("User ID set: {}", uid),
        None => println!("User ID cleared"),
    }
    Ok(())
}
