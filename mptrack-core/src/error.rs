//! Error types for mptrack-core

use thiserror::Error;

/// Main error type for the mptrack-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable store unavailable or corrupt
    #[error("store error: {0}")]
    Store(String),

    /// Deep link could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Outbound request failed before a response arrived
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for mptrack-core
pub type Result<T> = std::result::Result<T, Error>;
