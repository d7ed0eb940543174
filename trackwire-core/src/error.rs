//! Error types for trackwire-core

use thiserror::Error;

/// Main error type for the trackwire-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Event rejected before admission to the queue
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Transport/API error
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for trackwire-core
pub type Result<T> = std::result::Result<T, Error>;
