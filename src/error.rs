//! # Error Types
//!
//! Custom error types for the field station using `thiserror`.

use thiserror::Error;

/// Main error type for the field station
#[derive(Debug, Error)]
pub enum StationError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Block file encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serial link errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Storage layout errors (bad paths, migration failures)
    #[error("Storage error: {0}")]
    Storage(String),

    /// GPIO and other on-board hardware
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Log subscriber could not be installed
    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type alias for the field station
pub type Result<T> = std::result::Result<T, StationError>;
