//! Outbox error types.

use std::time::Duration;
use thiserror::Error;

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Delivery rejected or failed at the remote end
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Delivery did not complete within the configured timeout
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    /// Engine configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unrecognised kind, action or status name
    #[error("Invalid {field}: {value}")]
    InvalidValue {
        /// Which field failed to parse.
        field: &'static str,
        /// The rejected input.
        value: String,
    },
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
