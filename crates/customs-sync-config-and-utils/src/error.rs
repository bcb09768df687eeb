//! Errors raised while loading configuration and preparing the daemon's files.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// The config file exists but could not be read.
    #[error("Failed to read config file {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`Config`](crate::Config).
    #[error("Malformed config file {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A `CUSTOMS_SYNC_*` variable could not be parsed.
    #[error("Environment variable {name} has invalid value {value:?}")]
    InvalidEnv { name: String, value: String },

    /// A setting is out of range.
    #[error("Invalid {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Could not determine home directory")]
    HomeDirNotFound,

    /// Creating directories or writing the config file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The log file could not be opened or a subscriber is already installed.
    #[error("Failed to initialize logging: {0}")]
    Logging(#[source] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
