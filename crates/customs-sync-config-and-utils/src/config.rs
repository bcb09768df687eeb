//! Daemon configuration: JSON file, then environment overrides.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;
use url::Url;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "CUSTOMS_SYNC_";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default system-of-record endpoint.
pub const DEFAULT_ENDPOINT_URL: &str = "http://localhost:8080";

/// Retry delay schedule selected in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    /// Retry on the next tick.
    #[default]
    Fixed,
    /// Double the delay per failed attempt.
    Exponential,
}

/// Main daemon configuration. Every field has a default, so a partial
/// file is valid.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Base URL of the system of record.
    pub endpoint_url: String,
    /// Bearer token sent with every delivery.
    pub auth_token: Option<String>,
    pub tick_interval_ms: u64,
    pub max_retries: u32,
    pub batch_size: usize,
    /// 0 disables the delivery timeout.
    pub delivery_timeout_ms: u64,
    pub retry_backoff: RetryBackoff,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Synced/failed events kept for inspection.
    pub history_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            auth_token: None,
            tick_interval_ms: 5_000,
            max_retries: 3,
            batch_size: 10,
            delivery_timeout_ms: 30_000,
            retry_backoff: RetryBackoff::Fixed,
            backoff_base_ms: 5_000,
            backoff_max_ms: 300_000,
            history_capacity: 100,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("log_level", &self.log_level)
            .field("endpoint_url", &self.endpoint_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("tick_interval_ms", &self.tick_interval_ms)
            .field("max_retries", &self.max_retries)
            .field("batch_size", &self.batch_size)
            .field("delivery_timeout_ms", &self.delivery_timeout_ms)
            .field("retry_backoff", &self.retry_backoff)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .field("backoff_max_ms", &self.backoff_max_ms)
            .field("history_capacity", &self.history_capacity)
            .finish()
    }
}

impl Config {
    /// Load `config.json` if present, otherwise defaults, then apply
    /// environment overrides and validate.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            debug!(path = %config_path.display(), "No config file, using defaults");
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| CoreError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to `config.json`.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Apply `CUSTOMS_SYNC_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = var("ENDPOINT_URL") {
            self.endpoint_url = url;
        }
        if let Some(token) = var("AUTH_TOKEN") {
            self.auth_token = Some(token);
        }
        if let Some(raw) = var("TICK_INTERVAL_MS") {
            self.tick_interval_ms = parse_env("TICK_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = var("MAX_RETRIES") {
            self.max_retries = parse_env("MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = var("BATCH_SIZE") {
            self.batch_size = parse_env("BATCH_SIZE", &raw)?;
        }
        Ok(())
    }

    /// Reject values the daemon cannot start with.
    pub fn validate(&self) -> CoreResult<()> {
        self.endpoint_url()?;
        if self.tick_interval_ms == 0 {
            return Err(CoreError::InvalidSetting {
                field: "tick_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(CoreError::InvalidSetting {
                field: "batch_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.retry_backoff == RetryBackoff::Exponential
            && self.backoff_base_ms > self.backoff_max_ms
        {
            return Err(CoreError::InvalidSetting {
                field: "backoff_base_ms",
                reason: format!(
                    "{} exceeds backoff_max_ms {}",
                    self.backoff_base_ms, self.backoff_max_ms
                ),
            });
        }
        Ok(())
    }

    /// The endpoint as a parsed URL.
    pub fn endpoint_url(&self) -> CoreResult<Url> {
        let url = Url::parse(&self.endpoint_url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(CoreError::InvalidSetting {
                field: "endpoint_url",
                reason: format!("scheme must be http or https, got {}", other),
            }),
        }
    }

    /// Copy safe to print: the auth token is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.auth_token.is_some() {
            copy.auth_token = Some("<redacted>".to_string());
        }
        copy
    }
}

fn parse_env<T: FromStr>(name: &str, raw: &str) -> CoreResult<T> {
    raw.parse().map_err(|_| CoreError::InvalidEnv {
        name: format!("{}{}", ENV_PREFIX, name),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.endpoint_url, DEFAULT_ENDPOINT_URL);
        assert_eq!(config.tick_interval_ms, 5_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.retry_backoff, RetryBackoff::Fixed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_partial_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "max_retries": 5,
            "retry_backoff": "exponential"
        }"#;
        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_backoff, RetryBackoff::Exponential);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_config_load_rejects_malformed_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, "{ not json").unwrap();

        let result = Config::load_from_file(&config_path);
        match result {
            Err(CoreError::ParseConfig { path, .. }) => assert_eq!(path, config_path),
            other => panic!("expected ParseConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_config_load_unreadable_file() {
        let dir = tempdir().unwrap();

        // A directory cannot be read as a file.
        let result = Config::load_from_file(dir.path());
        assert!(matches!(result, Err(CoreError::ReadConfig { .. })));
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config {
            endpoint_url: "https://records.customs.example/api".to_string(),
            batch_size: 25,
            ..Config::default()
        };
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.endpoint_url, "https://records.customs.example/api");
        assert_eq!(loaded.batch_size, 25);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("CUSTOMS_SYNC_LOG_LEVEL", "trace"),
                ("CUSTOMS_SYNC_ENDPOINT_URL", "https://sor.example"),
                ("CUSTOMS_SYNC_AUTH_TOKEN", "secret"),
                ("CUSTOMS_SYNC_TICK_INTERVAL_MS", "250"),
                ("CUSTOMS_SYNC_MAX_RETRIES", "7"),
                ("CUSTOMS_SYNC_BATCH_SIZE", " 4 "),
            ]))
            .unwrap();

        assert_eq!(config.log_level, "trace");
        assert_eq!(config.endpoint_url, "https://sor.example");
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.batch_size, 4);
    }

    #[test]
    fn test_env_empty_values_are_ignored() {
        let mut config = Config::default();
        config
            .apply_env(env(&[("CUSTOMS_SYNC_LOG_LEVEL", "  ")]))
            .unwrap();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn test_env_invalid_number_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("CUSTOMS_SYNC_MAX_RETRIES", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("CUSTOMS_SYNC_MAX_RETRIES"));
        match err {
            CoreError::InvalidEnv { name, value } => {
                assert_eq!(name, "CUSTOMS_SYNC_MAX_RETRIES");
                assert_eq!(value, "lots");
            }
            other => panic!("expected InvalidEnv, got {:?}", other),
        }
    }

    #[test]
    fn test_endpoint_url_parse() {
        let config = Config::default();
        let url = config.endpoint_url().unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.host_str(), Some("localhost"));
    }

    #[test]
    fn test_config_invalid_url() {
        let mut config = Config {
            endpoint_url: "not a valid url".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.endpoint_url(), Err(CoreError::InvalidUrl(_))));

        config.endpoint_url = "ftp://files.example".to_string();
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidSetting { field: "endpoint_url", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_tick = Config {
            tick_interval_ms: 0,
            ..Config::default()
        };
        assert!(matches!(
            zero_tick.validate(),
            Err(CoreError::InvalidSetting { field: "tick_interval_ms", .. })
        ));

        let inverted = Config {
            retry_backoff: RetryBackoff::Exponential,
            backoff_base_ms: 10_000,
            backoff_max_ms: 1_000,
            ..Config::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(CoreError::InvalidSetting { field: "backoff_base_ms", .. })
        ));
    }

    #[test]
    fn test_auth_token_never_printed() {
        let config = Config {
            auth_token: Some("super-secret".to_string()),
            ..Config::default()
        };

        assert!(!format!("{:?}", config).contains("super-secret"));
        let printed = serde_json::to_string(&config.redacted()).unwrap();
        assert!(!printed.contains("super-secret"));
    }
}
