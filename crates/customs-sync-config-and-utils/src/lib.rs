//! Configuration, paths, errors and logging setup for the customs sync daemon.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, RetryBackoff, DEFAULT_ENDPOINT_URL, DEFAULT_LOG_LEVEL, ENV_PREFIX};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, normalize_level, SERVICE_NAME};
pub use paths::Paths;
