//! Logging initialization for the daemon.
//!
//! Thin wrapper over the observability crate: structured JSONL goes to
//! `<base>/logs/daemon.jsonl`, with compact output on stderr for
//! foreground runs.

use crate::{CoreError, CoreResult, Paths};
use observability::LogConfig;

/// Service name written into every log line.
pub const SERVICE_NAME: &str = "customs-sync-daemon";

/// Initialize logging. `RUST_LOG` overrides `level`.
pub fn init_logging(paths: &Paths, level: &str) -> CoreResult<()> {
    let level = normalize_level(level);
    observability::init_with_config(LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr: true,
    })
    .map_err(CoreError::Logging)?;
    Ok(())
}

/// Map a configured level onto a tracing filter directive.
/// Unknown values fall back to `info`.
pub fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}
