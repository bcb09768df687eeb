//! Customs sync daemon: runs the outbox in the foreground against the
//! system of record and accepts events and admin commands on stdin.

mod app;
mod console;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use customs_sync_config_and_utils::{init_logging, Config, Paths};

/// Customs sync daemon command-line interface.
#[derive(Parser)]
#[command(name = "customs-sync-daemon")]
#[command(about = "Forwards customs domain events to the system of record")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config and logs. Defaults to ~/.customs-sync
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the outbox in the foreground (default)
    Run {
        /// System of record base URL. Overrides the config file.
        #[arg(long, env = "CUSTOMS_SYNC_ENDPOINT_URL")]
        endpoint: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        }
        Some(Commands::Run { endpoint }) => {
            if let Some(endpoint) = endpoint {
                config.endpoint_url = endpoint;
                config.validate()?;
            }
            paths.ensure_dirs()?;
            init_logging(&paths, &config.log_level)?;
            app::run_daemon(config).await?;
        }
        None => {
            paths.ensure_dirs()?;
            init_logging(&paths, &config.log_level)?;
            app::run_daemon(config).await?;
        }
    }

    Ok(())
}
