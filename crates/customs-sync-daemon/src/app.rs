//! Daemon wiring: config to transport to engine, then the console loop.

use crate::console::ConsoleCommand;
use customs_sync_config_and_utils::{Config, RetryBackoff};
use customs_sync_outbox::{
    Backoff, HttpTransport, OutboxConfig, OutboxNotification, SenderConfig, SyncOutbox,
};
use serde_json::{json, Value};
use std::future::Future;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Console lines buffered between the stdin thread and the runtime.
const INPUT_CAPACITY: usize = 64;

/// Why the console loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    Interrupted,
    InputClosed,
}

/// Engine settings derived from the daemon configuration.
pub fn outbox_config(config: &Config) -> OutboxConfig {
    let backoff = match config.retry_backoff {
        RetryBackoff::Fixed => Backoff::Fixed,
        RetryBackoff::Exponential => Backoff::Exponential {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
        },
    };
    let delivery_timeout =
        (config.delivery_timeout_ms > 0).then(|| Duration::from_millis(config.delivery_timeout_ms));

    OutboxConfig::default()
        .with_tick_interval(Duration::from_millis(config.tick_interval_ms))
        .with_max_retries(config.max_retries)
        .with_batch_size(config.batch_size)
        .with_delivery_timeout(delivery_timeout)
        .with_backoff(backoff)
        .with_history_capacity(config.history_capacity)
}

/// HTTP transport settings derived from the daemon configuration.
pub fn sender_config(config: &Config) -> SenderConfig {
    SenderConfig {
        endpoint_url: config.endpoint_url.clone(),
        auth_token: config.auth_token.clone(),
        timeout: (config.delivery_timeout_ms > 0)
            .then(|| Duration::from_millis(config.delivery_timeout_ms)),
    }
}

fn log_notification(notification: OutboxNotification) {
    match &notification {
        OutboxNotification::EventAdded(e) => {
            debug!(event_id = %e.id, kind = %e.kind, action = %e.action, "event-added")
        }
        OutboxNotification::EventRetrying(e) => warn!(
            event_id = %e.id,
            retry_count = e.retry_count,
            error = e.last_error.as_deref().unwrap_or_default(),
            "event-retrying"
        ),
        OutboxNotification::EventSynced(e) => {
            info!(event_id = %e.id, kind = %e.kind, action = %e.action, "event-synced")
        }
        OutboxNotification::EventFailed(e) => error!(
            event_id = %e.id,
            kind = %e.kind,
            retry_count = e.retry_count,
            error = e.last_error.as_deref().unwrap_or_default(),
            "event-failed"
        ),
        OutboxNotification::BatchComplete(summary) => debug!(
            synced = summary.synced,
            requeued = summary.requeued,
            failed = summary.failed,
            "batch-complete"
        ),
        OutboxNotification::BatchError { message } => error!(error = %message, "batch-error"),
    }
}

/// Run the daemon in the foreground until Ctrl-C or end of input.
pub async fn run_daemon(config: Config) -> anyhow::Result<()> {
    info!("Starting customs sync daemon");
    info!(
        endpoint_url = %config.endpoint_url,
        tick_interval_ms = config.tick_interval_ms,
        max_retries = config.max_retries,
        batch_size = config.batch_size,
        "Configuration loaded"
    );

    let transport = HttpTransport::new(sender_config(&config))?;
    info!(url = %transport.events_url(), "HTTP transport ready");

    let outbox = SyncOutbox::new(outbox_config(&config), Arc::new(transport))?;
    let notifications = outbox.subscribe_with(log_notification);
    outbox.start();

    let lines = spawn_stdin_reader()?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    match run_console(&outbox, lines, shutdown).await {
        ConsoleExit::Interrupted => info!("Interrupt received, shutting down"),
        ConsoleExit::InputClosed => info!("Input closed, shutting down"),
    }

    outbox.stop_and_wait().await;

    let unsynced = outbox.stats().total;
    if unsynced > 0 {
        warn!(
            unsynced = unsynced,
            "Unsynced events are held in memory only and will be lost"
        );
    }

    drop(outbox);
    if let Err(e) = notifications.await {
        debug!(error = %e, "Notification logger ended abnormally");
    }

    info!("Daemon stopped");
    Ok(())
}

/// Read stdin on its own OS thread. A blocking read there never holds up
/// runtime shutdown; the thread ends with the process.
fn spawn_stdin_reader() -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(INPUT_CAPACITY);
    std::thread::Builder::new()
        .name("console-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read input");
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

/// Execute console lines in order until `shutdown` resolves or input ends.
///
/// Each command runs on its own task so a long `drain` cannot delay
/// `shutdown`. A command still running at shutdown is left to finish on
/// its own.
pub async fn run_console<S>(
    outbox: &SyncOutbox,
    mut lines: mpsc::Receiver<String>,
    shutdown: S,
) -> ConsoleExit
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            biased;
            _ = &mut shutdown => return ConsoleExit::Interrupted,
            line = lines.recv() => match line {
                Some(line) => line,
                None => return ConsoleExit::InputClosed,
            },
        };

        let command_outbox = outbox.clone();
        let command = tokio::spawn(async move { reply_for(&command_outbox, &line).await });

        tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!("Shutdown requested while a console command was running");
                return ConsoleExit::Interrupted;
            }
            reply = command => match reply {
                Ok(Some(reply)) => println!("{}", reply),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Console command task failed"),
            },
        }
    }
}

/// The JSON reply for one console line, or `None` for a blank line.
async fn reply_for(outbox: &SyncOutbox, line: &str) -> Option<Value> {
    let reply = match ConsoleCommand::parse(line) {
        Ok(None) => return None,
        Ok(Some(command)) => command.execute(outbox).await,
        Err(e) => Err(e),
    };

    Some(reply.unwrap_or_else(|e| {
        debug!(error = %e, "Console command rejected");
        json!({ "error": e.to_string() })
    }))
}
