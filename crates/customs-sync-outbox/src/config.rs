//! Engine configuration.

use crate::store::DEFAULT_HISTORY_CAPACITY;
use crate::notifier::DEFAULT_NOTIFICATION_CAPACITY;
use crate::{Backoff, OutboxError, OutboxResult, RetryPolicy};
use std::time::Duration;

/// Default scheduler tick interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(5000);

/// Default retry budget per event.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default number of events pulled per drain cycle.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default upper bound on a single transport call.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the outbox engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Interval between scheduler ticks.
    pub tick_interval: Duration,
    /// Failed attempts allowed before an event is marked failed.
    pub max_retries: u32,
    /// Maximum events processed per drain cycle.
    pub batch_size: usize,
    /// Timeout per delivery; `None` waits forever.
    pub delivery_timeout: Option<Duration>,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
    /// Terminal events kept for listing and manual retry (0 keeps none).
    pub history_capacity: usize,
    /// Notifications buffered per subscriber.
    pub notification_capacity: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            batch_size: DEFAULT_BATCH_SIZE,
            delivery_timeout: Some(DEFAULT_DELIVERY_TIMEOUT),
            backoff: Backoff::Fixed,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

impl OutboxConfig {
    /// Sets the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the per-delivery timeout.
    pub fn with_delivery_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Sets the backoff schedule.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the terminal history capacity.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Sets the notification buffer size.
    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    /// The retry policy implied by this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> OutboxResult<()> {
        if self.tick_interval.is_zero() {
            return Err(OutboxError::InvalidConfig(
                "tick_interval must be greater than zero".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(OutboxError::InvalidConfig(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.notification_capacity == 0 {
            return Err(OutboxError::InvalidConfig(
                "notification_capacity must be greater than zero".to_string(),
            ));
        }
        if matches!(self.delivery_timeout, Some(t) if t.is_zero()) {
            return Err(OutboxError::InvalidConfig(
                "delivery_timeout must be greater than zero".to_string(),
            ));
        }
        if let Backoff::Exponential { base, max } = self.backoff {
            if base > max {
                return Err(OutboxError::InvalidConfig(format!(
                    "backoff base {:?} exceeds max {:?}",
                    base, max
                )));
            }
        }
        Ok(())
    }
}
