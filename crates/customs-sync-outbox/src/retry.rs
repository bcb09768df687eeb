//! Bounded retry policy applied after a failed delivery attempt.

use crate::SyncEvent;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// How long a requeued event waits before it is eligible again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Eligible on the next scheduler tick, so the effective delay equals
    /// the tick interval.
    #[default]
    Fixed,
    /// Binary exponential backoff: `base * 2^(retry_count - 1)`, capped at `max`.
    ///
    /// | Retry Count | Delay (base=2s, max=300s) |
    /// |-------------|---------------------------|
    /// | 1           | 2s                        |
    /// | 2           | 4s                        |
    /// | 3           | 8s                        |
    /// | 8+          | 300s (capped)             |
    Exponential {
        /// Delay after the first failure.
        base: Duration,
        /// Upper bound on the delay.
        max: Duration,
    },
}

/// Outcome of evaluating the policy after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue as pending. `not_before` is set when backoff applies.
    Retry {
        not_before: Option<DateTime<Utc>>,
    },
    /// Budget exhausted, the event becomes `Failed`.
    GiveUp,
}

/// Retry policy: a pure function of `(retry_count, max_retries)` plus an
/// optional backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts allowed before an event is marked `Failed`.
    pub max_retries: u32,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given budget and fixed retry delay.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed,
        }
    }

    /// Decide what happens to an event whose `retry_count` has already been
    /// incremented for the attempt that just failed.
    pub fn decide(&self, retry_count: u32, now: DateTime<Utc>) -> RetryDecision {
        if retry_count >= self.max_retries {
            return RetryDecision::GiveUp;
        }

        let not_before = match self.backoff {
            Backoff::Fixed => None,
            Backoff::Exponential { .. } => Some(now + self.compute_backoff(retry_count)),
        };

        RetryDecision::Retry { not_before }
    }

    /// Computes the backoff delay for a given retry count.
    ///
    /// Always zero for [`Backoff::Fixed`] and for `retry_count == 0`.
    pub fn compute_backoff(&self, retry_count: u32) -> chrono::Duration {
        let Backoff::Exponential { base, max } = self.backoff else {
            return chrono::Duration::zero();
        };
        if retry_count == 0 {
            return chrono::Duration::zero();
        }

        let base_ms = base.as_millis() as u64;
        let max_ms = max.as_millis() as u64;
        let shift = retry_count.saturating_sub(1);
        let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);

        chrono::Duration::milliseconds(delay_ms.min(i64::MAX as u64) as i64)
    }

    /// Whether a pending event may be included in the next batch.
    pub fn is_due(&self, event: &SyncEvent, now: DateTime<Utc>) -> bool {
        match event.next_attempt_at {
            Some(not_before) => now >= not_before,
            None => true,
        }
    }
}
