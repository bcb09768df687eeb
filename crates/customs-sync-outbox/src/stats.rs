//! Point-in-time statistics derived from the event store.

use crate::StoreCounts;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Queue statistics, computed on demand (never cached).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxStats {
    /// Events in the active queue (pending + syncing).
    pub total: usize,
    pub pending: usize,
    pub syncing: usize,
    /// Failed events still retained in history.
    pub failed: usize,
    /// Synced events still retained in history.
    pub synced: usize,
    /// Whether a drain cycle holds the single-flight guard.
    pub is_draining: bool,
    /// Whether the scheduler is ticking.
    pub is_running: bool,
    /// When the most recent drain cycle finished.
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl OutboxStats {
    pub(crate) fn from_counts(
        counts: StoreCounts,
        is_draining: bool,
        is_running: bool,
        last_sync_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            total: counts.active(),
            pending: counts.pending,
            syncing: counts.syncing,
            failed: counts.failed,
            synced: counts.synced,
            is_draining,
            is_running,
            last_sync_time,
        }
    }
}

/// Outcome of one drain cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Events selected for this batch.
    pub selected: usize,
    pub synced: usize,
    /// Failed attempts sent back to the queue.
    pub requeued: usize,
    /// Failed attempts that exhausted the retry budget.
    pub failed: usize,
    /// Selected events removed before their turn came.
    pub skipped: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchSummary {
    pub(crate) fn new(selected: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            selected,
            synced: 0,
            requeued: 0,
            failed: 0,
            skipped: 0,
            started_at,
            finished_at: started_at,
        }
    }

    /// Number of transport calls made during the batch.
    pub fn attempted(&self) -> usize {
        self.synced + self.requeued + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_from_counts() {
        let counts = StoreCounts {
            pending: 4,
            syncing: 1,
            synced: 7,
            failed: 2,
        };
        let stats = OutboxStats::from_counts(counts, true, false, None);

        assert_eq!(stats.total, 5);
        assert_eq!(stats.pending, 4);
        assert_eq!(stats.syncing, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.synced, 7);
        assert!(stats.is_draining);
        assert!(!stats.is_running);
    }

    #[test]
    fn test_stats_serializes_camel_case() {
        let stats = OutboxStats::from_counts(StoreCounts::default(), false, true, None);
        let json = serde_json::to_value(&stats).unwrap();

        assert_eq!(json["isDraining"], false);
        assert_eq!(json["isRunning"], true);
        assert!(json["lastSyncTime"].is_null());
    }

    #[test]
    fn test_batch_summary_attempted() {
        let mut summary = BatchSummary::new(5, Utc::now());
        summary.synced = 2;
        summary.requeued = 1;
        summary.failed = 1;
        summary.skipped = 1;

        assert_eq!(summary.attempted(), 4);
    }
}
