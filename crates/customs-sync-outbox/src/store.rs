//! Event store: the active FIFO queue plus a bounded terminal history.
//!
//! The store itself does no locking. [`SyncOutbox`](crate::SyncOutbox) owns it
//! behind a mutex and only the active drain cycle mutates in-flight events.

use crate::{EventId, EventStatus, RetryDecision, RetryPolicy, SyncEvent};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::debug;

/// Default number of terminal events retained for inspection and manual retry.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Result of recording a failed delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Budget left: back to `Pending` at the tail of the queue.
    Requeued(SyncEvent),
    /// Budget exhausted: moved to the terminal history as `Failed`.
    Failed(SyncEvent),
}

/// Per-status counts at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub pending: usize,
    pub syncing: usize,
    pub synced: usize,
    pub failed: usize,
}

impl StoreCounts {
    /// Events still in the active queue.
    pub fn active(&self) -> usize {
        self.pending + self.syncing
    }
}

/// Ordered collection of sync events.
#[derive(Debug)]
pub struct EventStore {
    /// Pending and syncing events, FIFO by enqueue/requeue order.
    active: VecDeque<SyncEvent>,
    /// Synced and failed events, oldest first.
    history: VecDeque<SyncEvent>,
    history_capacity: usize,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl EventStore {
    /// Create an empty store retaining at most `history_capacity` terminal events.
    pub fn new(history_capacity: usize) -> Self {
        Self {
            active: VecDeque::new(),
            history: VecDeque::with_capacity(history_capacity.min(1024)),
            history_capacity,
        }
    }

    /// Append a new event at the tail.
    pub fn push(&mut self, event: SyncEvent) {
        self.active.push_back(event);
    }

    /// Number of events in the active queue.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Check if the active queue is empty.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Snapshot of events, optionally filtered by status, truncated to `limit`.
    ///
    /// Without a filter only the active queue is listed. Terminal statuses
    /// are served from the retained history.
    pub fn list(&self, status: Option<EventStatus>, limit: usize) -> Vec<SyncEvent> {
        match status {
            None => self.active.iter().take(limit).cloned().collect(),
            Some(s) if s.is_terminal() => self
                .history
                .iter()
                .filter(|e| e.status == s)
                .take(limit)
                .cloned()
                .collect(),
            Some(s) => self
                .active
                .iter()
                .filter(|e| e.status == s)
                .take(limit)
                .cloned()
                .collect(),
        }
    }

    /// Look up an event in the active queue or the history.
    pub fn get(&self, id: &EventId) -> Option<SyncEvent> {
        self.active
            .iter()
            .chain(self.history.iter())
            .find(|e| &e.id == id)
            .cloned()
    }

    /// Remove an event wherever it lives.
    pub fn remove(&mut self, id: &EventId) -> Option<SyncEvent> {
        if let Some(pos) = self.active_position(id) {
            return self.active.remove(pos);
        }
        let pos = self.history.iter().position(|e| &e.id == id)?;
        self.history.remove(pos)
    }

    /// Remove every event with the given status, or everything when `None`.
    pub fn clear(&mut self, status: Option<EventStatus>) -> usize {
        match status {
            None => {
                let count = self.active.len() + self.history.len();
                self.active.clear();
                self.history.clear();
                count
            }
            Some(s) => {
                let queue = if s.is_terminal() {
                    &mut self.history
                } else {
                    &mut self.active
                };
                let before = queue.len();
                queue.retain(|e| e.status != s);
                before - queue.len()
            }
        }
    }

    /// Pick the ids of up to `batch_size` due pending events, in queue order.
    pub fn select_batch(
        &self,
        batch_size: usize,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Vec<EventId> {
        self.active
            .iter()
            .filter(|e| e.status == EventStatus::Pending && policy.is_due(e, now))
            .take(batch_size)
            .map(|e| e.id.clone())
            .collect()
    }

    /// Mark a pending event as syncing and return a copy for delivery.
    ///
    /// Returns `None` if the event was removed or is no longer pending.
    pub fn begin_sync(&mut self, id: &EventId, now: DateTime<Utc>) -> Option<SyncEvent> {
        let pos = self.active_position(id)?;
        let event = &mut self.active[pos];
        if !event.transition(EventStatus::Syncing) {
            return None;
        }
        event.last_attempt_at = Some(now);
        Some(event.clone())
    }

    /// Record a successful delivery: the event leaves the active queue.
    pub fn complete(&mut self, id: &EventId, now: DateTime<Utc>) -> Option<SyncEvent> {
        let pos = self.syncing_position(id)?;
        let mut event = self.active.remove(pos)?;
        event.transition(EventStatus::Synced);
        event.next_attempt_at = None;
        event.finished_at = Some(now);
        self.archive(event.clone());
        Some(event)
    }

    /// Record a failed delivery and apply the retry policy.
    pub fn fail(
        &mut self,
        id: &EventId,
        error: String,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Option<FailureOutcome> {
        let pos = self.syncing_position(id)?;
        let mut event = self.active.remove(pos)?;
        event.retry_count = event.retry_count.saturating_add(1);
        event.last_error = Some(error);

        match policy.decide(event.retry_count, now) {
            RetryDecision::Retry { not_before } => {
                event.transition(EventStatus::Pending);
                event.next_attempt_at = not_before;
                self.active.push_back(event.clone());
                Some(FailureOutcome::Requeued(event))
            }
            RetryDecision::GiveUp => {
                event.transition(EventStatus::Failed);
                event.next_attempt_at = None;
                event.finished_at = Some(now);
                self.archive(event.clone());
                Some(FailureOutcome::Failed(event))
            }
        }
    }

    /// Administrative retry: reset the retry budget of a pending event, or
    /// bring a failed event back to the tail of the active queue.
    pub fn retry(&mut self, id: &EventId) -> bool {
        if let Some(pos) = self.active_position(id) {
            let event = &mut self.active[pos];
            if event.status != EventStatus::Pending {
                return false;
            }
            event.reset_for_retry();
            return true;
        }

        let Some(pos) = self
            .history
            .iter()
            .position(|e| &e.id == id && e.status == EventStatus::Failed)
        else {
            return false;
        };
        let Some(mut event) = self.history.remove(pos) else {
            return false;
        };
        event.transition(EventStatus::Pending);
        event.reset_for_retry();
        self.active.push_back(event);
        true
    }

    /// Return every syncing event to pending. Used when a batch aborts.
    pub fn release_in_flight(&mut self) -> usize {
        let mut released = 0;
        for event in self
            .active
            .iter_mut()
            .filter(|e| e.status == EventStatus::Syncing)
        {
            if event.transition(EventStatus::Pending) {
                released += 1;
            }
        }
        released
    }

    /// Count events by status.
    pub fn counts(&self) -> StoreCounts {
        let mut counts = StoreCounts::default();
        for event in self.active.iter().chain(self.history.iter()) {
            match event.status {
                EventStatus::Pending => counts.pending += 1,
                EventStatus::Syncing => counts.syncing += 1,
                EventStatus::Synced => counts.synced += 1,
                EventStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn active_position(&self, id: &EventId) -> Option<usize> {
        self.active.iter().position(|e| &e.id == id)
    }

    fn syncing_position(&self, id: &EventId) -> Option<usize> {
        self.active
            .iter()
            .position(|e| &e.id == id && e.status == EventStatus::Syncing)
    }

    fn archive(&mut self, event: SyncEvent) {
        if self.history_capacity == 0 {
            return;
        }
        while self.history.len() >= self.history_capacity {
            if let Some(evicted) = self.history.pop_front() {
                debug!(event_id = %evicted.id, "Evicted event from history");
            }
        }
        self.history.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventAction, EventKind};

    fn event(n: u64) -> SyncEvent {
        SyncEvent::new(
            EventKind::Declaration,
            EventAction::Create,
            serde_json::json!({ "declarationId": n }),
        )
    }

    fn store_with(count: u64) -> (EventStore, Vec<EventId>) {
        let mut store = EventStore::default();
        let mut ids = Vec::new();
        for n in 1..=count {
            let e = event(n);
            ids.push(e.id.clone());
            store.push(e);
        }
        (store, ids)
    }

    #[test]
    fn test_store_push_and_list() {
        let (store, ids) = store_with(3);

        assert_eq!(store.len(), 3);
        let listed: Vec<_> = store.list(None, usize::MAX).into_iter().map(|e| e.id).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_store_list_limit() {
        let (store, ids) = store_with(5);

        let listed = store.list(None, 2);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, ids[0]);
        assert_eq!(listed[1].id, ids[1]);
    }

    #[test]
    fn test_store_list_is_a_snapshot() {
        let (mut store, ids) = store_with(1);

        let mut snapshot = store.list(None, usize::MAX);
        snapshot[0].retry_count = 99;

        assert_eq!(store.get(&ids[0]).unwrap().retry_count, 0);
        store.clear(None);
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_select_batch_respects_size_and_order() {
        let (store, ids) = store_with(5);
        let policy = RetryPolicy::default();

        let batch = store.select_batch(3, &policy, Utc::now());
        assert_eq!(batch, ids[..3].to_vec());
    }

    #[test]
    fn test_select_batch_skips_syncing() {
        let (mut store, ids) = store_with(2);
        let policy = RetryPolicy::default();
        let now = Utc::now();

        store.begin_sync(&ids[0], now).unwrap();

        let batch = store.select_batch(10, &policy, now);
        assert_eq!(batch, vec![ids[1].clone()]);
    }

    #[test]
    fn test_begin_sync_marks_syncing() {
        let (mut store, ids) = store_with(1);
        let now = Utc::now();

        let event = store.begin_sync(&ids[0], now).unwrap();
        assert_eq!(event.status, EventStatus::Syncing);
        assert_eq!(event.last_attempt_at, Some(now));

        // Cannot begin twice
        assert!(store.begin_sync(&ids[0], now).is_none());
    }

    #[test]
    fn test_complete_moves_to_history() {
        let (mut store, ids) = store_with(1);
        let now = Utc::now();

        store.begin_sync(&ids[0], now).unwrap();
        let synced = store.complete(&ids[0], now).unwrap();

        assert_eq!(synced.status, EventStatus::Synced);
        assert!(store.is_empty());
        assert_eq!(store.list(Some(EventStatus::Synced), 10).len(), 1);
    }

    #[test]
    fn test_complete_requires_syncing() {
        let (mut store, ids) = store_with(1);
        assert!(store.complete(&ids[0], Utc::now()).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_fail_requeues_at_tail() {
        let (mut store, ids) = store_with(3);
        let policy = RetryPolicy::new(3);
        let now = Utc::now();

        store.begin_sync(&ids[0], now).unwrap();
        let outcome = store.fail(&ids[0], "boom".into(), &policy, now).unwrap();

        let FailureOutcome::Requeued(event) = outcome else {
            panic!("expected requeue");
        };
        assert_eq!(event.retry_count, 1);
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.last_error.as_deref(), Some("boom"));

        let order: Vec<_> = store.list(None, usize::MAX).into_iter().map(|e| e.id).collect();
        assert_eq!(order, vec![ids[1].clone(), ids[2].clone(), ids[0].clone()]);
    }

    #[test]
    fn test_fail_gives_up_after_budget() {
        let (mut store, ids) = store_with(1);
        let policy = RetryPolicy::new(2);
        let now = Utc::now();

        store.begin_sync(&ids[0], now).unwrap();
        assert!(matches!(
            store.fail(&ids[0], "e1".into(), &policy, now),
            Some(FailureOutcome::Requeued(_))
        ));

        store.begin_sync(&ids[0], now).unwrap();
        let outcome = store.fail(&ids[0], "e2".into(), &policy, now).unwrap();
        let FailureOutcome::Failed(event) = outcome else {
            panic!("expected failure");
        };

        assert_eq!(event.retry_count, 2);
        assert_eq!(event.last_error.as_deref(), Some("e2"));
        assert!(store.is_empty());
        assert_eq!(store.counts().failed, 1);
    }

    #[test]
    fn test_retry_resurrects_failed_event() {
        let (mut store, ids) = store_with(1);
        let policy = RetryPolicy::new(1);
        let now = Utc::now();

        store.begin_sync(&ids[0], now).unwrap();
        store.fail(&ids[0], "down".into(), &policy, now).unwrap();
        assert!(store.is_empty());

        assert!(store.retry(&ids[0]));
        let event = store.get(&ids[0]).unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_count, 0);
        assert!(event.last_error.is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.counts().failed, 0);
    }

    #[test]
    fn test_retry_resets_pending_event() {
        let (mut store, ids) = store_with(1);
        let policy = RetryPolicy::new(5);
        let now = Utc::now();

        store.begin_sync(&ids[0], now).unwrap();
        store.fail(&ids[0], "flaky".into(), &policy, now).unwrap();

        assert!(store.retry(&ids[0]));
        assert!(store.retry(&ids[0]));
        let event = store.get(&ids[0]).unwrap();
        assert_eq!(event.retry_count, 0);
        assert!(event.last_error.is_none());
    }

    #[test]
    fn test_retry_rejects_syncing_synced_and_unknown() {
        let (mut store, ids) = store_with(2);
        let now = Utc::now();

        store.begin_sync(&ids[0], now).unwrap();
        assert!(!store.retry(&ids[0]));

        store.begin_sync(&ids[1], now).unwrap();
        store.complete(&ids[1], now).unwrap();
        assert!(!store.retry(&ids[1]));

        assert!(!store.retry(&EventId::from("missing")));
    }

    #[test]
    fn test_clear_by_status() {
        let (mut store, ids) = store_with(4);
        let policy = RetryPolicy::new(1);
        let now = Utc::now();

        // ids[0] -> failed, ids[1] -> syncing, ids[2..] pending
        store.begin_sync(&ids[0], now).unwrap();
        store.fail(&ids[0], "x".into(), &policy, now).unwrap();
        store.begin_sync(&ids[1], now).unwrap();

        assert_eq!(store.clear(Some(EventStatus::Failed)), 1);
        let counts = store.counts();
        assert_eq!(counts.failed, 0);
        assert_eq!(counts.syncing, 1);
        assert_eq!(counts.pending, 2);

        assert_eq!(store.clear(Some(EventStatus::Pending)), 2);
        assert_eq!(store.clear(None), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_from_active_and_history() {
        let (mut store, ids) = store_with(2);
        let now = Utc::now();

        store.begin_sync(&ids[1], now).unwrap();
        store.complete(&ids[1], now).unwrap();

        assert!(store.remove(&ids[0]).is_some());
        assert!(store.remove(&ids[1]).is_some());
        assert!(store.remove(&ids[1]).is_none());
        assert_eq!(store.counts(), StoreCounts::default());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut store = EventStore::new(2);
        let now = Utc::now();
        let mut ids = Vec::new();

        for n in 0..3 {
            let e = event(n);
            ids.push(e.id.clone());
            store.push(e);
            store.begin_sync(&ids[n as usize], now).unwrap();
            store.complete(&ids[n as usize], now).unwrap();
        }

        let retained: Vec<_> = store
            .list(Some(EventStatus::Synced), usize::MAX)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(retained, vec![ids[1].clone(), ids[2].clone()]);
    }

    #[test]
    fn test_zero_history_drops_terminal_events() {
        let mut store = EventStore::new(0);
        let e = event(1);
        let id = e.id.clone();
        let now = Utc::now();

        store.push(e);
        store.begin_sync(&id, now).unwrap();
        store.fail(&id, "gone".into(), &RetryPolicy::new(0), now).unwrap();

        assert!(store.get(&id).is_none());
        assert!(!store.retry(&id));
    }

    #[test]
    fn test_release_in_flight() {
        let (mut store, ids) = store_with(3);
        let now = Utc::now();

        store.begin_sync(&ids[0], now).unwrap();
        store.begin_sync(&ids[1], now).unwrap();

        assert_eq!(store.release_in_flight(), 2);
        assert_eq!(store.counts().pending, 3);
        assert_eq!(store.get(&ids[0]).unwrap().retry_count, 0);
    }
}
