//! Lifecycle notifications for observers (logging, UI badges, audit).

use crate::{BatchSummary, SyncEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default capacity of the notification channel.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

/// Notifications emitted by the outbox.
#[derive(Debug, Clone)]
pub enum OutboxNotification {
    /// A producer enqueued a new event.
    EventAdded(SyncEvent),
    /// A failed attempt was requeued for another try.
    EventRetrying(SyncEvent),
    /// The event was delivered.
    EventSynced(SyncEvent),
    /// The event exhausted its retry budget.
    EventFailed(SyncEvent),
    /// A drain cycle finished.
    BatchComplete(BatchSummary),
    /// A drain cycle aborted unexpectedly.
    BatchError { message: String },
}

impl OutboxNotification {
    /// Stable channel name for this notification.
    pub fn name(&self) -> &'static str {
        match self {
            OutboxNotification::EventAdded(_) => "event-added",
            OutboxNotification::EventRetrying(_) => "event-retrying",
            OutboxNotification::EventSynced(_) => "event-synced",
            OutboxNotification::EventFailed(_) => "event-failed",
            OutboxNotification::BatchComplete(_) => "batch-complete",
            OutboxNotification::BatchError { .. } => "batch-error",
        }
    }

    /// The event carried by per-event notifications.
    pub fn event(&self) -> Option<&SyncEvent> {
        match self {
            OutboxNotification::EventAdded(e)
            | OutboxNotification::EventRetrying(e)
            | OutboxNotification::EventSynced(e)
            | OutboxNotification::EventFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// Fan-out of outbox notifications.
///
/// Emitting never blocks: a subscriber that falls behind loses the oldest
/// notifications instead of stalling the drain cycle.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<OutboxNotification>,
}

impl Notifier {
    /// Create a notifier buffering up to `capacity` notifications per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a notification to all current subscribers.
    pub fn emit(&self, notification: OutboxNotification) {
        let name = notification.name();
        // No subscribers is not an error.
        if self.sender.send(notification).is_err() {
            debug!(notification = name, "No subscribers for notification");
        }
    }

    /// Subscribe to notifications emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OutboxNotification> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Invoke `callback` for every notification on a dedicated task.
    ///
    /// A panicking callback ends only its own task. Must be called from
    /// within a Tokio runtime.
    pub fn subscribe_with<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(OutboxNotification) + Send + 'static,
    {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(notification) => callback(notification),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Notification subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_CAPACITY)
    }
}
