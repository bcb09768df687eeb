//! Outbox engine: producer API, scheduler, drain cycle and administration.

use crate::{
    BatchSummary, EventAction, EventId, EventKind, EventStatus, EventStore, FailureOutcome,
    Notifier, OutboxConfig, OutboxError, OutboxNotification, OutboxResult, OutboxStats,
    RetryPolicy, SyncEvent, Transport,
};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Narrow producer seam for domain collaborators.
///
/// Declaration, payment, shipment and tariff services depend on this trait
/// rather than on the whole engine.
pub trait SyncEventProducer: Send + Sync {
    /// Enqueues a domain change for delivery. Never blocks, never rejects.
    fn enqueue(&self, kind: EventKind, action: EventAction, payload: serde_json::Value) -> EventId;
}

/// Single-flight guard for drain cycles. Released on drop, including
/// while unwinding.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Handle to the running scheduler task.
struct Worker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner {
    config: OutboxConfig,
    policy: RetryPolicy,
    store: Mutex<EventStore>,
    transport: Arc<dyn Transport>,
    notifier: Notifier,
    draining: AtomicBool,
    last_sync_time: Mutex<Option<DateTime<Utc>>>,
    worker: Mutex<Option<Worker>>,
}

/// The synchronization outbox.
///
/// Construct one at process start and hand clones to collaborators; every
/// clone shares the same queue, scheduler and notification channel.
///
/// # Lifecycle
///
/// 1. Create with [`SyncOutbox::new()`]
/// 2. Call [`SyncOutbox::start()`] to spawn the scheduler (inside a Tokio runtime)
/// 3. Producers call [`SyncOutbox::enqueue()`]
/// 4. Call [`SyncOutbox::stop()`] to stop future ticks
///
/// Events live in memory only; anything unsynced is lost when the process exits.
#[derive(Clone)]
pub struct SyncOutbox {
    inner: Arc<Inner>,
}

impl SyncOutbox {
    /// Create a new outbox delivering through `transport`.
    pub fn new(config: OutboxConfig, transport: Arc<dyn Transport>) -> OutboxResult<Self> {
        config.validate()?;

        let inner = Inner {
            policy: config.retry_policy(),
            store: Mutex::new(EventStore::new(config.history_capacity)),
            transport,
            notifier: Notifier::new(config.notification_capacity),
            draining: AtomicBool::new(false),
            last_sync_time: Mutex::new(None),
            worker: Mutex::new(None),
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &OutboxConfig {
        &self.inner.config
    }

    /// Enqueue a domain change. The payload is moved into the event.
    pub fn enqueue(
        &self,
        kind: EventKind,
        action: EventAction,
        payload: serde_json::Value,
    ) -> EventId {
        let event = SyncEvent::new(kind, action, payload);
        let id = event.id.clone();

        self.inner.store.lock().push(event.clone());

        debug!(event_id = %id, kind = %kind, action = %action, "Enqueued sync event");
        self.inner
            .notifier
            .emit(OutboxNotification::EventAdded(event));
        id
    }

    /// Serialize `payload` and enqueue it.
    pub fn enqueue_serialized<T: Serialize>(
        &self,
        kind: EventKind,
        action: EventAction,
        payload: &T,
    ) -> OutboxResult<EventId> {
        let value = serde_json::to_value(payload)?;
        Ok(self.enqueue(kind, action, value))
    }

    /// Start the periodic scheduler.
    ///
    /// Returns false if it is already running.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut worker = self.inner.worker.lock();
        if let Some(existing) = worker.as_ref() {
            if !existing.handle.is_finished() {
                debug!("Outbox scheduler already running");
                return false;
            }
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let tick_interval = self.inner.config.tick_interval;
        let handle = tokio::spawn(run_scheduler(
            Arc::downgrade(&self.inner),
            tick_interval,
            shutdown_rx,
        ));
        *worker = Some(Worker { shutdown, handle });

        info!(
            tick_interval_ms = tick_interval.as_millis() as u64,
            batch_size = self.inner.config.batch_size,
            max_retries = self.inner.config.max_retries,
            "Outbox scheduler started"
        );
        true
    }

    /// Stop future ticks. A drain cycle already in flight runs to completion.
    ///
    /// Returns false if the scheduler was not running.
    pub fn stop(&self) -> bool {
        let Some(worker) = self.inner.worker.lock().take() else {
            return false;
        };
        let _ = worker.shutdown.send(());
        info!("Outbox scheduler stopping");
        true
    }

    /// Stop the scheduler and wait for an in-flight drain cycle to finish.
    pub async fn stop_and_wait(&self) -> bool {
        let Some(worker) = self.inner.worker.lock().take() else {
            return false;
        };
        let _ = worker.shutdown.send(());
        if let Err(e) = worker.handle.await {
            warn!(error = %e, "Outbox scheduler task ended abnormally");
        }
        info!("Outbox scheduler stopped");
        true
    }

    /// Whether the scheduler is ticking.
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Run one drain cycle now, independent of the scheduler.
    ///
    /// Returns `None` when another cycle holds the guard or nothing is due.
    pub async fn drain_now(&self) -> Option<BatchSummary> {
        self.inner.drain().await
    }

    /// Reset an event's retry budget and make it pending again.
    ///
    /// Works on pending events and on failed events still held in history.
    pub fn retry(&self, id: &EventId) -> bool {
        let retried = self.inner.store.lock().retry(id);
        if retried {
            info!(event_id = %id, "Event queued for manual retry");
        } else {
            debug!(event_id = %id, "Manual retry rejected");
        }
        retried
    }

    /// Remove an event from the queue or history.
    pub fn remove(&self, id: &EventId) -> bool {
        let removed = self.inner.store.lock().remove(id).is_some();
        if removed {
            info!(event_id = %id, "Removed sync event");
        }
        removed
    }

    /// Remove every event with `status`, or everything when `None`.
    pub fn clear(&self, status: Option<EventStatus>) -> usize {
        let cleared = self.inner.store.lock().clear(status);
        info!(
            status = status.map(|s| s.as_str()).unwrap_or("all"),
            count = cleared,
            "Cleared sync events"
        );
        cleared
    }

    /// Current statistics.
    pub fn stats(&self) -> OutboxStats {
        self.inner.stats()
    }

    /// Snapshot of events, optionally filtered by status, truncated to `limit`.
    pub fn list(&self, status: Option<EventStatus>, limit: usize) -> Vec<SyncEvent> {
        self.inner.store.lock().list(status, limit)
    }

    /// Look up a single event.
    pub fn get(&self, id: &EventId) -> Option<SyncEvent> {
        self.inner.store.lock().get(id)
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<OutboxNotification> {
        self.inner.notifier.subscribe()
    }

    /// Invoke `callback` for each notification on its own task.
    pub fn subscribe_with<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnMut(OutboxNotification) + Send + 'static,
    {
        self.inner.notifier.subscribe_with(callback)
    }
}

impl SyncEventProducer for SyncOutbox {
    fn enqueue(&self, kind: EventKind, action: EventAction, payload: serde_json::Value) -> EventId {
        SyncOutbox::enqueue(self, kind, action, payload)
    }
}

impl Inner {
    fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map_or(false, |w| !w.handle.is_finished())
    }

    fn stats(&self) -> OutboxStats {
        let counts = self.store.lock().counts();
        OutboxStats::from_counts(
            counts,
            self.draining.load(Ordering::Acquire),
            self.is_running(),
            *self.last_sync_time.lock(),
        )
    }

    /// One drain cycle: select a batch, deliver each event in order, apply
    /// the state machine, then report.
    async fn drain(&self) -> Option<BatchSummary> {
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            debug!("Drain cycle already in progress, skipping tick");
            return None;
        };

        let started_at = Utc::now();
        let batch = self
            .store
            .lock()
            .select_batch(self.config.batch_size, &self.policy, started_at);
        if batch.is_empty() {
            return None;
        }

        debug!(count = batch.len(), "Starting drain cycle");
        let outcome = AssertUnwindSafe(self.process_batch(batch, started_at))
            .catch_unwind()
            .await;
        self.finish_batch(outcome)
    }

    async fn process_batch(&self, batch: Vec<EventId>, started_at: DateTime<Utc>) -> BatchSummary {
        let mut summary = BatchSummary::new(batch.len(), started_at);

        for id in batch {
            let event = self.store.lock().begin_sync(&id, Utc::now());
            let Some(event) = event else {
                debug!(event_id = %id, "Event left the queue before delivery");
                summary.skipped += 1;
                continue;
            };

            let result = self.deliver(&event).await;
            let now = Utc::now();

            match result {
                Ok(()) => {
                    let synced = self.store.lock().complete(&id, now);
                    match synced {
                        Some(synced) => {
                            summary.synced += 1;
                            debug!(event_id = %id, kind = %synced.kind, "Event synced");
                            self.notifier.emit(OutboxNotification::EventSynced(synced));
                        }
                        None => {
                            debug!(event_id = %id, "Event removed while in flight");
                            summary.skipped += 1;
                        }
                    }
                }
                Err(e) => {
                    let outcome = self.store.lock().fail(&id, e.to_string(), &self.policy, now);
                    match outcome {
                        Some(FailureOutcome::Requeued(requeued)) => {
                            summary.requeued += 1;
                            warn!(
                                event_id = %id,
                                retry_count = requeued.retry_count,
                                max_retries = self.policy.max_retries,
                                error = %e,
                                "Delivery failed, requeued"
                            );
                            self.notifier
                                .emit(OutboxNotification::EventRetrying(requeued));
                        }
                        Some(FailureOutcome::Failed(failed)) => {
                            summary.failed += 1;
                            error!(
                                event_id = %id,
                                retry_count = failed.retry_count,
                                error = %e,
                                "Delivery failed permanently"
                            );
                            self.notifier.emit(OutboxNotification::EventFailed(failed));
                        }
                        None => {
                            debug!(event_id = %id, "Event removed while in flight");
                            summary.skipped += 1;
                        }
                    }
                }
            }
        }

        summary
    }

    /// Deliver one event. Timeouts and transport panics become ordinary failures.
    async fn deliver(&self, event: &SyncEvent) -> OutboxResult<()> {
        let attempt = AssertUnwindSafe(self.transport.deliver(event)).catch_unwind();

        let outcome = match self.config.delivery_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(OutboxError::Timeout(timeout)),
            },
            None => attempt.await,
        };

        outcome.unwrap_or_else(|panic| {
            Err(OutboxError::Delivery(format!(
                "transport panicked: {}",
                panic_message(panic.as_ref())
            )))
        })
    }

    /// Record the end of a batch and emit the batch-level notification.
    fn finish_batch(
        &self,
        outcome: Result<BatchSummary, Box<dyn Any + Send>>,
    ) -> Option<BatchSummary> {
        let finished_at = Utc::now();
        *self.last_sync_time.lock() = Some(finished_at);

        match outcome {
            Ok(mut summary) => {
                summary.finished_at = finished_at;
                info!(
                    selected = summary.selected,
                    synced = summary.synced,
                    requeued = summary.requeued,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "Drain cycle complete"
                );
                self.notifier
                    .emit(OutboxNotification::BatchComplete(summary.clone()));
                Some(summary)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                let released = self.store.lock().release_in_flight();
                error!(error = %message, released = released, "Drain cycle aborted");
                self.notifier
                    .emit(OutboxNotification::BatchError { message });
                None
            }
        }
    }
}

/// Scheduler loop: drain on every tick until shut down or every handle is dropped.
async fn run_scheduler(
    inner: Weak<Inner>,
    tick_interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.drain().await;
            }
        }
    }

    debug!("Outbox scheduler loop exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
