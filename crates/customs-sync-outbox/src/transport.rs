//! Transport abstraction used by the drain cycle to reach the system of record.

use crate::{EventId, OutboxError, OutboxResult, SyncEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// Delivers one event to the external system.
///
/// Any `Err` is treated as retryable; the retry policy alone decides when
/// an event becomes terminal. Implementations may take arbitrarily long,
/// the engine bounds each call with its configured delivery timeout.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, event: &SyncEvent) -> OutboxResult<()>;
}

/// Deterministic in-memory transport for tests and local runs.
///
/// Records every attempt in order and fails according to a script.
pub struct RecordingTransport {
    attempts: Mutex<Vec<EventId>>,
    delivered: Mutex<Vec<SyncEvent>>,
    fail_all: AtomicBool,
    fail_ids: Mutex<HashSet<EventId>>,
    fail_times: Mutex<HashMap<EventId, u32>>,
    panic_ids: Mutex<HashSet<EventId>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    gate: watch::Sender<bool>,
    entered: Notify,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    /// Create a transport that accepts every event.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            attempts: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            fail_all: AtomicBool::new(false),
            fail_ids: Mutex::new(HashSet::new()),
            fail_times: Mutex::new(HashMap::new()),
            panic_ids: Mutex::new(HashSet::new()),
            delay: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            gate,
            entered: Notify::new(),
        }
    }

    /// Create a transport that rejects every event.
    pub fn always_failing() -> Self {
        let transport = Self::new();
        transport.set_fail_all(true);
        transport
    }

    /// Toggle failure for every event.
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Always fail deliveries of `id`.
    pub fn fail_event(&self, id: &EventId) {
        self.fail_ids.lock().insert(id.clone());
    }

    /// Fail the next `times` deliveries of `id`, then succeed.
    pub fn fail_event_times(&self, id: &EventId, times: u32) {
        self.fail_times.lock().insert(id.clone(), times);
    }

    /// Panic while delivering `id`.
    pub fn panic_on(&self, id: &EventId) {
        self.panic_ids.lock().insert(id.clone());
    }

    /// Sleep this long inside every delivery.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Block deliveries until [`release`](Self::release) is called.
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Let held deliveries proceed.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Wait until a delivery has started.
    pub async fn wait_until_entered(&self) {
        self.entered.notified().await;
    }

    /// Ids of every attempt, in call order.
    pub fn attempts(&self) -> Vec<EventId> {
        self.attempts.lock().clone()
    }

    /// Number of delivery attempts so far.
    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Ids of successfully delivered events, in delivery order.
    pub fn delivered_ids(&self) -> Vec<EventId> {
        self.delivered.lock().iter().map(|e| e.id.clone()).collect()
    }

    /// Copies of successfully delivered events.
    pub fn delivered(&self) -> Vec<SyncEvent> {
        self.delivered.lock().clone()
    }

    /// Highest number of concurrent deliveries observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Deliveries currently inside [`Transport::deliver`].
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn should_fail(&self, id: &EventId) -> bool {
        if self.fail_all.load(Ordering::SeqCst) || self.fail_ids.lock().contains(id) {
            return true;
        }
        let mut fail_times = self.fail_times.lock();
        match fail_times.get_mut(id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Decrements the in-flight counter when a delivery ends or is dropped.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn deliver(&self, event: &SyncEvent) -> OutboxResult<()> {
        self.attempts.lock().push(event.id.clone());
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        let in_flight = InFlightGuard(&self.in_flight);
        self.entered.notify_one();

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        drop(in_flight);

        if self.panic_ids.lock().contains(&event.id) {
            panic!("transport exploded on {}", event.id);
        }

        if self.should_fail(&event.id) {
            return Err(OutboxError::Delivery(format!(
                "system of record rejected {}",
                event.id
            )));
        }

        self.delivered.lock().push(event.clone());
        Ok(())
    }
}
