//! # Customs sync outbox
//!
//! In-process outbox that takes domain change events (declarations,
//! payments, shipments, tariffs) and forwards them to the external system
//! of record with bounded retry and observable state.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐ enqueue ┌─────────────┐  tick   ┌──────────────┐ deliver ┌──────────────┐
//! │ Producers  │────────▶│ EventStore  │◀───────│ Drain cycle  │────────▶│  Transport   │
//! └────────────┘         └─────────────┘        │ (single-     │         └──────────────┘
//!                               ▲               │  flight)     │
//!                               │ stats/list    └──────┬───────┘
//!                        ┌──────┴──────┐               │ emit
//!                        │ Admin API   │        ┌──────▼───────┐
//!                        └─────────────┘        │  Notifier    │
//!                                               └──────────────┘
//! ```
//!
//! - Delivery is at-least-once. Failed events are requeued at the tail, so
//!   there is no ordering guarantee across retries.
//! - Events live in memory only; unsynced events are lost on restart.
//! - Retry delay defaults to the tick interval; exponential backoff is opt-in.
//!
//! ## Example
//!
//! ```ignore
//! use customs_sync_outbox::{EventAction, EventKind, OutboxConfig, SyncOutbox};
//!
//! let outbox = SyncOutbox::new(OutboxConfig::default(), transport)?;
//! outbox.start();
//!
//! let id = outbox.enqueue(EventKind::Declaration, EventAction::Create, payload);
//! println!("{:?}", outbox.stats());
//! ```

mod config;
mod engine;
mod error;
mod event;
mod notifier;
mod retry;
mod sender;
mod stats;
mod store;
mod transport;

pub use config::{
    OutboxConfig, DEFAULT_BATCH_SIZE, DEFAULT_DELIVERY_TIMEOUT, DEFAULT_MAX_RETRIES,
    DEFAULT_TICK_INTERVAL,
};
pub use engine::{SyncEventProducer, SyncOutbox};
pub use error::{OutboxError, OutboxResult};
pub use event::{EventAction, EventId, EventKind, EventStatus, SyncEvent};
pub use notifier::{Notifier, OutboxNotification, DEFAULT_NOTIFICATION_CAPACITY};
pub use retry::{Backoff, RetryDecision, RetryPolicy};
pub use sender::{HttpTransport, SenderConfig};
pub use stats::{BatchSummary, OutboxStats};
pub use store::{EventStore, FailureOutcome, StoreCounts, DEFAULT_HISTORY_CAPACITY};
pub use transport::{RecordingTransport, Transport};
