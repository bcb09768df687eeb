//! Sync event model and per-event state machine.

use crate::OutboxError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque, process-unique event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Domain source of a sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Declaration,
    Payment,
    Shipment,
    Tariff,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Declaration => "declaration",
            EventKind::Payment => "payment",
            EventKind::Shipment => "shipment",
            EventKind::Tariff => "tariff",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "declaration" => Ok(EventKind::Declaration),
            "payment" => Ok(EventKind::Payment),
            "shipment" => Ok(EventKind::Shipment),
            "tariff" => Ok(EventKind::Tariff),
            _ => Err(OutboxError::InvalidValue {
                field: "kind",
                value: s.to_string(),
            }),
        }
    }
}

/// Change applied to the domain record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Create,
    Update,
    Delete,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Create => "create",
            EventAction::Update => "update",
            EventAction::Delete => "delete",
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventAction {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(EventAction::Create),
            "update" => Ok(EventAction::Update),
            "delete" => Ok(EventAction::Delete),
            _ => Err(OutboxError::InvalidValue {
                field: "action",
                value: s.to_string(),
            }),
        }
    }
}

/// Delivery status of a sync event.
///
/// ```text
/// Pending ──▶ Syncing ──▶ Synced
///    ▲           │
///    └───────────┤ (failed, budget left)
///                ▼
///              Failed ──(manual retry)──▶ Pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Waiting for a drain cycle to pick it up.
    Pending,
    /// Currently being delivered.
    Syncing,
    /// Delivered (terminal).
    Synced,
    /// Retry budget exhausted (terminal until manually retried).
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Syncing => "syncing",
            EventStatus::Synced => "synced",
            EventStatus::Failed => "failed",
        }
    }

    /// Returns true for statuses that leave the active queue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Synced | EventStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal edge.
    ///
    /// `Syncing -> Pending` covers both the automatic requeue after a failed
    /// attempt and the release of in-flight events when a batch aborts.
    /// `Failed -> Pending` is only taken by an explicit manual retry.
    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (EventStatus::Pending, EventStatus::Syncing)
                | (EventStatus::Syncing, EventStatus::Synced)
                | (EventStatus::Syncing, EventStatus::Pending)
                | (EventStatus::Syncing, EventStatus::Failed)
                | (EventStatus::Failed, EventStatus::Pending)
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(EventStatus::Pending),
            "syncing" => Ok(EventStatus::Syncing),
            "synced" => Ok(EventStatus::Synced),
            "failed" => Ok(EventStatus::Failed),
            _ => Err(OutboxError::InvalidValue {
                field: "status",
                value: s.to_string(),
            }),
        }
    }
}

/// A domain change waiting to be forwarded to the system of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub id: EventId,
    pub kind: EventKind,
    pub action: EventAction,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub status: EventStatus,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the most recent delivery attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Earliest time a requeued event may be picked up again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// When the event reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncEvent {
    /// Create a new pending event owning `payload`.
    pub fn new(kind: EventKind, action: EventAction, payload: serde_json::Value) -> Self {
        Self {
            id: EventId::new(),
            kind,
            action,
            payload,
            created_at: Utc::now(),
            status: EventStatus::Pending,
            retry_count: 0,
            last_error: None,
            last_attempt_at: None,
            next_attempt_at: None,
            finished_at: None,
        }
    }

    /// Move to `next` if the edge is legal. Returns false otherwise.
    pub(crate) fn transition(&mut self, next: EventStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Reset the retry bookkeeping after an administrative retry.
    pub(crate) fn reset_for_retry(&mut self) {
        self.retry_count = 0;
        self.last_error = None;
        self.next_attempt_at = None;
        self.finished_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_event_is_pending() {
        let event = SyncEvent::new(
            EventKind::Declaration,
            EventAction::Create,
            serde_json::json!({"declarationId": "D-1"}),
        );

        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_count, 0);
        assert!(event.last_error.is_none());
        assert!(!event.id.as_str().is_empty());
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = EventId::new();
        let b = EventId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_allowed_transitions() {
        use EventStatus::*;

        assert!(Pending.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Synced));
        assert!(Syncing.can_transition_to(Pending));
        assert!(Syncing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));

        // No skipping Syncing
        assert!(!Pending.can_transition_to(Synced));
        assert!(!Pending.can_transition_to(Failed));
        // Synced is final
        assert!(!Synced.can_transition_to(Pending));
        assert!(!Synced.can_transition_to(Syncing));
        assert!(!Failed.can_transition_to(Syncing));
    }

    #[test]
    fn test_transition_rejects_illegal_edge() {
        let mut event = SyncEvent::new(EventKind::Payment, EventAction::Update, serde_json::Value::Null);

        assert!(!event.transition(EventStatus::Synced));
        assert_eq!(event.status, EventStatus::Pending);

        assert!(event.transition(EventStatus::Syncing));
        assert!(event.transition(EventStatus::Synced));
        assert_eq!(event.status, EventStatus::Synced);
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!("Failed".parse::<EventStatus>().unwrap(), EventStatus::Failed);
        assert_eq!("PENDING".parse::<EventStatus>().unwrap(), EventStatus::Pending);
        assert!("done".parse::<EventStatus>().is_err());
    }

    #[test]
    fn test_kind_and_action_parse() {
        assert_eq!("tariff".parse::<EventKind>().unwrap(), EventKind::Tariff);
        assert_eq!("Shipment".parse::<EventKind>().unwrap(), EventKind::Shipment);
        assert_eq!("delete".parse::<EventAction>().unwrap(), EventAction::Delete);

        let err = "invoice".parse::<EventKind>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid kind: invoice");
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = SyncEvent::new(
            EventKind::Shipment,
            EventAction::Delete,
            serde_json::json!({"shipmentId": 7}),
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "shipment");
        assert_eq!(json["action"], "delete");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["retryCount"], 0);
        assert!(json.get("createdAt").is_some());
        assert!(json.get("lastError").is_none());
    }
}
