//! HTTP transport for delivering sync events to the system of record.

use crate::{EventAction, EventId, EventKind, OutboxError, OutboxResult, SyncEvent, Transport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Base URL of the system of record API.
    pub endpoint_url: String,
    /// Bearer token attached to every request, if any.
    pub auth_token: Option<String>,
    /// Request timeout; `None` leaves requests unbounded.
    pub timeout: Option<Duration>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://localhost:8080".to_string(),
            auth_token: None,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Request payload for a single event.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeliverEventRequest<'a> {
    event_id: &'a EventId,
    kind: EventKind,
    action: EventAction,
    payload: &'a serde_json::Value,
    created_at: DateTime<Utc>,
    /// 1-based attempt number.
    attempt: u32,
}

/// Optional acknowledgement body returned by the system of record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliverEventResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

fn default_success() -> bool {
    true
}

/// HTTP transport posting each event as JSON.
pub struct HttpTransport {
    config: SenderConfig,
    client: Client,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    pub fn new(config: SenderConfig) -> OutboxResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self { config, client })
    }

    /// Target URL for event delivery.
    pub fn events_url(&self) -> String {
        format!("{}/sync-events", self.config.endpoint_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, event: &SyncEvent) -> OutboxResult<()> {
        let url = self.events_url();
        let request = DeliverEventRequest {
            event_id: &event.id,
            kind: event.kind,
            action: event.action,
            payload: &event.payload,
            created_at: event.created_at,
            attempt: event.retry_count.saturating_add(1),
        };

        debug!(
            url = %url,
            event_id = %event.id,
            kind = %event.kind,
            attempt = request.attempt,
            "Sending event"
        );

        let mut builder = self.client.post(&url).json(&request);
        if let Some(token) = &self.config.auth_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OutboxError::Delivery(format!("HTTP {}: {}", status, body)));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(());
        }

        let result: DeliverEventResponse = serde_json::from_str(&body)?;
        if result.success {
            Ok(())
        } else {
            Err(OutboxError::Delivery(
                result.error.unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }
}
