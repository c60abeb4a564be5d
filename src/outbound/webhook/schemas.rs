use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::events::Event;
use crate::domain::ports::Record;
use crate::outbound::webhook::subscription::Subscription;

/// Header carrying the event id (the receiver's idempotency key)
pub const HEADER_EVENT_ID: &str = "X-Webhook-Id";
/// Header carrying the event type
pub const HEADER_EVENT_TYPE: &str = "X-Webhook-Event";
/// Header carrying `sha256=<hex HMAC of the body>`
pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";
/// Header carrying the event timestamp (RFC 3339)
pub const HEADER_TIMESTAMP: &str = "X-Webhook-Timestamp";
/// Header carrying the delivery id, stable across retries
pub const HEADER_DELIVERY_ID: &str = "X-Webhook-Delivery";

/// State of a webhook delivery.
///
/// ```text
/// Pending ──► Delivered
///    │
///    └──► Retrying ──► Retrying ... ──► Delivered | PermanentFailure
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,

    Retrying,

    Delivered,

    PermanentFailure,
}

impl DeliveryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::PermanentFailure)
    }
}

/// One subscription's attempt(s) to receive one event.
///
/// Created once per (event, subscription) pair and mutated in place by
/// every retry; only the ledger writes to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: String,

    pub event_id: String,

    pub subscription_id: String,

    pub url: String,

    pub status: DeliveryState,

    pub http_status: Option<u16>,

    pub error: Option<String>,

    pub attempt_count: u32,

    #[serde(with = "time::serde::rfc3339::option")]
    pub next_retry_at: Option<OffsetDateTime>,

    #[serde(with = "time::serde::rfc3339::option")]
    pub delivered_at: Option<OffsetDateTime>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Delivery {
    /// Create a pending delivery of `event` to `subscription`
    pub fn pending(event: &Event, subscription: &Subscription, now: OffsetDateTime) -> Self {
        Self {
            id: delivery_id(&event.id, &subscription.id),
            event_id: event.id.clone(),
            subscription_id: subscription.id.clone(),
            url: subscription.url.clone(),
            status: DeliveryState::Pending,
            http_status: None,
            error: None,
            attempt_count: 0,
            next_retry_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Id of the one delivery of `event_id` to `subscription_id`.
///
/// Derived from the pair, so queueing the same event twice lands on the same
/// record.
pub fn delivery_id(event_id: &str, subscription_id: &str) -> String {
    let name = format!("{}:{event_id}:{subscription_id}", event_id.len());
    format!(
        "dlv_{}",
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).simple()
    )
}

impl Record for Delivery {
    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Aggregate view over every delivery in the ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStats {
    pub total: usize,

    pub delivered: usize,

    /// Deliveries in `PermanentFailure`
    pub failed: usize,

    pub retrying: usize,

    pub pending: usize,

    /// `delivered / total`, rounded to four decimal places; `0.0` when empty
    pub success_rate: f64,
}

impl DeliveryStats {
    pub fn record(&mut self, state: DeliveryState) {
        self.total += 1;
        match state {
            DeliveryState::Pending => self.pending += 1,
            DeliveryState::Retrying => self.retrying += 1,
            DeliveryState::Delivered => self.delivered += 1,
            DeliveryState::PermanentFailure => self.failed += 1,
        }
        self.success_rate = success_rate(self.delivered, self.total);
    }
}

fn success_rate(delivered: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let ratio = delivered as f64 / total as f64;
    (ratio * 10_000.0).round() / 10_000.0
}
