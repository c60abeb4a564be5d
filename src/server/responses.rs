use serde::Serialize;

use crate::outbound::webhook::schemas::Delivery;

/// Generic list envelope shared by the listing endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T: Serialize> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T: Serialize> ListResponse<T> {
    pub fn new(items: Vec<T>) -> Self {
        let total = items.len();
        Self { items, total }
    }
}

/// Reply to `POST /events`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedEventResponse {
    pub event_id: String,
    pub deliveries: Vec<String>,
}

impl QueuedEventResponse {
    pub fn new(event_id: String, deliveries: &[Delivery]) -> Self {
        Self {
            event_id,
            deliveries: deliveries.iter().map(|d| d.id.clone()).collect(),
        }
    }
}
