use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::domain::events::{Event, EventType};
use crate::error::ApiResult;
use crate::server::AppState;
use crate::server::responses::QueuedEventResponse;

/// Body of `POST /events`; `id` and `timestamp` are filled in when absent
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub event_type: String,

    pub owner_id: String,

    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,

    #[serde(default)]
    pub data: Value,
}

impl EventRequest {
    fn into_event(self) -> ApiResult<Event> {
        let event_type = EventType::parse(self.event_type)?;
        let mut event = Event::new(event_type, self.owner_id, self.data);
        if let Some(id) = self.id {
            event = event.with_id(id);
        }
        if let Some(timestamp) = self.timestamp {
            event = event.with_timestamp(timestamp);
        }
        Ok(event)
    }
}

pub async fn queue_event(
    State(state): State<AppState>,
    Json(request): Json<EventRequest>,
) -> ApiResult<(StatusCode, Json<QueuedEventResponse>)> {
    let event = request.into_event()?;
    let event_id = event.id.clone();
    let deliveries = state.manager.queue_event(event).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(QueuedEventResponse::new(event_id, &deliveries)),
    ))
}
