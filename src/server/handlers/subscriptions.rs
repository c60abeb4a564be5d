use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::outbound::webhook::manager::NewSubscription;
use crate::outbound::webhook::schemas::Delivery;
use crate::outbound::webhook::subscription::Subscription;
use crate::server::AppState;
use crate::server::responses::ListResponse;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerQuery {
    pub owner_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ActiveToggle {
    pub active: bool,
}

pub async fn create_subscription(
    State(state): State<AppState>,
    Json(request): Json<NewSubscription>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    let subscription = state.manager.register_subscription(request).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Json<ListResponse<Subscription>> {
    Json(ListResponse::new(
        state.manager.list_subscriptions(&query.owner_id).await,
    ))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(state.manager.get_subscription(&id).await?))
}

pub async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.manager.unregister_subscription(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_subscription_active(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(toggle): Json<ActiveToggle>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(
        state
            .manager
            .set_subscription_active(&id, toggle.active)
            .await?,
    ))
}

pub async fn list_subscription_deliveries(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ListResponse<Delivery>>> {
    Ok(Json(ListResponse::new(
        state.manager.list_deliveries(&id).await?,
    )))
}
