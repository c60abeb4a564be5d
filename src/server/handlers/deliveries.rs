use axum::Json;
use axum::extract::{Path, State};

use crate::error::ApiResult;
use crate::outbound::webhook::schemas::{Delivery, DeliveryStats};
use crate::server::AppState;

pub async fn get_delivery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Delivery>> {
    Ok(Json(state.manager.get_delivery_status(&id).await?))
}

pub async fn get_delivery_stats(State(state): State<AppState>) -> ApiResult<Json<DeliveryStats>> {
    Ok(Json(state.manager.get_delivery_stats().await?))
}
