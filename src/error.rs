use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::events::InvalidEventType;
use crate::domain::ports::StoreError;
use crate::outbound::webhook::delivery_ledger::LedgerError;
use crate::outbound::webhook::dispatcher::DispatchError;

/// Errors surfaced by the administrative interface.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Delivery not found: {0}")]
    DeliveryNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// JSON error body returned by the admin API.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
}

impl From<InvalidEventType> for WebhookError {
    fn from(err: InvalidEventType) -> Self {
        WebhookError::Validation(err.to_string())
    }
}

impl From<LedgerError> for WebhookError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(id) => WebhookError::DeliveryNotFound(id),
            LedgerError::Store(e) => WebhookError::Store(e),
            other => WebhookError::Internal(other.to_string()),
        }
    }
}

impl From<DispatchError> for WebhookError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::InvalidEvent(reason) => WebhookError::Validation(reason),
            DispatchError::Ledger(e) => e.into(),
            DispatchError::Store(e) => WebhookError::Store(e),
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            WebhookError::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "invalid_url"),
            WebhookError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            WebhookError::SubscriptionNotFound(_) => {
                (StatusCode::NOT_FOUND, "subscription_not_found")
            }
            WebhookError::DeliveryNotFound(_) => (StatusCode::NOT_FOUND, "delivery_not_found"),
            WebhookError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
            WebhookError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
            status: status.as_u16(),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, WebhookError>;
