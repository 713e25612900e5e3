pub mod health;
pub mod internal;
pub mod metrics;
pub mod notifications;
pub mod phone;
pub mod preferences;
pub mod sms_status;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

pub(crate) fn internal_error(e: impl std::fmt::Display) -> ApiError {
    tracing::error!("request failed: {}", e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, e)
}
