use axum::{extract::State, http::StatusCode, Form, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    routes::{api_error, internal_error, ApiError},
    services::status_callback::apply_status_callback,
    AppState,
};

/// Provider delivery report, posted as a form.
#[derive(Debug, Deserialize)]
pub struct StatusCallback {
    #[serde(rename = "MessageSid")]
    pub message_sid: Option<String>,
    #[serde(rename = "MessageStatus")]
    pub message_status: Option<String>,
}

/// POST /webhooks/sms/status. Answers 200 for unknown ids so the provider
/// stops retrying.
pub async fn sms_status_callback(
    State(state): State<AppState>,
    Form(form): Form<StatusCallback>,
) -> Result<Json<Value>, ApiError> {
    let sid = form.message_sid.as_deref().map(str::trim).unwrap_or_default();
    let status = form.message_status.as_deref().map(str::trim).unwrap_or_default();
    if sid.is_empty() || status.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "MessageSid and MessageStatus are required"));
    }

    apply_status_callback(state.store.as_ref(), sid, status)
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "ok": true })))
}
