use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    models::{auth::AuthenticatedUser, notification::InboxFilter},
    routes::{api_error, internal_error, ApiError},
    services::inbox::BulkAction,
    AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct InboxQuery {
    #[serde(default)]
    pub status: InboxFilter,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub action: BulkAction,
    #[serde(default)]
    pub ids: Vec<Uuid>,
}

pub async fn list_inbox(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<InboxQuery>,
) -> Result<Json<Value>, ApiError> {
    let entries = state
        .inbox
        .list(user.user_id, query.status, query.limit)
        .await
        .map_err(internal_error)?;
    let unread = state.inbox.unread_count(user.user_id).await.map_err(internal_error)?;
    Ok(Json(json!({ "results": entries, "unread": unread })))
}

pub async fn unread_count(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    let unread = state.inbox.unread_count(user.user_id).await.map_err(internal_error)?;
    Ok(Json(json!({ "unread": unread })))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    let updated = state.inbox.mark_all_read(user.user_id).await.map_err(internal_error)?;
    Ok(Json(json!({ "updated": updated })))
}

pub async fn bulk(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<BulkRequest>,
) -> Result<Json<Value>, ApiError> {
    let updated = state
        .inbox
        .bulk(user.user_id, body.action, &body.ids)
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "updated": updated })))
}

pub async fn open(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(receipt_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    match state.inbox.open(user.user_id, receipt_id).await.map_err(internal_error)? {
        Some(url) => Ok(Json(json!({ "url": url }))),
        None => Err(api_error(StatusCode::NOT_FOUND, "Notification not found")),
    }
}

/// Delivery history for one notification, including suppressed and failed
/// attempts. Staff only.
pub async fn deliveries(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    if !user.is_staff() {
        return Err(api_error(StatusCode::FORBIDDEN, "Staff only"));
    }
    let attempts = state
        .store
        .attempts_for_notification(notification_id)
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "results": attempts })))
}
