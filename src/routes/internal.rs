//! Endpoints the league application calls when something happens.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{
    middleware::internal_key::InternalAuth,
    routes::{internal_error, ApiError},
    services::{
        dispatch::DispatchRequest,
        lineup::{lineup_published, LineupPublished},
    },
    AppState,
};

pub async fn dispatch(
    State(state): State<AppState>,
    _auth: InternalAuth,
    Json(body): Json<DispatchRequest>,
) -> Result<Json<Value>, ApiError> {
    let out = state.dispatcher.dispatch(body).await.map_err(internal_error)?;
    Ok(Json(json!({
        "notification_id": out.notification.id,
        "recipients": out.recipients,
        "attempts": out.attempts,
    })))
}

pub async fn lineup(
    State(state): State<AppState>,
    _auth: InternalAuth,
    Json(body): Json<LineupPublished>,
) -> Result<Json<Value>, ApiError> {
    let out = lineup_published(&state.dispatcher, body).await.map_err(internal_error)?;
    Ok(Json(json!({
        "notification_id": out.notification_id,
        "recipients": out.recipients,
        "attempts": out.attempts,
    })))
}
