use axum::{extract::State, http::StatusCode, Json};

use crate::{
    models::{
        auth::AuthenticatedUser,
        preference::{NotificationPreference, PreferenceUpdate},
    },
    routes::{api_error, internal_error, ApiError},
    services::preferences::PreferenceError,
    AppState,
};

pub async fn get_preferences(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<NotificationPreference>, ApiError> {
    state
        .preferences
        .get(user.user_id)
        .await
        .map(Json)
        .map_err(internal_error)
}

pub async fn update_preferences(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<PreferenceUpdate>,
) -> Result<Json<NotificationPreference>, ApiError> {
    state
        .preferences
        .update(user.user_id, body)
        .await
        .map(Json)
        .map_err(|e| match e {
            PreferenceError::Store(e) => internal_error(e),
            e => api_error(StatusCode::BAD_REQUEST, e),
        })
}
