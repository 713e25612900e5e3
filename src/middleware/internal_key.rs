use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use crate::AppState;

/// Extractor that validates the `X-Internal-Key` header against
/// `config.internal_api_key`. Guards the endpoints league code calls into.
pub struct InternalAuth;

impl FromRequestParts<AppState> for InternalAuth {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get("X-Internal-Key")
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing X-Internal-Key header"))?;

        if key != state.config.internal_api_key {
            return Err((StatusCode::UNAUTHORIZED, "Invalid internal key"));
        }

        Ok(InternalAuth)
    }
}
