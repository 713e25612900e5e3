use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    middleware::rate_limit::{
        check_rate_limit, sms_start_key, sms_verify_key, SMS_START_LIMIT, SMS_VERIFY_LIMIT,
    },
    models::{auth::AuthenticatedUser, preference::ConsentRecord},
    routes::{api_error, internal_error, ApiError},
    services::phone_verification::{ConsentAction, ConsentError, StartError, VerifyError},
    AppState,
};

pub const DEFAULT_CONSENT_TEXT: &str =
    "I agree to receive text messages from the Royals Industrial League. Msg & data rates may apply. Reply STOP to opt out.";

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub phone: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct ConsentRequest {
    pub agree: bool,
    #[serde(default)]
    pub consent_text: Option<String>,
}

pub async fn start(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<StartRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut redis = state.redis.clone();
    check_rate_limit(&mut redis, &sms_start_key(user.user_id), SMS_START_LIMIT).await?;

    let out = state.phone.start(user.user_id, &body.phone).await.map_err(|e| match e {
        StartError::InvalidPhone(e) => api_error(StatusCode::BAD_REQUEST, e),
        StartError::NotConfigured => api_error(StatusCode::SERVICE_UNAVAILABLE, e),
        StartError::Delivery(_) => api_error(StatusCode::BAD_GATEWAY, e),
        StartError::Store(e) => internal_error(e),
    })?;

    Ok(Json(json!({
        "ok": true,
        "phone": out.phone_e164,
        "sent": out.sent,
        "expires_at": out.expires_at,
    })))
}

pub async fn verify(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut redis = state.redis.clone();
    check_rate_limit(&mut redis, &sms_verify_key(user.user_id), SMS_VERIFY_LIMIT).await?;

    match state.phone.verify(user.user_id, &body.phone, &body.code).await {
        Ok(out) => Ok(Json(json!({
            "ok": true,
            "phone": out.phone_e164,
            "verified_at": out.verified_at,
        }))),
        Err(VerifyError::Store(e)) => Err(internal_error(e)),
        Err(e) => {
            let reason = match e {
                VerifyError::Expired => "expired",
                VerifyError::NoActiveCode => "no_active_code",
                VerifyError::InvalidPhone(_) => "invalid_phone",
                _ => "invalid",
            };
            Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string(), "reason": reason })),
            ))
        }
    }
}

pub async fn consent(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(body): Json<ConsentRequest>,
) -> Result<Json<Value>, ApiError> {
    let action = if body.agree {
        ConsentAction::Grant(ConsentRecord {
            text: body
                .consent_text
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONSENT_TEXT.to_string()),
            ip: client_ip(&headers),
            user_agent: header(&headers, "user-agent").unwrap_or_default(),
        })
    } else {
        ConsentAction::Withdraw
    };

    let prefs = state.phone.consent(user.user_id, action).await.map_err(|e| match e {
        ConsentError::PhoneNotVerified => api_error(StatusCode::BAD_REQUEST, e),
        ConsentError::Store(e) => internal_error(e),
    })?;

    Ok(Json(json!({
        "ok": true,
        "sms_opt_in": prefs.sms_opt_in,
        "sms_enabled": prefs.sms_enabled,
    })))
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP` (set by nginx).
fn client_ip(headers: &HeaderMap) -> Option<String> {
    header(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .or_else(|| header(headers, "x-real-ip"))
}
