use axum::{http::StatusCode, Json};
use serde_json::json;
use uuid::Uuid;

/// (max attempts, window seconds) for issuing verification codes.
pub const SMS_START_LIMIT: (u64, u64) = (5, 15 * 60);
/// (max attempts, window seconds) for submitting verification codes.
pub const SMS_VERIFY_LIMIT: (u64, u64) = (10, 15 * 60);

pub fn sms_start_key(user_id: Uuid) -> String {
    format!("rl:sms_start:{user_id}")
}

pub fn sms_verify_key(user_id: Uuid) -> String {
    format!("rl:sms_verify:{user_id}")
}

/// Checks a rate limit stored in Redis.
///
/// Uses the INCR + EXPIRE strategy:
/// - Increments a counter for `key`
/// - On first increment, sets TTL to `window_secs`
/// - Returns 429 if counter exceeds `max_attempts`
pub async fn check_rate_limit(
    redis: &mut redis::aio::MultiplexedConnection,
    key: &str,
    (max_attempts, window_secs): (u64, u64),
) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    let count: u64 = redis::cmd("INCR")
        .arg(key)
        .query_async(redis)
        .await
        .unwrap_or(0);

    if count == 1 {
        // Set TTL only on first increment to avoid resetting the window on each attempt
        let _: Result<(), _> = redis::cmd("EXPIRE")
            .arg(key)
            .arg(window_secs)
            .query_async(redis)
            .await;
    }

    if count > max_attempts {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Too many attempts. Try again in a few minutes." })),
        ));
    }

    Ok(())
}
