use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Default lifetime of an issued code.
pub const CODE_TTL_MINUTES: i64 = 10;

/// One issued one-time code. Rows are kept after use for audit and cooldowns.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PhoneVerification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub phone_e164: String,
    #[serde(skip_serializing)]
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: i16,
    pub consumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeState {
    Active,
    Expired,
    /// Accepted, superseded by a newer code, or cleaned up after a sibling matched.
    Consumed,
}

impl PhoneVerification {
    pub fn state(&self, now: DateTime<Utc>) -> CodeState {
        if self.consumed_at.is_some() {
            CodeState::Consumed
        } else if now > self.expires_at {
            CodeState::Expired
        } else {
            CodeState::Active
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPhoneVerification {
    pub user_id: Uuid,
    pub phone_e164: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewPhoneVerification {
    /// `expires_at` defaults to [`CODE_TTL_MINUTES`] after `created_at`.
    pub fn new(
        user_id: Uuid,
        phone_e164: &str,
        code: &str,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            user_id,
            phone_e164: phone_e164.to_string(),
            code: code.to_string(),
            created_at,
            expires_at: expires_at.unwrap_or(created_at + Duration::minutes(CODE_TTL_MINUTES)),
        }
    }
}
