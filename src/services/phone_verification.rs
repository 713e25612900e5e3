//! One-time-code phone verification and SMS consent.
//!
//! Codes live in `phone_verifications`; a short-lived latch in Redis stands in
//! for the web session so a consent request sent right after a successful
//! verify is never refused by a stale preference read.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::db::Store;
use crate::models::{
    phone_verification::{CodeState, NewPhoneVerification},
    preference::{ConsentRecord, NotificationPreference},
};
use crate::services::{
    best_effort,
    metrics::OTP_COUNTER,
    sms::{normalize_phone, PhoneError, SmsError, SmsService},
    SharedClock,
};

pub const RESEND_COOLDOWN_SECS: i64 = 30;
pub const VERIFY_LOOKBACK: i64 = 5;
pub const LATCH_TTL_SECS: u64 = 600;

#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    InvalidPhone(#[from] PhoneError),
    #[error("SMS is not available right now")]
    NotConfigured,
    #[error("could not send verification code: {0}")]
    Delivery(SmsError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    InvalidPhone(#[from] PhoneError),
    #[error("no active verification code, request a new one")]
    NoActiveCode,
    #[error("verification code has expired")]
    Expired,
    #[error("invalid verification code")]
    Invalid,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ConsentError {
    #[error("verify your phone number before giving SMS consent")]
    PhoneNotVerified,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Remembers the phone a user has just verified, keyed by user.
#[async_trait]
pub trait VerificationLatch: Send + Sync {
    async fn set(&self, user_id: Uuid, phone_e164: &str) -> anyhow::Result<()>;
    async fn get(&self, user_id: Uuid) -> anyhow::Result<Option<String>>;
    async fn clear(&self, user_id: Uuid) -> anyhow::Result<()>;
}

pub struct RedisLatch {
    redis: redis::aio::MultiplexedConnection,
}

impl RedisLatch {
    pub fn new(redis: redis::aio::MultiplexedConnection) -> Self {
        Self { redis }
    }

    fn key(user_id: Uuid) -> String {
        format!("sms:verified:{user_id}")
    }
}

#[async_trait]
impl VerificationLatch for RedisLatch {
    async fn set(&self, user_id: Uuid, phone_e164: &str) -> anyhow::Result<()> {
        let mut conn = self.redis.clone();
        let _: () = redis::cmd("SET")
            .arg(Self::key(user_id))
            .arg(phone_e164)
            .arg("EX")
            .arg(LATCH_TTL_SECS)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> anyhow::Result<Option<String>> {
        let mut conn = self.redis.clone();
        let phone: Option<String> = redis::cmd("GET")
            .arg(Self::key(user_id))
            .query_async(&mut conn)
            .await?;
        Ok(phone.filter(|p| !p.is_empty()))
    }

    async fn clear(&self, user_id: Uuid) -> anyhow::Result<()> {
        let mut conn = self.redis.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(Self::key(user_id))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub phone_e164: String,
    /// False when a code was issued moments ago and nothing was resent.
    pub sent: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    pub phone_e164: String,
    pub verified_at: DateTime<Utc>,
}

/// Grant or withdraw SMS consent.
#[derive(Debug, Clone)]
pub enum ConsentAction {
    Grant(ConsentRecord),
    Withdraw,
}

pub struct PhoneVerificationService {
    store: Arc<dyn Store>,
    sms: Arc<SmsService>,
    latch: Arc<dyn VerificationLatch>,
    clock: SharedClock,
}

fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

impl PhoneVerificationService {
    pub fn new(
        store: Arc<dyn Store>,
        sms: Arc<SmsService>,
        latch: Arc<dyn VerificationLatch>,
        clock: SharedClock,
    ) -> Self {
        Self { store, sms, latch, clock }
    }

    fn normalize(&self, raw: &str) -> Result<String, PhoneError> {
        normalize_phone(raw, self.sms.default_country())
    }

    /// Issues and texts a fresh code. Older unconsumed codes for the same
    /// number are superseded.
    pub async fn start(&self, user_id: Uuid, raw_phone: &str) -> Result<StartOutcome, StartError> {
        let phone = self.normalize(raw_phone)?;
        if !self.sms.is_configured() {
            OTP_COUNTER.with_label_values(&["not_configured"]).inc();
            return Err(StartError::NotConfigured);
        }

        let now = self.clock.now();
        let latest = self.store.recent_unconsumed(user_id, &phone, 1).await?;
        if let Some(last) = latest.first() {
            if last.created_at > now - Duration::seconds(RESEND_COOLDOWN_SECS) {
                tracing::info!(user = %user_id, phone = %phone, "OTP requested within cooldown; not resending");
                OTP_COUNTER.with_label_values(&["cooldown"]).inc();
                return Ok(StartOutcome { phone_e164: phone, sent: false, expires_at: Some(last.expires_at) });
            }
        }

        let superseded = self.store.consume_unconsumed(user_id, &phone, now, None).await?;
        if superseded > 0 {
            tracing::debug!(user = %user_id, superseded, "superseded older verification codes");
        }

        let code = generate_code();
        let pv = self
            .store
            .create_verification(&NewPhoneVerification::new(user_id, &phone, &code, now, None))
            .await?;

        if let Err(e) = self.sms.send_otp(&phone, &code).await {
            tracing::warn!(user = %user_id, phone = %phone, error = %e, "OTP delivery failed");
            OTP_COUNTER.with_label_values(&["send_failed"]).inc();
            // An undelivered code must not hold the cooldown.
            best_effort("consume undelivered code", self.store.consume(pv.id, now).await);
            return Err(match e {
                SmsError::NotConfigured => StartError::NotConfigured,
                other => StartError::Delivery(other),
            });
        }

        tracing::info!(user = %user_id, phone = %phone, "OTP sent");
        OTP_COUNTER.with_label_values(&["sent"]).inc();
        Ok(StartOutcome { phone_e164: phone, sent: true, expires_at: Some(pv.expires_at) })
    }

    /// Checks `code` against the newest unconsumed codes for the number.
    pub async fn verify(
        &self,
        user_id: Uuid,
        raw_phone: &str,
        code: &str,
    ) -> Result<VerifyOutcome, VerifyError> {
        let phone = self.normalize(raw_phone)?;
        let code = code.trim();
        let now = self.clock.now();

        let candidates = self.store.recent_unconsumed(user_id, &phone, VERIFY_LOOKBACK).await?;
        let Some(newest) = candidates.first() else {
            OTP_COUNTER.with_label_values(&["no_active"]).inc();
            return Err(VerifyError::NoActiveCode);
        };

        let Some(matched) = candidates.iter().find(|c| !code.is_empty() && c.code == code) else {
            best_effort("count failed attempt", self.store.increment_attempts(newest.id).await);
            tracing::info!(user = %user_id, "OTP rejected: wrong code");
            OTP_COUNTER.with_label_values(&["invalid"]).inc();
            return Err(VerifyError::Invalid);
        };

        if matched.state(now) == CodeState::Expired {
            OTP_COUNTER.with_label_values(&["expired"]).inc();
            return Err(VerifyError::Expired);
        }

        self.store.consume(matched.id, now).await?;
        best_effort(
            "consume sibling codes",
            self.store.consume_unconsumed(user_id, &phone, now, None).await,
        );

        let mut prefs = self.store.ensure_preferences(user_id, now).await?;
        prefs.mark_phone_verified(&phone, now);
        self.store.save_preferences(&prefs).await?;

        best_effort("set verification latch", self.latch.set(user_id, &phone).await);
        tracing::info!(user = %user_id, phone = %phone, "phone verified");
        OTP_COUNTER.with_label_values(&["verified"]).inc();
        Ok(VerifyOutcome { phone_e164: phone, verified_at: now })
    }

    /// Records or withdraws SMS consent. Granting needs a verified phone,
    /// either persisted or latched by a verify moments ago.
    pub async fn consent(
        &self,
        user_id: Uuid,
        action: ConsentAction,
    ) -> Result<NotificationPreference, ConsentError> {
        let now = self.clock.now();
        let mut prefs = self.store.ensure_preferences(user_id, now).await?;

        match action {
            ConsentAction::Grant(record) => {
                if !prefs.has_verified_phone() {
                    let latched = best_effort("read verification latch", self.latch.get(user_id).await)
                        .flatten();
                    match latched {
                        Some(phone) => prefs.mark_phone_verified(&phone, now),
                        None => return Err(ConsentError::PhoneNotVerified),
                    }
                }
                prefs.record_consent(&record, now);
                self.store.save_preferences(&prefs).await?;
                best_effort("clear verification latch", self.latch.clear(user_id).await);
                OTP_COUNTER.with_label_values(&["consent"]).inc();
                tracing::info!(user = %user_id, "SMS consent recorded");
            }
            ConsentAction::Withdraw => {
                prefs.withdraw_consent(now);
                self.store.save_preferences(&prefs).await?;
                OTP_COUNTER.with_label_values(&["withdrawn"]).inc();
                tracing::info!(user = %user_id, "SMS consent withdrawn");
            }
        }
        Ok(prefs)
    }
}
