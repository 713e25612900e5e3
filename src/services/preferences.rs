use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::db::Store;
use crate::models::preference::{NotificationPreference, PreferenceUpdate};
use crate::services::{
    sms::{normalize_phone, PhoneError},
    SharedClock,
};

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("verify your phone number and agree to SMS terms before enabling texts")]
    SmsRequiresVerifiedPhone,
    #[error(transparent)]
    InvalidPhone(#[from] PhoneError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct PreferenceService {
    store: Arc<dyn Store>,
    default_country: String,
    clock: SharedClock,
}

impl PreferenceService {
    pub fn new(store: Arc<dyn Store>, default_country: impl Into<String>, clock: SharedClock) -> Self {
        Self { store, default_country: default_country.into(), clock }
    }

    /// Returns the user's row, creating the all-off defaults on first access.
    pub async fn get(&self, user_id: Uuid) -> anyhow::Result<NotificationPreference> {
        self.store.ensure_preferences(user_id, self.clock.now()).await
    }

    /// Applies a partial update. A changed number revokes verification and
    /// consent in the same write, whatever else the update asks for.
    pub async fn update(
        &self,
        user_id: Uuid,
        update: PreferenceUpdate,
    ) -> Result<NotificationPreference, PreferenceError> {
        let now = self.clock.now();
        let mut prefs = self.store.ensure_preferences(user_id, now).await?;
        let previous_e164 = prefs.phone_e164.clone();

        if let Some(raw) = update.phone_number.as_deref().map(str::trim) {
            if raw.is_empty() {
                prefs.phone_number.clear();
                prefs.phone_e164.clear();
            } else {
                prefs.phone_e164 = normalize_phone(raw, &self.default_country)?;
                prefs.phone_number = raw.to_string();
            }
        }

        prefs.apply(&update);
        if prefs.revoke_if_phone_changed(&previous_e164) {
            tracing::info!(user = %user_id, "phone number changed; SMS verification and consent revoked");
        }

        if prefs.sms_enabled && !(prefs.sms_opt_in && prefs.has_verified_phone()) {
            return Err(PreferenceError::SmsRequiresVerifiedPhone);
        }

        prefs.updated_at = now;
        self.store.save_preferences(&prefs).await?;
        Ok(prefs)
    }
}
