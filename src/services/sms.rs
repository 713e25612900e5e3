use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::config::SmsSettings;
use crate::models::{
    notification::{DeliveryAttempt, MAX_ERROR_LEN},
    preference::NotificationPreference,
};
use crate::services::{catalog::EventKey, context::TemplateContext, templates::TemplateSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhoneError {
    #[error("phone number is required")]
    Empty,
    #[error("invalid phone number")]
    Invalid,
}

#[derive(Debug, thiserror::Error)]
pub enum SmsError {
    #[error("SMS disabled/misconfigured")]
    NotConfigured,
    #[error(transparent)]
    Phone(#[from] PhoneError),
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("{status} {body}")]
    Status { status: u16, body: String },
    #[error("render: {0}")]
    Render(String),
}

fn calling_code(country: &str) -> Option<&'static str> {
    Some(match country.trim().to_uppercase().as_str() {
        "US" | "CA" | "PR" => "1",
        "GB" | "UK" => "44",
        "IE" => "353",
        "AU" => "61",
        "NZ" => "64",
        "DE" => "49",
        "FR" => "33",
        "ES" => "34",
        "IT" => "39",
        "NL" => "31",
        "MX" => "52",
        "IN" => "91",
        "PH" => "63",
        _ => return None,
    })
}

/// Normalizes user input to E.164.
///
/// Non-digits are dropped, a leading `00` counts as `+`, and numbers without
/// a country prefix get the default country's calling code.
pub fn normalize_phone(raw: &str, default_country: &str) -> Result<String, PhoneError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PhoneError::Empty);
    }

    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(PhoneError::Invalid);
    }

    let international = if raw.starts_with('+') {
        digits
    } else if raw.starts_with("00") {
        digits[2..].to_string()
    } else {
        let code = calling_code(default_country).ok_or(PhoneError::Invalid)?;
        if code == "1" {
            if digits.len() == 11 && digits.starts_with('1') {
                digits
            } else {
                format!("1{digits}")
            }
        } else {
            format!("{code}{}", digits.trim_start_matches('0'))
        }
    };

    if international.starts_with('0') || !(8..=15).contains(&international.len()) {
        return Err(PhoneError::Invalid);
    }
    if international.starts_with('1') && international.len() != 11 {
        return Err(PhoneError::Invalid);
    }
    Ok(format!("+{international}"))
}

/// Brevo transactional SMS client.
pub struct SmsService {
    client: Client,
    settings: SmsSettings,
    templates: Arc<TemplateSet>,
}

impl SmsService {
    pub fn new(settings: &SmsSettings, templates: Arc<TemplateSet>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self { client, settings: settings.clone(), templates })
    }

    /// Feature flag on, provider is brevo and an API key is present.
    pub fn is_configured(&self) -> bool {
        self.settings.enabled && self.settings.provider == "brevo" && self.settings.api_key.is_some()
    }

    pub fn default_country(&self) -> &str {
        &self.settings.default_country
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    /// Posts one message. Returns the provider message id when the response
    /// carries one.
    pub async fn send_text(&self, to_e164: &str, content: &str) -> Result<Option<String>, SmsError> {
        let api_key = match (&self.settings.api_key, self.is_configured()) {
            (Some(k), true) => k,
            _ => return Err(SmsError::NotConfigured),
        };

        let payload = json!({
            "sender": self.settings.sender,
            "recipient": to_e164,
            "content": content,
            "type": "transactional",
        });

        tracing::info!(
            to = %to_e164,
            sender = %self.settings.sender,
            len = content.chars().count(),
            "Attempting Brevo SMS"
        );

        let response = self
            .client
            .post(&self.settings.endpoint)
            .header("api-key", api_key)
            .header("accept", "application/json")
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if matches!(status, StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED) {
            Ok(message_id(&text))
        } else {
            tracing::warn!("Brevo SMS error {}: {}", status, text);
            Err(SmsError::Status {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_LEN).collect(),
            })
        }
    }

    pub async fn send_otp(&self, to_e164: &str, code: &str) -> Result<Option<String>, SmsError> {
        let body = self.templates.otp(code).map_err(|e| SmsError::Render(e.to_string()))?;
        self.send_text(to_e164, &body).await
    }

    /// Sends one event SMS and records the outcome on `attempt`. Template
    /// errors are returned for the caller to record as a failure.
    pub async fn deliver(
        &self,
        event: EventKey,
        ctx: &TemplateContext,
        prefs: &NotificationPreference,
        attempt: &mut DeliveryAttempt,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if !self.is_configured() {
            attempt.mark_suppressed(SmsError::NotConfigured.to_string());
            return Ok(());
        }

        let phone = match self.destination(prefs) {
            Ok(p) => p,
            Err(reason) => {
                attempt.mark_failed(reason);
                return Ok(());
            }
        };
        attempt.destination = phone.clone();

        let body = self.templates.sms(event, ctx)?;

        attempt.sent_at = Some(now);
        match self.send_text(&phone, &body).await {
            Ok(id) => attempt.mark_sent(now, id),
            Err(e) => attempt.mark_failed(e.to_string()),
        }
        Ok(())
    }

    /// The staging override wins; otherwise the stored number must still be
    /// verified at send time.
    fn destination(&self, prefs: &NotificationPreference) -> Result<String, String> {
        if let Some(test) = &self.settings.test_number {
            return normalize_phone(test, &self.settings.default_country)
                .map_err(|e| format!("SMS_TEST_NUMBER: {e}"));
        }
        if !prefs.has_verified_phone() {
            return Err("no verified phone".into());
        }
        normalize_phone(&prefs.phone_e164, &self.settings.default_country)
            .map_err(|_| "no verified phone".to_string())
    }
}

fn message_id(body: &str) -> Option<String> {
    let data: Value = serde_json::from_str(body).ok()?;
    let id = match data.get("messageId")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(id).filter(|s| !s.is_empty())
}
