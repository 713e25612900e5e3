use std::env;

use crate::services::{context::SiteUrls, gating::QuietHours};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub internal_api_key: String,
    pub host: String,
    pub port: u16,
    pub notify: NotifyConfig,
}

/// Everything the notification engine needs, resolved once at startup and
/// handed to the dispatcher, senders and verification service.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub sms: SmsSettings,
    pub email: EmailSettings,
    pub quiet_hours: QuietHours,
    pub site: SiteUrls,
}

#[derive(Debug, Clone)]
pub struct SmsSettings {
    pub enabled: bool,
    pub provider: String,
    pub api_key: Option<String>,
    pub sender: String,
    pub endpoint: String,
    pub default_country: String,
    pub test_number: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct EmailSettings {
    pub backend: EmailBackend,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
    pub subject_prefix: String,
    pub redirect_to: Option<String>,
    pub whitelist: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmailBackend {
    #[default]
    Smtp,
    Console,
}

pub const BREVO_SMS_ENDPOINT: &str = "https://api.brevo.com/v3/transactionalSMS/send";

impl Default for SmsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "brevo".into(),
            api_key: None,
            sender: "ROYALS".into(),
            endpoint: BREVO_SMS_ENDPOINT.into(),
            default_country: "US".into(),
            test_number: None,
            timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            jwt_secret: required("JWT_SECRET")?,
            internal_api_key: required("INTERNAL_API_KEY")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            notify: NotifyConfig::from_env()?,
        })
    }
}

impl NotifyConfig {
    /// Reads only the notification keys; the `dispatch-event` binary uses this
    /// without needing the HTTP server settings.
    pub fn from_env() -> anyhow::Result<Self> {
        let start = hour("NOTIFY_QUIET_HOURS_START", 22)?;
        let end = hour("NOTIFY_QUIET_HOURS_END", 8)?;

        Ok(Self {
            sms: SmsSettings {
                enabled: flag("ENABLE_SMS"),
                provider: optional("SMS_PROVIDER")
                    .unwrap_or_else(|| "brevo".into())
                    .to_lowercase(),
                api_key: optional("BREVO_API_KEY").or_else(|| optional("BREVO_SMS_API_KEY")),
                sender: optional("BREVO_SMS_SENDER").unwrap_or_else(|| "ROYALS".into()),
                endpoint: optional("BREVO_SMS_ENDPOINT").unwrap_or_else(|| BREVO_SMS_ENDPOINT.into()),
                default_country: optional("SMS_DEFAULT_COUNTRY")
                    .unwrap_or_else(|| "US".into())
                    .to_uppercase(),
                test_number: optional("SMS_TEST_NUMBER"),
                timeout_secs: env::var("SMS_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".into())
                    .parse()?,
            },
            email: EmailSettings {
                backend: match optional("EMAIL_BACKEND").as_deref() {
                    Some("console") => EmailBackend::Console,
                    _ => EmailBackend::Smtp,
                },
                smtp_host: optional("SMTP_HOST"),
                smtp_port: env::var("SMTP_PORT").ok().and_then(|v| v.parse().ok()),
                smtp_username: optional("SMTP_USERNAME"),
                smtp_password: optional("SMTP_PASSWORD"),
                smtp_from: optional("SMTP_FROM"),
                subject_prefix: env::var("EMAIL_SUBJECT_PREFIX").unwrap_or_default(),
                redirect_to: optional("EMAIL_REDIRECT_TO"),
                whitelist: env::var("EMAIL_WHITELIST")
                    .unwrap_or_default()
                    .split(',')
                    .map(|a| a.trim().to_lowercase())
                    .filter(|a| !a.is_empty())
                    .collect(),
            },
            quiet_hours: QuietHours::new(start, end),
            site: SiteUrls {
                base_url: optional("SITE_BASE_URL"),
                domain: optional("SITE_DOMAIN"),
                secure: flag("SECURE_SSL_REDIRECT"),
            },
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn flag(key: &str) -> bool {
    matches!(
        env::var(key).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

fn hour(key: &str, default: u32) -> anyhow::Result<u32> {
    let value: u32 = match optional(key) {
        Some(raw) => raw.parse()?,
        None => default,
    };
    if value > 23 {
        anyhow::bail!("{key} must be an hour between 0 and 23, got {value}");
    }
    Ok(value)
}
