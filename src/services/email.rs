use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use uuid::Uuid;

use crate::config::{EmailBackend, EmailSettings};
use crate::models::{notification::DeliveryAttempt, user::UserAccount};
use crate::services::{
    catalog::{EventKey, DEFAULT_SUBJECT},
    context::TemplateContext,
    templates::TemplateSet,
};

const DEV_REDIRECT_TAG: &str = "[DEV-REDIRECT]";

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

/// Email transport. Returns how many recipients the transport accepted.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<usize>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Returns None if SMTP is not fully configured.
    pub fn new(settings: &EmailSettings) -> Option<Self> {
        let host = settings.smtp_host.as_deref()?;
        let username = settings.smtp_username.clone()?;
        let password = settings.smtp_password.clone()?;
        let from_addr = settings.smtp_from.as_deref()?;

        let port = settings.smtp_port.unwrap_or(587);
        let creds = Credentials::new(username, password);

        let transport = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .ok()?
                .port(port)
                .credentials(creds)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .ok()?
                .port(port)
                .credentials(creds)
                .build()
        };

        let from: Mailbox = from_addr.parse().ok()?;

        Some(Self { transport, from })
    }

    fn new_message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.from.email.domain())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<usize> {
        let to: Mailbox = email
            .to
            .parse()
            .with_context(|| format!("Invalid recipient address: {}", email.to))?;

        let text_part = SinglePart::builder()
            .header(ContentType::TEXT_PLAIN)
            .body(email.text);

        let builder = Message::builder()
            .message_id(Some(self.new_message_id()))
            .from(self.from.clone())
            .to(to)
            .subject(email.subject);

        let message = match email.html {
            Some(html) => builder.multipart(
                MultiPart::alternative().singlepart(text_part).singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(html),
                ),
            ),
            None => builder.singlepart(text_part),
        }
        .context("Failed to build email message")?;

        self.transport
            .send(message)
            .await
            .context("Failed to send email")?;

        Ok(1)
    }
}

/// Local development backend: logs instead of sending.
pub struct ConsoleMailer;

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<usize> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            html = email.html.is_some(),
            "[console email]\n{}",
            email.text
        );
        Ok(1)
    }
}

/// Renders event emails and hands them to the configured [`Mailer`].
pub struct EmailSender {
    mailer: Option<Arc<dyn Mailer>>,
    templates: Arc<TemplateSet>,
    settings: EmailSettings,
    site_base: String,
}

impl EmailSender {
    pub fn from_settings(settings: &EmailSettings, templates: Arc<TemplateSet>, site_base: String) -> Self {
        let mailer: Option<Arc<dyn Mailer>> = match settings.backend {
            EmailBackend::Console => Some(Arc::new(ConsoleMailer)),
            EmailBackend::Smtp => match SmtpMailer::new(settings) {
                Some(m) => Some(Arc::new(m)),
                None => {
                    tracing::warn!("SMTP not configured, email attempts will be suppressed");
                    None
                }
            },
        };
        Self { mailer, templates, settings: settings.clone(), site_base }
    }

    pub fn with_mailer(
        mailer: Option<Arc<dyn Mailer>>,
        templates: Arc<TemplateSet>,
        settings: EmailSettings,
        site_base: String,
    ) -> Self {
        Self { mailer, templates, settings, site_base }
    }

    pub fn is_configured(&self) -> bool {
        self.mailer.is_some()
    }

    /// Sends one event email and records the outcome on `attempt`. The attempt
    /// is stamped with `now` whether or not the transport accepts it; an `Err`
    /// means the caller must mark it failed.
    pub async fn deliver(
        &self,
        event: EventKey,
        ctx: &TemplateContext,
        user: &UserAccount,
        subject_override: Option<&str>,
        attempt: &mut DeliveryAttempt,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mailer = self
            .mailer
            .as_ref()
            .context("email transport not configured")?;

        let to = if attempt.destination.trim().is_empty() {
            user.email.trim().to_string()
        } else {
            attempt.destination.trim().to_string()
        };
        if to.is_empty() {
            anyhow::bail!("no email address");
        }

        let (text, html) = self.templates.email_body(event, ctx)?;
        let subject = match subject_override.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s.to_string(),
            None => self.templates.subject(event, ctx),
        };
        let subject = format!("{}{}", self.settings.subject_prefix, subject);
        let (to, subject) = redirect_for_dev(&self.settings, to, subject);

        attempt.sent_at = Some(now);
        let accepted = mailer
            .send(OutgoingEmail {
                to,
                subject,
                text,
                html: html.map(|h| wrap_html(&self.site_base, &h)),
            })
            .await?;

        if accepted > 0 {
            attempt.mark_sent(now, None);
        } else {
            attempt.mark_failed("no recipients accepted");
        }
        Ok(())
    }
}

/// With `EMAIL_REDIRECT_TO` set, mail for any non-whitelisted address goes
/// to the redirect inbox instead and the subject is tagged.
fn redirect_for_dev(settings: &EmailSettings, to: String, subject: String) -> (String, String) {
    let Some(redirect) = settings.redirect_to.as_deref() else {
        return (to, subject);
    };
    if settings.whitelist.iter().any(|w| *w == to.to_lowercase()) {
        return (to, subject);
    }
    let subject = if subject.contains(DEV_REDIRECT_TAG) {
        subject
    } else {
        format!("{DEV_REDIRECT_TAG} {subject}").trim().to_string()
    };
    (redirect.to_string(), subject)
}

/// Wraps an event's HTML fragment in the league's email layout.
fn wrap_html(site_base: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width,initial-scale=1">
  <title>{DEFAULT_SUBJECT}</title>
</head>
<body style="margin:0;padding:0;background-color:#f1f5f9;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,Helvetica,Arial,sans-serif">
  <table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="background-color:#f1f5f9;padding:40px 16px">
    <tr>
      <td align="center">
        <table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="max-width:520px">
          <tr>
            <td align="center" style="padding-bottom:28px">
              <p style="margin:0;font-size:20px;font-weight:700;color:#1e3a8a;text-align:center">{DEFAULT_SUBJECT}</p>
            </td>
          </tr>
          <tr>
            <td style="background:#ffffff;border-radius:12px;padding:40px;font-size:15px;color:#334155;line-height:1.6;box-shadow:0 1px 3px rgba(0,0,0,0.08),0 8px 24px rgba(0,0,0,0.04)">
              {content}
            </td>
          </tr>
          <tr>
            <td align="center" style="padding-top:20px">
              <p style="margin:0;font-size:12px;color:#94a3b8">You receive this because of your notification settings at <a href="{site_base}/notifications/preferences" style="color:#94a3b8">{site_base}</a>.</p>
            </td>
          </tr>
        </table>
      </td>
    </tr>
  </table>
</body>
</html>"#
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::models::notification::{Channel, DeliveryStatus};

    /// Records every message and accepts a fixed number of recipients.
    pub struct StubMailer {
        pub sent: Mutex<Vec<OutgoingEmail>>,
        pub accept: usize,
        pub fail: bool,
    }

    impl StubMailer {
        pub fn accepting() -> Arc<Self> {
            Arc::new(Self { sent: Mutex::new(vec![]), accept: 1, fail: false })
        }

        pub fn failing() -> Arc<Self> {
            Arc::new(Self { sent: Mutex::new(vec![]), accept: 0, fail: true })
        }
    }

    #[async_trait]
    impl Mailer for StubMailer {
        async fn send(&self, email: OutgoingEmail) -> anyhow::Result<usize> {
            self.sent.lock().unwrap().push(email);
            if self.fail {
                anyhow::bail!("smtp connection refused");
            }
            Ok(self.accept)
        }
    }

    fn user() -> UserAccount {
        UserAccount {
            id: Uuid::new_v4(),
            email: "casey@example.com".into(),
            first_name: "Casey".into(),
            last_name: "Ng".into(),
            is_staff: false,
            is_captain: false,
        }
    }

    fn attempt(user_id: Uuid, to: &str) -> DeliveryAttempt {
        DeliveryAttempt {
            id: Uuid::new_v4(),
            notification_id: Uuid::new_v4(),
            user_id,
            channel: Channel::Email,
            destination: to.into(),
            provider_message_id: String::new(),
            error: String::new(),
            status: DeliveryStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            sent_at: None,
        }
    }

    fn sender(mailer: Arc<StubMailer>, settings: EmailSettings) -> EmailSender {
        EmailSender::with_mailer(
            Some(mailer),
            Arc::new(TemplateSet::new().unwrap()),
            settings,
            "http://localhost:8000".into(),
        )
    }

    fn ctx() -> TemplateContext {
        let mut c = TemplateContext::new();
        c.insert("first_name".into(), json!("Casey"));
        c
    }

    #[tokio::test]
    async fn accepted_message_is_sent_with_html_alternative() {
        let mailer = StubMailer::accepting();
        let s = sender(mailer.clone(), EmailSettings { subject_prefix: "[stg] ".into(), ..Default::default() });
        let u = user();
        let mut a = attempt(u.id, "");
        let now = Utc::now();

        s.deliver(EventKey::LineupPublishedForPlayer, &ctx(), &u, None, &mut a, now)
            .await
            .unwrap();

        assert_eq!(a.status, DeliveryStatus::Sent);
        assert_eq!(a.sent_at, Some(now));
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent[0].to, "casey@example.com");
        assert_eq!(sent[0].subject, "[stg] Casey: You're in the Royals Lineup!");
        assert!(sent[0].html.as_deref().unwrap().contains("<!DOCTYPE html>"));
    }

    #[tokio::test]
    async fn zero_accepted_recipients_is_a_failure_but_still_stamped() {
        let mailer = Arc::new(StubMailer { sent: Mutex::new(vec![]), accept: 0, fail: false });
        let s = sender(mailer, EmailSettings::default());
        let u = user();
        let mut a = attempt(u.id, "other@example.com");
        s.deliver(EventKey::Generic, &ctx(), &u, Some("Rainout"), &mut a, Utc::now())
            .await
            .unwrap();
        assert_eq!(a.status, DeliveryStatus::Failed);
        assert!(a.sent_at.is_some());
    }

    #[tokio::test]
    async fn transport_errors_propagate_after_stamping() {
        let s = sender(StubMailer::failing(), EmailSettings::default());
        let u = user();
        let mut a = attempt(u.id, "");
        let err = s
            .deliver(EventKey::Generic, &ctx(), &u, None, &mut a, Utc::now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("refused"));
        assert!(a.sent_at.is_some());
    }

    #[tokio::test]
    async fn subject_override_replaces_rendered_subject() {
        let mailer = StubMailer::accepting();
        let s = sender(mailer.clone(), EmailSettings::default());
        let u = user();
        let mut a = attempt(u.id, "");
        s.deliver(EventKey::MatchReminder24h, &ctx(), &u, Some("Moved to Court 3"), &mut a, Utc::now())
            .await
            .unwrap();
        assert_eq!(mailer.sent.lock().unwrap()[0].subject, "Moved to Court 3");
    }

    #[test]
    fn dev_redirect_respects_whitelist() {
        let settings = EmailSettings {
            redirect_to: Some("dev@example.com".into()),
            whitelist: vec!["captain@example.com".into()],
            ..Default::default()
        };
        let (to, subject) = redirect_for_dev(&settings, "someone@example.com".into(), "Hi".into());
        assert_eq!(to, "dev@example.com");
        assert_eq!(subject, "[DEV-REDIRECT] Hi");

        let (to, subject) = redirect_for_dev(&settings, "Captain@Example.com".into(), "Hi".into());
        assert_eq!(to, "Captain@Example.com");
        assert_eq!(subject, "Hi");

        let (_, subject) = redirect_for_dev(&settings, "x@example.com".into(), "[DEV-REDIRECT] Hi".into());
        assert_eq!(subject, "[DEV-REDIRECT] Hi");
    }

    #[test]
    fn no_redirect_when_unset() {
        let (to, _) = redirect_for_dev(&EmailSettings::default(), "a@b.c".into(), "s".into());
        assert_eq!(to, "a@b.c");
    }
}
