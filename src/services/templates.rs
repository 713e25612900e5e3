use anyhow::Context;
use handlebars::Handlebars;
use serde_json::json;

use crate::services::catalog::{EventKey, OTP_SMS_TEMPLATE};
use crate::services::context::TemplateContext;

/// Longest SMS body handed to the provider.
pub const MAX_SMS_CHARS: usize = 1600;

const OTP: &str = "otp";

/// Compiled templates for every event, registered once at startup.
///
/// Subjects render strictly so a missing variable falls back to the event's
/// default subject. Plain text and SMS are lenient and unescaped. HTML bodies
/// keep handlebars' escaping.
pub struct TemplateSet {
    subjects: Handlebars<'static>,
    plain: Handlebars<'static>,
    html: Handlebars<'static>,
}

impl TemplateSet {
    pub fn new() -> anyhow::Result<Self> {
        let mut subjects = Handlebars::new();
        subjects.set_strict_mode(true);
        subjects.register_escape_fn(handlebars::no_escape);

        let mut plain = Handlebars::new();
        plain.register_escape_fn(handlebars::no_escape);

        let mut html = Handlebars::new();

        for key in EventKey::ALL {
            let spec = key.spec();
            let name = key.as_str();
            subjects
                .register_template_string(name, spec.subject)
                .with_context(|| format!("subject template for {name}"))?;
            plain
                .register_template_string(&text_name(key), spec.email_text)
                .with_context(|| format!("text template for {name}"))?;
            plain
                .register_template_string(&sms_name(key), spec.sms)
                .with_context(|| format!("sms template for {name}"))?;
            if let Some(body) = spec.email_html {
                html.register_template_string(name, body)
                    .with_context(|| format!("html template for {name}"))?;
            }
        }
        plain
            .register_template_string(OTP, OTP_SMS_TEMPLATE)
            .context("otp template")?;

        Ok(Self { subjects, plain, html })
    }

    /// Never fails: render errors and blank output both yield the default.
    pub fn subject(&self, event: EventKey, ctx: &TemplateContext) -> String {
        match self.subjects.render(event.as_str(), ctx) {
            Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
            Ok(_) => event.spec().default_subject.to_string(),
            Err(e) => {
                tracing::debug!(event = %event, error = %e, "subject fell back to default");
                event.spec().default_subject.to_string()
            }
        }
    }

    /// Text body and optional HTML fragment (not yet wrapped in the layout).
    pub fn email_body(
        &self,
        event: EventKey,
        ctx: &TemplateContext,
    ) -> anyhow::Result<(String, Option<String>)> {
        let text = self
            .plain
            .render(&text_name(event), ctx)
            .with_context(|| format!("render text body for {event}"))?;
        let html = if self.html.has_template(event.as_str()) {
            Some(
                self.html
                    .render(event.as_str(), ctx)
                    .with_context(|| format!("render html body for {event}"))?,
            )
        } else {
            None
        };
        Ok((text, html))
    }

    /// Plain text, trimmed and capped at [`MAX_SMS_CHARS`].
    pub fn sms(&self, event: EventKey, ctx: &TemplateContext) -> anyhow::Result<String> {
        let body = self
            .plain
            .render(&sms_name(event), ctx)
            .with_context(|| format!("render sms body for {event}"))?;
        Ok(cap_sms(&body))
    }

    pub fn otp(&self, code: &str) -> anyhow::Result<String> {
        let body = self
            .plain
            .render(OTP, &json!({ "code": code }))
            .context("render otp sms")?;
        Ok(cap_sms(&body))
    }
}

fn text_name(key: EventKey) -> String {
    format!("{}.txt", key.as_str())
}

fn sms_name(key: EventKey) -> String {
    format!("{}.sms", key.as_str())
}

fn cap_sms(body: &str) -> String {
    body.trim().chars().take(MAX_SMS_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> TemplateContext {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn every_event_template_compiles() {
        assert!(TemplateSet::new().is_ok());
    }

    #[test]
    fn subject_uses_recipient_name() {
        let t = TemplateSet::new().unwrap();
        let s = t.subject(EventKey::LineupPublishedForPlayer, &ctx(&[("first_name", "Dana")]));
        assert_eq!(s, "Dana: You're in the Royals Lineup!");
    }

    #[test]
    fn subject_missing_variable_falls_back() {
        let t = TemplateSet::new().unwrap();
        let s = t.subject(EventKey::LineupPublishedForPlayer, &TemplateContext::new());
        assert_eq!(s, "Royals: You're in the lineup!");

        let s = t.subject(EventKey::Generic, &ctx(&[("title", "  ")]));
        assert_eq!(s, "Royals Industrial League");
    }

    #[test]
    fn html_escapes_but_text_does_not() {
        let t = TemplateSet::new().unwrap();
        let c = ctx(&[("first_name", "Ann & Bo"), ("title", "t"), ("body", "b")]);
        let (text, html) = t.email_body(EventKey::Generic, &c).unwrap();
        assert!(text.contains("Hi Ann & Bo"));
        assert!(html.unwrap().contains("Ann &amp; Bo"));
    }

    #[test]
    fn lenient_bodies_skip_absent_sections() {
        let t = TemplateSet::new().unwrap();
        let c = ctx(&[("first_name", "Dana"), ("notification_url", "http://x/f/1")]);
        let (text, _) = t.email_body(EventKey::LineupPublishedForPlayer, &c).unwrap();
        assert!(text.starts_with("Hi Dana,"));
        assert!(!text.contains("partner"));
        assert!(text.contains("http://x/f/1"));
    }

    #[test]
    fn sms_is_capped() {
        let t = TemplateSet::new().unwrap();
        let long = "x".repeat(MAX_SMS_CHARS * 2);
        let body = t.sms(EventKey::Generic, &ctx(&[("title", &long)])).unwrap();
        assert_eq!(body.chars().count(), MAX_SMS_CHARS);
    }

    #[test]
    fn otp_message_carries_code() {
        let t = TemplateSet::new().unwrap();
        assert!(t.otp("042917").unwrap().contains("042917"));
    }
}
