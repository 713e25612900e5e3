//! Notification fan-out: one [`Notification`], one receipt per recipient,
//! and exactly one EMAIL and one SMS [`DeliveryAttempt`] per recipient.
//!
//! Delivery is synchronous and sequential. Receipts for every recipient are
//! written before the first channel send so a provider outage never hides
//! the in-app entry. Past that point nothing aborts the loop: store and
//! transport errors degrade into logged, recorded attempt outcomes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::NotifyConfig;
use crate::db::Store;
use crate::models::{
    notification::{Channel, DeliveryStatus, NewDeliveryAttempt, NewNotification, Notification},
    preference::NotificationPreference,
    user::{Player, Recipient, UserAccount},
};
use crate::services::{
    best_effort,
    catalog::EventKey,
    context::{recipient_context, SiteUrls, TemplateContext},
    email::EmailSender,
    gating::{Gate, Verdict},
    metrics::{DELIVERY_ATTEMPTS_COUNTER, DISPATCHES_COUNTER},
    sms::SmsService,
    templates::TemplateSet,
    SharedClock,
};

pub const EMAIL_NOT_CONFIGURED: &str = "email transport not configured";

/// Input to [`Dispatcher::dispatch`]. Everything but the event is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchRequest {
    pub event: EventKey,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub season_id: Option<Uuid>,
    #[serde(default)]
    pub fixture_id: Option<Uuid>,
    #[serde(default)]
    pub player_id: Option<Uuid>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Relative or absolute deep link.
    #[serde(default)]
    pub url: String,
    /// Merged into every recipient's template context.
    #[serde(default)]
    pub context: TemplateContext,
    /// Per-user extras merged on top of `context`.
    #[serde(default)]
    pub per_recipient: HashMap<Uuid, TemplateContext>,
    /// Roster entry exposed to templates as `player`, by user id.
    #[serde(default)]
    pub recipient_players: HashMap<Uuid, Player>,
    #[serde(default)]
    pub subject_override: Option<String>,
}

impl DispatchRequest {
    pub fn new(event: EventKey) -> Self {
        Self {
            event,
            recipients: Vec::new(),
            season_id: None,
            fixture_id: None,
            player_id: None,
            title: String::new(),
            body: String::new(),
            url: String::new(),
            context: TemplateContext::new(),
            per_recipient: HashMap::new(),
            recipient_players: HashMap::new(),
            subject_override: None,
        }
    }

    pub fn to_users(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.recipients.extend(ids.into_iter().map(Recipient::from));
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub notification: Notification,
    /// Attempts created across all recipients and channels. Advisory only.
    pub attempts: usize,
    pub recipients: usize,
}

enum Plan {
    Send,
    Suppress(String),
}

struct Delivery<'a> {
    notification: &'a Notification,
    user: &'a UserAccount,
    prefs: &'a NotificationPreference,
    ctx: &'a TemplateContext,
    subject_override: Option<&'a str>,
}

pub struct Dispatcher {
    store: Arc<dyn Store>,
    gate: Gate,
    email: EmailSender,
    sms: Arc<SmsService>,
    site: SiteUrls,
    clock: SharedClock,
}

impl Dispatcher {
    /// Builds the senders from configuration. `sms` is shared with the phone
    /// verification service.
    pub fn new(
        store: Arc<dyn Store>,
        config: &NotifyConfig,
        templates: Arc<TemplateSet>,
        sms: Arc<SmsService>,
        clock: SharedClock,
    ) -> Self {
        let email = EmailSender::from_settings(&config.email, templates, config.site.site_base());
        Self::from_parts(store, Gate::new(config.quiet_hours), email, sms, config.site.clone(), clock)
    }

    pub fn from_parts(
        store: Arc<dyn Store>,
        gate: Gate,
        email: EmailSender,
        sms: Arc<SmsService>,
        site: SiteUrls,
        clock: SharedClock,
    ) -> Self {
        Self { store, gate, email, sms, site, clock }
    }

    pub fn site(&self) -> &SiteUrls {
        &self.site
    }

    pub async fn dispatch(&self, req: DispatchRequest) -> anyhow::Result<DispatchOutcome> {
        let event = req.event;
        let mut players = req.recipient_players.clone();
        let users = self.resolve_recipients(&req.recipients, &mut players).await;

        let now = self.clock.now();
        let title = if req.title.trim().is_empty() {
            event.spec().default_subject.to_string()
        } else {
            req.title.clone()
        };
        let notification = self
            .store
            .create_notification(
                &NewNotification {
                    event,
                    season_id: req.season_id,
                    fixture_id: req.fixture_id,
                    player_id: req.player_id,
                    title,
                    body: req.body.clone(),
                    url: req.url.clone(),
                    expires_at: None,
                },
                now,
            )
            .await?;
        DISPATCHES_COUNTER.with_label_values(&[event.as_str()]).inc();

        for user in &users {
            if let Err(e) = self
                .store
                .get_or_create_receipt(notification.id, user.id, now)
                .await
            {
                tracing::error!(user = %user.id, notification = %notification.id, "receipt not created: {e:#}");
            }
        }

        let mut base = req.context.clone();
        base.entry("title").or_insert_with(|| Value::String(notification.title.clone()));
        base.entry("body").or_insert_with(|| Value::String(notification.body.clone()));

        let mut attempts = 0;
        for user in &users {
            let prefs = match self.store.ensure_preferences(user.id, self.clock.now()).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(user = %user.id, "preferences unavailable, treating as all-off: {e:#}");
                    NotificationPreference::defaults_for(user.id, self.clock.now())
                }
            };
            let ctx = recipient_context(
                &self.site,
                &base,
                &notification.url,
                user,
                players.get(&user.id),
                req.per_recipient.get(&user.id),
            );
            let delivery = Delivery {
                notification: &notification,
                user,
                prefs: &prefs,
                ctx: &ctx,
                subject_override: req.subject_override.as_deref(),
            };

            let email_plan = match self.gate.email(user, &prefs, event) {
                Verdict::Deliver if self.email.is_configured() => Plan::Send,
                Verdict::Deliver => Plan::Suppress(EMAIL_NOT_CONFIGURED.into()),
                Verdict::Suppress(r) => Plan::Suppress(r.to_string()),
            };
            if self.run_channel(&delivery, Channel::Email, &user.email, email_plan).await {
                attempts += 1;
            }

            let sms_plan = match self.gate.sms(user, &prefs, event, self.clock.local_time()) {
                Verdict::Deliver => Plan::Send,
                Verdict::Suppress(r) => Plan::Suppress(r.to_string()),
            };
            if self.run_channel(&delivery, Channel::Sms, &prefs.phone_e164, sms_plan).await {
                attempts += 1;
            }
        }

        tracing::info!(
            event = %event,
            notification = %notification.id,
            recipients = users.len(),
            attempts,
            "dispatch finished"
        );

        Ok(DispatchOutcome { notification, attempts, recipients: users.len() })
    }

    /// Follows player records to their linked login, drops duplicates and
    /// unknown users, and keeps the first occurrence order.
    async fn resolve_recipients(
        &self,
        recipients: &[Recipient],
        players: &mut HashMap<Uuid, Player>,
    ) -> Vec<UserAccount> {
        let mut seen = HashSet::new();
        let mut users = Vec::new();
        for recipient in recipients {
            let Some(user_id) = recipient.user_id() else {
                if let Recipient::Player(p) = recipient {
                    tracing::debug!(player = %p.id, "player has no linked login, skipped");
                }
                continue;
            };
            if !seen.insert(user_id) {
                continue;
            }
            if let Recipient::Player(p) = recipient {
                players.entry(user_id).or_insert_with(|| p.clone());
            }
            match best_effort("find recipient", self.store.find_user(user_id).await) {
                Some(Some(user)) => users.push(user),
                Some(None) => tracing::warn!(user = %user_id, "recipient not found, skipped"),
                None => {}
            }
        }

        for user in &users {
            if players.contains_key(&user.id) {
                continue;
            }
            if let Some(Some(p)) =
                best_effort("find recipient player", self.store.find_player_by_user(user.id).await)
            {
                players.insert(user.id, p);
            }
        }
        users
    }

    /// Creates and settles one attempt. Returns whether an attempt row exists.
    async fn run_channel(&self, d: &Delivery<'_>, channel: Channel, destination: &str, plan: Plan) -> bool {
        let now = self.clock.now();
        let new = match &plan {
            Plan::Send => NewDeliveryAttempt::pending(d.notification.id, d.user.id, channel, destination),
            Plan::Suppress(reason) => {
                NewDeliveryAttempt::suppressed(d.notification.id, d.user.id, channel, destination, reason)
            }
        };
        let mut attempt = match self.store.create_attempt(&new, now).await {
            Ok(a) => a,
            Err(e) => {
                tracing::error!(user = %d.user.id, channel = %channel, "attempt not recorded: {e:#}");
                return false;
            }
        };

        match plan {
            Plan::Suppress(reason) => {
                tracing::info!(
                    user = %d.user.id,
                    event = %d.notification.event,
                    channel = %channel,
                    reason = %reason,
                    "delivery suppressed"
                );
            }
            Plan::Send => {
                let event = d.notification.event;
                let result = match channel {
                    Channel::Email => {
                        self.email
                            .deliver(event, d.ctx, d.user, d.subject_override, &mut attempt, now)
                            .await
                    }
                    Channel::Sms => self.sms.deliver(event, d.ctx, d.prefs, &mut attempt, now).await,
                };
                if let Err(e) = result {
                    attempt.mark_failed(format!("{e:#}"));
                }
                if attempt.status == DeliveryStatus::Failed {
                    tracing::warn!(
                        user = %d.user.id,
                        event = %event,
                        channel = %channel,
                        error = %attempt.error,
                        "delivery failed"
                    );
                }
                if let Err(e) = self.store.save_attempt(&attempt).await {
                    tracing::error!(attempt = %attempt.id, "attempt outcome not saved: {e:#}");
                }
            }
        }

        DELIVERY_ATTEMPTS_COUNTER
            .with_label_values(&[&channel.to_string(), &attempt.status.to_string()])
            .inc();
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveTime, Utc};
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::{EmailSettings, SmsSettings};
    use crate::db::memory::MemoryStore;
    use crate::services::email::{tests::StubMailer, Mailer};
    use crate::services::gating::QuietHours;
    use crate::services::testing::FixedClock;

    fn user(first: &str) -> UserAccount {
        UserAccount {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", first.to_lowercase()),
            first_name: first.into(),
            last_name: "Tester".into(),
            is_staff: false,
            is_captain: false,
        }
    }

    fn email_only(user_id: Uuid) -> NotificationPreference {
        let mut p = NotificationPreference::defaults_for(user_id, Utc::now());
        p.email_enabled = true;
        p.lineup_published_email = true;
        p
    }

    struct Harness {
        store: Arc<MemoryStore>,
        mailer: Arc<StubMailer>,
        dispatcher: Dispatcher,
    }

    fn harness_with(mailer: Option<Arc<StubMailer>>, sms: SmsSettings, local: NaiveTime) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let templates = Arc::new(TemplateSet::new().unwrap());
        let stub = mailer.clone().unwrap_or_else(StubMailer::accepting);
        let email = EmailSender::with_mailer(
            mailer.map(|m| m as Arc<dyn Mailer>),
            templates.clone(),
            EmailSettings::default(),
            "http://localhost:8000".into(),
        );
        let sms = Arc::new(SmsService::new(&sms, templates).unwrap());
        let dispatcher = Dispatcher::from_parts(
            store.clone(),
            Gate::new(QuietHours::new(22, 8)),
            email,
            sms,
            SiteUrls::default(),
            FixedClock::new(Utc::now(), local),
        );
        Harness { store, mailer: stub, dispatcher }
    }

    fn harness() -> Harness {
        let mailer = StubMailer::accepting();
        harness_with(Some(mailer), SmsSettings::default(), NaiveTime::from_hms_opt(12, 0, 0).unwrap())
    }

    fn status_of(store: &MemoryStore, user_id: Uuid, channel: Channel) -> (DeliveryStatus, String) {
        let a = store
            .attempts()
            .into_iter()
            .find(|a| a.user_id == user_id && a.channel == channel)
            .unwrap();
        (a.status, a.error)
    }

    #[tokio::test]
    async fn lineup_email_sent_and_sms_suppressed_without_verified_phone() {
        let h = harness();
        let u = user("Uma");
        h.store.add_user(u.clone());
        let mut prefs = email_only(u.id);
        prefs.sms_enabled = true;
        prefs.lineup_published_sms = true;
        h.store.put_preferences(prefs);

        let out = h
            .dispatcher
            .dispatch(
                DispatchRequest::new(EventKey::LineupPublishedForPlayer)
                    .to_users([u.id])
                    .title("You're in the Royals Lineup!")
                    .url("/fixtures/12"),
            )
            .await
            .unwrap();

        assert_eq!(out.attempts, 2);
        assert_eq!(h.store.notifications().len(), 1);
        let receipts = h.store.receipts();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].user_id, u.id);
        assert!(receipts[0].read_at.is_none());

        assert_eq!(status_of(&h.store, u.id, Channel::Email).0, DeliveryStatus::Sent);
        assert_eq!(
            status_of(&h.store, u.id, Channel::Sms),
            (DeliveryStatus::Suppressed, "no verified phone".to_string())
        );

        let sent = h.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Uma: You're in the Royals Lineup!");
        assert!(sent[0].text.contains("http://localhost:8000/fixtures/12"));
    }

    #[tokio::test]
    async fn receipts_are_unique_per_notification_but_each_dispatch_is_new() {
        let h = harness();
        let a = user("Ann");
        let b = user("Ben");
        let c = user("Cal");
        for u in [&a, &b, &c] {
            h.store.add_user(u.clone());
        }

        let first = h
            .dispatcher
            .dispatch(DispatchRequest::new(EventKey::Generic).to_users([a.id, b.id, a.id]))
            .await
            .unwrap();
        let second = h
            .dispatcher
            .dispatch(DispatchRequest::new(EventKey::Generic).to_users([b.id, c.id]))
            .await
            .unwrap();

        assert_ne!(first.notification.id, second.notification.id);
        assert_eq!(first.recipients, 2);
        let receipts = h.store.receipts();
        assert_eq!(receipts.len(), 4);
        let mut pairs: Vec<_> = receipts.iter().map(|r| (r.notification_id, r.user_id)).collect();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), 4);
    }

    #[tokio::test]
    async fn every_recipient_gets_one_settled_attempt_per_channel() {
        let h = harness_with(
            Some(StubMailer::failing()),
            SmsSettings::default(),
            NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
        );
        let users = [user("Dee"), user("Eli"), user("Fay")];
        for u in &users {
            h.store.add_user(u.clone());
        }
        h.store.put_preferences(email_only(users[0].id));

        let out = h
            .dispatcher
            .dispatch(
                DispatchRequest::new(EventKey::LineupPublishedForPlayer)
                    .to_users(users.iter().map(|u| u.id)),
            )
            .await
            .unwrap();

        assert_eq!(out.attempts, 6);
        for u in &users {
            for channel in [Channel::Email, Channel::Sms] {
                let matching: Vec<_> = h
                    .store
                    .attempts()
                    .into_iter()
                    .filter(|a| a.user_id == u.id && a.channel == channel)
                    .collect();
                assert_eq!(matching.len(), 1);
                assert!(matching[0].status.is_settled(), "{:?}", matching[0].status);
            }
        }
        let (status, error) = status_of(&h.store, users[0].id, Channel::Email);
        assert_eq!(status, DeliveryStatus::Failed);
        assert!(error.contains("smtp connection refused"));
        assert_eq!(status_of(&h.store, users[1].id, Channel::Email).1, "email disabled globally");
    }

    #[tokio::test]
    async fn global_sms_disable_is_reported_even_during_quiet_hours() {
        let h = harness_with(
            Some(StubMailer::accepting()),
            SmsSettings::default(),
            NaiveTime::from_hms_opt(23, 30, 0).unwrap(),
        );
        let u = user("Gil");
        h.store.add_user(u.clone());
        let mut p = email_only(u.id);
        p.lineup_published_sms = true;
        p.phone_e164 = "+13125551212".into();
        p.phone_verified_at = Some(Utc::now());
        h.store.put_preferences(p);

        h.dispatcher
            .dispatch(DispatchRequest::new(EventKey::LineupPublishedForPlayer).to_users([u.id]))
            .await
            .unwrap();
        assert_eq!(status_of(&h.store, u.id, Channel::Sms).1, "sms disabled globally");
    }

    #[tokio::test]
    async fn missing_email_transport_is_suppressed() {
        let h = harness_with(None, SmsSettings::default(), NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        let u = user("Hal");
        h.store.add_user(u.clone());
        h.store.put_preferences(email_only(u.id));

        h.dispatcher
            .dispatch(DispatchRequest::new(EventKey::LineupPublishedForPlayer).to_users([u.id]))
            .await
            .unwrap();
        assert_eq!(
            status_of(&h.store, u.id, Channel::Email),
            (DeliveryStatus::Suppressed, EMAIL_NOT_CONFIGURED.to_string())
        );
    }

    #[tokio::test]
    async fn staff_only_events_suppress_players_on_both_channels() {
        let h = harness();
        let player = user("Ivy");
        let captain = UserAccount { is_captain: true, ..user("Jon") };
        h.store.add_user(player.clone());
        h.store.add_user(captain.clone());
        for id in [player.id, captain.id] {
            let mut p = email_only(id);
            p.lineup_overdue_staff_email = true;
            h.store.put_preferences(p);
        }

        h.dispatcher
            .dispatch(
                DispatchRequest::new(EventKey::LineupOverdue).to_users([player.id, captain.id]),
            )
            .await
            .unwrap();

        assert_eq!(status_of(&h.store, player.id, Channel::Email).1, "not captain/staff");
        assert_eq!(status_of(&h.store, player.id, Channel::Sms).1, "not captain/staff");
        assert_eq!(status_of(&h.store, captain.id, Channel::Email).0, DeliveryStatus::Sent);
        assert_eq!(h.store.receipts().len(), 2);
    }

    #[tokio::test]
    async fn players_resolve_through_linked_login_and_feed_templates() {
        let h = harness();
        let linked = user("Kim");
        h.store.add_user(linked.clone());
        h.store.put_preferences(email_only(linked.id));
        let roster = Player {
            id: Uuid::new_v4(),
            user_id: Some(linked.id),
            first_name: "Kimberly".into(),
            last_name: "Tester".into(),
            is_captain: false,
        };
        let unlinked = Player { id: Uuid::new_v4(), user_id: None, ..roster.clone() };

        let mut req = DispatchRequest::new(EventKey::LineupPublishedForPlayer);
        req.recipients = vec![roster.into(), unlinked.into()];
        req.per_recipient.insert(
            linked.id,
            [("slot_label".to_string(), json!("Doubles 2"))].into_iter().collect(),
        );
        let out = h.dispatcher.dispatch(req).await.unwrap();

        assert_eq!(out.recipients, 1);
        assert_eq!(out.attempts, 2);
        let sent = h.mailer.sent.lock().unwrap();
        assert!(sent[0].text.contains("at Doubles 2"));
    }

    #[tokio::test]
    async fn unknown_users_are_skipped() {
        let h = harness();
        let out = h
            .dispatcher
            .dispatch(DispatchRequest::new(EventKey::Generic).to_users([Uuid::new_v4()]))
            .await
            .unwrap();
        assert_eq!(out.recipients, 0);
        assert_eq!(out.attempts, 0);
        assert_eq!(h.store.notifications().len(), 1);
    }

    #[tokio::test]
    async fn store_failures_while_settling_do_not_abort_the_loop() {
        let h = harness();
        let a = user("Lou");
        let b = user("Max");
        for u in [&a, &b] {
            h.store.add_user(u.clone());
            h.store.put_preferences(email_only(u.id));
        }
        h.store.fail_attempt_saves();

        let out = h
            .dispatcher
            .dispatch(
                DispatchRequest::new(EventKey::LineupPublishedForPlayer).to_users([a.id, b.id]),
            )
            .await
            .unwrap();
        assert_eq!(out.attempts, 4);
        assert_eq!(h.mailer.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn verified_user_receives_sms_through_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "messageId": "abc-1" })))
            .expect(1)
            .mount(&server)
            .await;
        let h = harness_with(
            Some(StubMailer::accepting()),
            SmsSettings {
                enabled: true,
                api_key: Some("k".into()),
                endpoint: server.uri(),
                ..Default::default()
            },
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        );
        let u = user("Ned");
        h.store.add_user(u.clone());
        let mut p = email_only(u.id);
        p.sms_enabled = true;
        p.sms_opt_in = true;
        p.lineup_published_sms = true;
        p.phone_e164 = "+13125551212".into();
        p.phone_verified_at = Some(Utc::now());
        h.store.put_preferences(p);

        h.dispatcher
            .dispatch(DispatchRequest::new(EventKey::LineupPublishedForPlayer).to_users([u.id]))
            .await
            .unwrap();

        let sms = h
            .store
            .attempts()
            .into_iter()
            .find(|a| a.channel == Channel::Sms)
            .unwrap();
        assert_eq!(sms.status, DeliveryStatus::Sent);
        assert_eq!(sms.provider_message_id, "abc-1");
        assert_eq!(sms.destination, "+13125551212");
    }

    #[test]
    fn request_parses_from_collaborator_json() {
        let uid = Uuid::new_v4();
        let req: DispatchRequest = serde_json::from_value(json!({
            "event": "MATCH_REMINDER_24H",
            "recipients": [{ "kind": "user", "id": uid }],
            "title": "Tomorrow",
            "per_recipient": { uid.to_string(): { "slot_label": "S1" } },
        }))
        .unwrap();
        assert_eq!(req.event, EventKey::MatchReminder24h);
        assert_eq!(req.recipients[0].user_id(), Some(uid));
        assert_eq!(req.per_recipient[&uid]["slot_label"], json!("S1"));

        let bad = serde_json::from_value::<DispatchRequest>(json!({ "event": "lineup-publishd" }));
        assert!(bad.is_err());
    }
}
