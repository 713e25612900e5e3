use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-user gate state for email and SMS. In-app receipts are not gated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationPreference {
    pub user_id: Uuid,

    pub email_enabled: bool,
    pub sms_enabled: bool,
    /// Explicit SMS consent; also honored as the legacy global opt-in.
    pub sms_opt_in: bool,

    pub phone_number: String,
    pub phone_e164: String,
    pub phone_verified_at: Option<DateTime<Utc>>,

    pub sms_consent_text: String,
    pub sms_consent_ip: Option<String>,
    pub sms_consent_user_agent: String,
    pub sms_consent_at: Option<DateTime<Utc>>,

    pub timezone: String,
    pub share_email_with_team: bool,
    pub share_mobile_with_team: bool,

    pub lineup_overdue_staff_email: bool,
    pub scores_overdue_staff_email: bool,
    pub lineup_published_email: bool,
    pub lineup_published_sms: bool,
    pub subplan_created_email: bool,
    pub subplan_created_sms: bool,
    pub result_posted_email: bool,
    pub result_posted_sms: bool,
    pub match_reminder_24h_email: bool,
    pub match_reminder_24h_sms: bool,
    pub availability_reminder_5d_email: bool,
    pub availability_reminder_5d_sms: bool,

    pub updated_at: DateTime<Utc>,
}

/// Per-event email switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailPref {
    LineupPublished,
    ResultPosted,
    SubplanCreated,
    MatchReminder24h,
    AvailabilityReminder5d,
    LineupOverdueStaff,
    ScoresOverdueStaff,
}

/// Per-event SMS switches. Staff-only events have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsPref {
    LineupPublished,
    ResultPosted,
    SubplanCreated,
    MatchReminder24h,
    AvailabilityReminder5d,
}

impl NotificationPreference {
    /// Row written when an account is created: every channel off.
    pub fn defaults_for(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            email_enabled: false,
            sms_enabled: false,
            sms_opt_in: false,
            phone_number: String::new(),
            phone_e164: String::new(),
            phone_verified_at: None,
            sms_consent_text: String::new(),
            sms_consent_ip: None,
            sms_consent_user_agent: String::new(),
            sms_consent_at: None,
            timezone: "America/New_York".into(),
            share_email_with_team: false,
            share_mobile_with_team: false,
            lineup_overdue_staff_email: false,
            scores_overdue_staff_email: false,
            lineup_published_email: false,
            lineup_published_sms: false,
            subplan_created_email: false,
            subplan_created_sms: false,
            result_posted_email: false,
            result_posted_sms: false,
            match_reminder_24h_email: false,
            match_reminder_24h_sms: false,
            availability_reminder_5d_email: false,
            availability_reminder_5d_sms: false,
            updated_at: now,
        }
    }

    pub fn email_opt_in(&self, pref: EmailPref) -> bool {
        match pref {
            EmailPref::LineupPublished => self.lineup_published_email,
            EmailPref::ResultPosted => self.result_posted_email,
            EmailPref::SubplanCreated => self.subplan_created_email,
            EmailPref::MatchReminder24h => self.match_reminder_24h_email,
            EmailPref::AvailabilityReminder5d => self.availability_reminder_5d_email,
            EmailPref::LineupOverdueStaff => self.lineup_overdue_staff_email,
            EmailPref::ScoresOverdueStaff => self.scores_overdue_staff_email,
        }
    }

    pub fn sms_opt_in_for(&self, pref: SmsPref) -> bool {
        match pref {
            SmsPref::LineupPublished => self.lineup_published_sms,
            SmsPref::ResultPosted => self.result_posted_sms,
            SmsPref::SubplanCreated => self.subplan_created_sms,
            SmsPref::MatchReminder24h => self.match_reminder_24h_sms,
            SmsPref::AvailabilityReminder5d => self.availability_reminder_5d_sms,
        }
    }

    /// Primary toggle or the legacy consent-based opt-in.
    pub fn sms_globally_enabled(&self) -> bool {
        self.sms_enabled || self.sms_opt_in
    }

    pub fn has_verified_phone(&self) -> bool {
        self.phone_verified_at.is_some() && !self.phone_e164.trim().is_empty()
    }

    /// Enabled, consented, verified and a normalized number on file.
    pub fn has_usable_phone(&self) -> bool {
        self.sms_enabled && self.sms_opt_in && self.has_verified_phone()
    }

    /// Clears verification, consent and the SMS toggle when the normalized
    /// number differs from `previous_e164`. Returns whether anything was revoked.
    pub fn revoke_if_phone_changed(&mut self, previous_e164: &str) -> bool {
        if previous_e164.trim() == self.phone_e164.trim() {
            return false;
        }
        self.phone_verified_at = None;
        self.sms_opt_in = false;
        self.sms_enabled = false;
        true
    }

    /// Records a freshly verified number. Consent given for a different
    /// number does not carry over.
    pub fn mark_phone_verified(&mut self, phone_e164: &str, at: DateTime<Utc>) {
        if self.phone_e164.trim() != phone_e164 {
            self.sms_opt_in = false;
            self.sms_enabled = false;
            self.phone_number = phone_e164.to_string();
        }
        self.phone_e164 = phone_e164.to_string();
        self.phone_verified_at = Some(at);
        self.updated_at = at;
    }

    pub fn record_consent(&mut self, consent: &ConsentRecord, at: DateTime<Utc>) {
        self.sms_opt_in = true;
        self.sms_consent_text = consent.text.clone();
        self.sms_consent_ip = consent.ip.clone();
        self.sms_consent_user_agent = consent.user_agent.clone();
        self.sms_consent_at = Some(at);
        self.updated_at = at;
    }

    pub fn withdraw_consent(&mut self, at: DateTime<Utc>) {
        self.sms_opt_in = false;
        self.sms_enabled = false;
        self.updated_at = at;
    }

    /// Copies the provided fields over. Phone handling and the SMS rule are
    /// enforced by the preference service around this call.
    pub fn apply(&mut self, update: &PreferenceUpdate) {
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = update.$field { self.$field = v; })*
            };
        }
        set!(
            email_enabled,
            sms_enabled,
            share_email_with_team,
            share_mobile_with_team,
            lineup_overdue_staff_email,
            scores_overdue_staff_email,
            lineup_published_email,
            lineup_published_sms,
            subplan_created_email,
            subplan_created_sms,
            result_posted_email,
            result_posted_sms,
            match_reminder_24h_email,
            match_reminder_24h_sms,
            availability_reminder_5d_email,
            availability_reminder_5d_sms,
        );
        if let Some(tz) = update.timezone.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            self.timezone = tz.to_string();
        }
    }
}

/// Partial update; `None` leaves a field untouched. `phone_number` is the raw
/// user input and is normalized before it reaches the row.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PreferenceUpdate {
    pub email_enabled: Option<bool>,
    pub sms_enabled: Option<bool>,
    pub phone_number: Option<String>,
    pub timezone: Option<String>,
    pub share_email_with_team: Option<bool>,
    pub share_mobile_with_team: Option<bool>,
    pub lineup_overdue_staff_email: Option<bool>,
    pub scores_overdue_staff_email: Option<bool>,
    pub lineup_published_email: Option<bool>,
    pub lineup_published_sms: Option<bool>,
    pub subplan_created_email: Option<bool>,
    pub subplan_created_sms: Option<bool>,
    pub result_posted_email: Option<bool>,
    pub result_posted_sms: Option<bool>,
    pub match_reminder_24h_email: Option<bool>,
    pub match_reminder_24h_sms: Option<bool>,
    pub availability_reminder_5d_email: Option<bool>,
    pub availability_reminder_5d_sms: Option<bool>,
}

/// Consent metadata captured from the request that granted it.
#[derive(Debug, Clone, Default)]
pub struct ConsentRecord {
    pub text: String,
    pub ip: Option<String>,
    pub user_agent: String,
}
