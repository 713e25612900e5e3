//! Static registry of the events the league notifies about.
//!
//! Every event carries its own templates and the preference switches that
//! gate it, so adding an event is one match arm plus one table entry.

use serde::{Deserialize, Serialize};

use crate::models::preference::{EmailPref, SmsPref};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventKey {
    LineupPublishedForPlayer,
    ResultPostedForPlayer,
    SubplanCreated,
    SubplanUpdatedForPlayer,
    SubplanCancelledForPlayer,
    MatchReminder24h,
    AvailabilityReminder5d,
    LineupOverdue,
    ScoresOverdue,
    /// Deliberate catch-all using the generic templates; email is not
    /// gated by any per-event switch.
    Generic,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown event key: {0:?}")]
pub struct UnknownEvent(pub String);

impl EventKey {
    pub const ALL: [EventKey; 10] = [
        EventKey::LineupPublishedForPlayer,
        EventKey::ResultPostedForPlayer,
        EventKey::SubplanCreated,
        EventKey::SubplanUpdatedForPlayer,
        EventKey::SubplanCancelledForPlayer,
        EventKey::MatchReminder24h,
        EventKey::AvailabilityReminder5d,
        EventKey::LineupOverdue,
        EventKey::ScoresOverdue,
        EventKey::Generic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKey::LineupPublishedForPlayer => "lineup-published-for-player",
            EventKey::ResultPostedForPlayer => "result-posted-for-player",
            EventKey::SubplanCreated => "subplan-created",
            EventKey::SubplanUpdatedForPlayer => "subplan-updated-for-player",
            EventKey::SubplanCancelledForPlayer => "subplan-cancelled-for-player",
            EventKey::MatchReminder24h => "match-reminder-24h",
            EventKey::AvailabilityReminder5d => "availability-reminder-5d",
            EventKey::LineupOverdue => "lineup-overdue",
            EventKey::ScoresOverdue => "scores-overdue",
            EventKey::Generic => "generic",
        }
    }

    pub fn spec(self) -> &'static EventSpec {
        let idx = match self {
            EventKey::LineupPublishedForPlayer => 0,
            EventKey::ResultPostedForPlayer => 1,
            EventKey::SubplanCreated => 2,
            EventKey::SubplanUpdatedForPlayer => 3,
            EventKey::SubplanCancelledForPlayer => 4,
            EventKey::MatchReminder24h => 5,
            EventKey::AvailabilityReminder5d => 6,
            EventKey::LineupOverdue => 7,
            EventKey::ScoresOverdue => 8,
            EventKey::Generic => 9,
        };
        &CATALOG[idx]
    }

    pub fn is_staff_only(self) -> bool {
        self.spec().staff_only
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKey {
    type Err = UnknownEvent;

    /// Accepts the kebab-case keys and the legacy SCREAMING_SNAKE spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        let normalized = match normalized.as_str() {
            "subplan-created-for-player" => "subplan-created",
            other => other,
        };
        EventKey::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

impl TryFrom<String> for EventKey {
    type Error = UnknownEvent;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventKey> for String {
    fn from(k: EventKey) -> Self {
        k.as_str().to_string()
    }
}

/// Template bindings and gating references for one event.
#[derive(Debug)]
pub struct EventSpec {
    pub key: EventKey,
    /// Rendered strictly; any missing variable falls back to `default_subject`.
    pub subject: &'static str,
    pub default_subject: &'static str,
    pub email_text: &'static str,
    pub email_html: Option<&'static str>,
    pub sms: &'static str,
    pub email_pref: Option<EmailPref>,
    pub sms_pref: Option<SmsPref>,
    pub staff_only: bool,
}

pub const OTP_SMS_TEMPLATE: &str =
    "Your Royals verification code is {{code}}. It expires in 10 minutes.";

pub const DEFAULT_SUBJECT: &str = "Royals Industrial League";

static CATALOG: [EventSpec; 10] = [
    EventSpec {
        key: EventKey::LineupPublishedForPlayer,
        subject: "{{first_name}}: You're in the Royals Lineup!",
        default_subject: "Royals: You're in the lineup!",
        email_text: "Hi {{first_name}},\n\n\
            You're in the lineup{{#if slot_label}} at {{slot_label}}{{/if}}\
            {{#if opponent}} for {{home_away}} vs {{opponent}}{{/if}}\
            {{#if match_date}} on {{match_date}}{{/if}}.\n\
            {{#if partner_full_name}}Your doubles partner is {{partner_full_name}}.\n{{/if}}\n\
            Match details: {{notification_url}}\n",
        email_html: Some(
            "<p>Hi {{first_name}},</p>\
             <p>You're in the lineup{{#if slot_label}} at <strong>{{slot_label}}</strong>{{/if}}\
             {{#if opponent}} for {{home_away}} vs {{opponent}}{{/if}}\
             {{#if match_date}} on {{match_date}}{{/if}}.</p>\
             {{#if partner_full_name}}<p>Your doubles partner is {{partner_full_name}}.</p>{{/if}}\
             <p><a href=\"{{notification_url}}\">View match details</a></p>",
        ),
        sms: "Royals: {{first_name}}, you're in the lineup{{#if slot_label}} ({{slot_label}}){{/if}}\
              {{#if opponent}} vs {{opponent}}{{/if}}{{#if match_date}} on {{match_date}}{{/if}}. {{notification_url}}",
        email_pref: Some(EmailPref::LineupPublished),
        sms_pref: Some(SmsPref::LineupPublished),
        staff_only: false,
    },
    EventSpec {
        key: EventKey::ResultPostedForPlayer,
        subject: "Royals: Your match result is posted",
        default_subject: "Royals: Your match result is posted",
        email_text: "Hi {{first_name}},\n\n\
            Your result{{#if opponent}} against {{opponent}}{{/if}} has been posted\
            {{#if result_text}}: {{result_text}}{{/if}}.\n\n\
            See the scores: {{notification_url}}\n",
        email_html: Some(
            "<p>Hi {{first_name}},</p>\
             <p>Your result{{#if opponent}} against {{opponent}}{{/if}} has been posted\
             {{#if result_text}}: <strong>{{result_text}}</strong>{{/if}}.</p>\
             <p><a href=\"{{notification_url}}\">See the scores</a></p>",
        ),
        sms: "Royals: result posted{{#if result_text}} - {{result_text}}{{/if}}. {{notification_url}}",
        email_pref: Some(EmailPref::ResultPosted),
        sms_pref: Some(SmsPref::ResultPosted),
        staff_only: false,
    },
    EventSpec {
        key: EventKey::SubplanCreated,
        subject: "Royals: You've been selected as a sub",
        default_subject: "Royals: You've been selected as a sub",
        email_text: "Hi {{first_name}},\n\n\
            You've been selected to sub{{#if opponent}} against {{opponent}}{{/if}}\
            {{#if match_date}} on {{match_date}}{{/if}}{{#if timeslot}} at {{timeslot}}{{/if}}.\n\n\
            Details: {{notification_url}}\n",
        email_html: Some(
            "<p>Hi {{first_name}},</p>\
             <p>You've been selected to sub{{#if opponent}} against {{opponent}}{{/if}}\
             {{#if match_date}} on {{match_date}}{{/if}}{{#if timeslot}} at {{timeslot}}{{/if}}.</p>\
             <p><a href=\"{{notification_url}}\">View details</a></p>",
        ),
        sms: "Royals: you're subbing{{#if match_date}} on {{match_date}}{{/if}}\
              {{#if timeslot}} at {{timeslot}}{{/if}}. {{notification_url}}",
        email_pref: Some(EmailPref::SubplanCreated),
        sms_pref: Some(SmsPref::SubplanCreated),
        staff_only: false,
    },
    EventSpec {
        key: EventKey::SubplanUpdatedForPlayer,
        subject: "Royals: Your sub match has been updated",
        default_subject: "Royals: Your sub match has been updated",
        email_text: "Hi {{first_name}},\n\n\
            Your sub match{{#if match_date}} on {{match_date}}{{/if}} has changed.\n\n\
            Latest details: {{notification_url}}\n",
        email_html: Some(
            "<p>Hi {{first_name}},</p>\
             <p>Your sub match{{#if match_date}} on {{match_date}}{{/if}} has changed.</p>\
             <p><a href=\"{{notification_url}}\">See the latest details</a></p>",
        ),
        sms: "Royals: your sub match{{#if match_date}} on {{match_date}}{{/if}} was updated. {{notification_url}}",
        email_pref: Some(EmailPref::SubplanCreated),
        sms_pref: Some(SmsPref::SubplanCreated),
        staff_only: false,
    },
    EventSpec {
        key: EventKey::SubplanCancelledForPlayer,
        subject: "Royals: Your sub match was cancelled",
        default_subject: "Royals: Your sub match was cancelled",
        email_text: "Hi {{first_name}},\n\n\
            Your sub match{{#if match_date}} on {{match_date}}{{/if}} was cancelled. No action is needed.\n",
        email_html: Some(
            "<p>Hi {{first_name}},</p>\
             <p>Your sub match{{#if match_date}} on {{match_date}}{{/if}} was cancelled. No action is needed.</p>",
        ),
        sms: "Royals: your sub match{{#if match_date}} on {{match_date}}{{/if}} was cancelled.",
        email_pref: Some(EmailPref::SubplanCreated),
        sms_pref: Some(SmsPref::SubplanCreated),
        staff_only: false,
    },
    EventSpec {
        key: EventKey::MatchReminder24h,
        subject: "Royals: Match reminder for tomorrow",
        default_subject: "Royals: Match reminder for tomorrow",
        email_text: "Hi {{first_name}},\n\n\
            Reminder: you play tomorrow{{#if slot_label}} at {{slot_label}}{{/if}}\
            {{#if opponent}} vs {{opponent}}{{/if}}{{#if match_date}} ({{match_date}}){{/if}}.\n\
            {{#if partner_full_name}}Partner: {{partner_full_name}}\n{{/if}}\n\
            Details: {{notification_url}}\n",
        email_html: Some(
            "<p>Hi {{first_name}},</p>\
             <p>Reminder: you play tomorrow{{#if slot_label}} at <strong>{{slot_label}}</strong>{{/if}}\
             {{#if opponent}} vs {{opponent}}{{/if}}{{#if match_date}} ({{match_date}}){{/if}}.</p>\
             {{#if partner_full_name}}<p>Partner: {{partner_full_name}}</p>{{/if}}\
             <p><a href=\"{{notification_url}}\">View match details</a></p>",
        ),
        sms: "Royals reminder: you play tomorrow{{#if slot_label}} ({{slot_label}}){{/if}}\
              {{#if opponent}} vs {{opponent}}{{/if}}. {{notification_url}}",
        email_pref: Some(EmailPref::MatchReminder24h),
        sms_pref: Some(SmsPref::MatchReminder24h),
        staff_only: false,
    },
    EventSpec {
        key: EventKey::AvailabilityReminder5d,
        subject: "Royals: Please submit your availability",
        default_subject: "Royals: Please submit your availability",
        email_text: "Hi {{first_name}},\n\n\
            Please let the captains know whether you can play{{#if match_date}} on {{match_date}}{{/if}}.\n\n\
            Update availability: {{notification_url}}\n",
        email_html: Some(
            "<p>Hi {{first_name}},</p>\
             <p>Please let the captains know whether you can play{{#if match_date}} on {{match_date}}{{/if}}.</p>\
             <p><a href=\"{{notification_url}}\">Update availability</a></p>",
        ),
        sms: "Royals: please submit your availability{{#if match_date}} for {{match_date}}{{/if}}. {{notification_url}}",
        email_pref: Some(EmailPref::AvailabilityReminder5d),
        sms_pref: Some(SmsPref::AvailabilityReminder5d),
        staff_only: false,
    },
    EventSpec {
        key: EventKey::LineupOverdue,
        subject: "Royals: Lineup is overdue",
        default_subject: "Royals: Lineup is overdue",
        email_text: "Hi {{first_name}},\n\n\
            The lineup{{#if opponent}} for {{opponent}}{{/if}}{{#if match_date}} on {{match_date}}{{/if}} \
            has not been published yet.\n\n\
            Manage lineup: {{notification_url}}\n",
        email_html: Some(
            "<p>Hi {{first_name}},</p>\
             <p>The lineup{{#if opponent}} for {{opponent}}{{/if}}{{#if match_date}} on {{match_date}}{{/if}} \
             has not been published yet.</p>\
             <p><a href=\"{{notification_url}}\">Manage lineup</a></p>",
        ),
        sms: "Royals: lineup overdue{{#if opponent}} for {{opponent}}{{/if}}. {{notification_url}}",
        email_pref: Some(EmailPref::LineupOverdueStaff),
        sms_pref: None,
        staff_only: true,
    },
    EventSpec {
        key: EventKey::ScoresOverdue,
        subject: "Royals: Scores are overdue",
        default_subject: "Royals: Scores are overdue",
        email_text: "Hi {{first_name}},\n\n\
            Scores{{#if opponent}} for the match against {{opponent}}{{/if}} have not been entered yet.\n\n\
            Enter scores: {{notification_url}}\n",
        email_html: Some(
            "<p>Hi {{first_name}},</p>\
             <p>Scores{{#if opponent}} for the match against {{opponent}}{{/if}} have not been entered yet.</p>\
             <p><a href=\"{{notification_url}}\">Enter scores</a></p>",
        ),
        sms: "Royals: scores overdue{{#if opponent}} vs {{opponent}}{{/if}}. {{notification_url}}",
        email_pref: Some(EmailPref::ScoresOverdueStaff),
        sms_pref: None,
        staff_only: true,
    },
    EventSpec {
        key: EventKey::Generic,
        subject: "{{title}}",
        default_subject: DEFAULT_SUBJECT,
        email_text: "Hi {{first_name}},\n\n{{title}}\n\n{{body}}\n\n{{#if notification_url}}{{notification_url}}\n{{/if}}",
        email_html: Some(
            "<p>Hi {{first_name}},</p><p><strong>{{title}}</strong></p><p>{{body}}</p>\
             {{#if notification_url}}<p><a href=\"{{notification_url}}\">Open</a></p>{{/if}}",
        ),
        sms: "Royals: {{title}}{{#if notification_url}} {{notification_url}}{{/if}}",
        email_pref: None,
        sms_pref: None,
        staff_only: false,
    },
];
