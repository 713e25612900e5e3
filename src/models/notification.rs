use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::catalog::EventKey;

/// One fact: an event occurred. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub event: EventKey,
    pub season_id: Option<Uuid>,
    pub fixture_id: Option<Uuid>,
    pub player_id: Option<Uuid>,
    pub title: String,
    pub body: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Insert payload for [`Notification`]. Optional associations default to
/// `None`, text fields to empty.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub event: EventKey,
    pub season_id: Option<Uuid>,
    pub fixture_id: Option<Uuid>,
    pub player_id: Option<Uuid>,
    pub title: String,
    pub body: String,
    pub url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewNotification {
    pub fn new(event: EventKey) -> Self {
        Self {
            event,
            season_id: None,
            fixture_id: None,
            player_id: None,
            title: String::new(),
            body: String::new(),
            url: String::new(),
            expires_at: None,
        }
    }
}

/// In-app inbox entry for one (notification, user) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationReceipt {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A receipt joined with its notification, as shown in the inbox.
#[derive(Debug, Clone, Serialize)]
pub struct InboxEntry {
    pub receipt_id: Uuid,
    pub notification_id: Uuid,
    pub event: EventKey,
    pub title: String,
    pub body: String,
    pub url: String,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InboxFilter {
    #[default]
    Unread,
    Read,
    All,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Email,
    Sms,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Channel::Email => "EMAIL",
            Channel::Sms => "SMS",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Channel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EMAIL" => Ok(Channel::Email),
            "SMS" => Ok(Channel::Sms),
            _ => Err(anyhow::anyhow!("Unknown channel: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Pending,
    Queued,
    Sending,
    Sent,
    Delivered,
    Failed,
    Suppressed,
}

impl DeliveryStatus {
    /// Statuses a dispatch call may leave an attempt in when it returns.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Sent | DeliveryStatus::Failed | DeliveryStatus::Suppressed
        )
    }

    /// Maps a provider status callback value onto our status.
    pub fn from_provider(status: &str) -> Option<Self> {
        match status.trim().to_lowercase().as_str() {
            "queued" | "accepted" => Some(DeliveryStatus::Queued),
            "sending" => Some(DeliveryStatus::Sending),
            "sent" => Some(DeliveryStatus::Sent),
            "delivered" => Some(DeliveryStatus::Delivered),
            "undelivered" | "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Queued => "QUEUED",
            DeliveryStatus::Sending => "SENDING",
            DeliveryStatus::Sent => "SENT",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Failed => "FAILED",
            DeliveryStatus::Suppressed => "SUPPRESSED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(DeliveryStatus::Pending),
            "QUEUED" => Ok(DeliveryStatus::Queued),
            "SENDING" => Ok(DeliveryStatus::Sending),
            "SENT" => Ok(DeliveryStatus::Sent),
            "DELIVERED" => Ok(DeliveryStatus::Delivered),
            "FAILED" => Ok(DeliveryStatus::Failed),
            "SUPPRESSED" => Ok(DeliveryStatus::Suppressed),
            _ => Err(anyhow::anyhow!("Unknown delivery status: {s}")),
        }
    }
}

/// Longest error text kept on an attempt.
pub const MAX_ERROR_LEN: usize = 500;

/// One transmission over one channel to one destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub channel: Channel,
    /// Email address or E.164 phone; may be empty when the user has none.
    pub destination: String,
    pub provider_message_id: String,
    pub error: String,
    pub status: DeliveryStatus,
    pub retry_count: i16,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl DeliveryAttempt {
    pub fn mark_sent(&mut self, at: DateTime<Utc>, provider_message_id: Option<String>) {
        self.status = DeliveryStatus::Sent;
        self.sent_at = Some(at);
        if let Some(id) = provider_message_id {
            self.provider_message_id = truncate(&id, 255);
        }
    }

    pub fn mark_failed(&mut self, error: impl AsRef<str>) {
        self.status = DeliveryStatus::Failed;
        self.error = truncate(error.as_ref(), MAX_ERROR_LEN);
    }

    pub fn mark_suppressed(&mut self, reason: impl AsRef<str>) {
        self.status = DeliveryStatus::Suppressed;
        self.error = truncate(reason.as_ref(), MAX_ERROR_LEN);
    }
}

#[derive(Debug, Clone)]
pub struct NewDeliveryAttempt {
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub channel: Channel,
    pub destination: String,
    pub status: DeliveryStatus,
    pub error: String,
}

impl NewDeliveryAttempt {
    pub fn pending(notification_id: Uuid, user_id: Uuid, channel: Channel, destination: &str) -> Self {
        Self {
            notification_id,
            user_id,
            channel,
            destination: destination.to_string(),
            status: DeliveryStatus::Pending,
            error: String::new(),
        }
    }

    pub fn suppressed(
        notification_id: Uuid,
        user_id: Uuid,
        channel: Channel,
        destination: &str,
        reason: impl AsRef<str>,
    ) -> Self {
        Self {
            status: DeliveryStatus::Suppressed,
            error: truncate(reason.as_ref(), MAX_ERROR_LEN),
            ..Self::pending(notification_id, user_id, channel, destination)
        }
    }
}

/// Char-boundary-safe truncation for stored text.
pub fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
