use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    notification::{
        DeliveryAttempt, DeliveryStatus, InboxEntry, InboxFilter, NewDeliveryAttempt,
        NewNotification, Notification, NotificationReceipt,
    },
    phone_verification::{NewPhoneVerification, PhoneVerification},
    preference::NotificationPreference,
    user::{Player, UserAccount},
};

/// Read-only view of accounts and rosters owned by the league side.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<UserAccount>>;
    async fn find_player_by_user(&self, user_id: Uuid) -> anyhow::Result<Option<Player>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(
        &self,
        new: &NewNotification,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<Notification>;

    /// Returns the receipt and whether it was created by this call.
    async fn get_or_create_receipt(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(NotificationReceipt, bool)>;

    async fn create_attempt(
        &self,
        new: &NewDeliveryAttempt,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<DeliveryAttempt>;

    async fn save_attempt(&self, attempt: &DeliveryAttempt) -> anyhow::Result<()>;

    async fn attempts_for_notification(
        &self,
        notification_id: Uuid,
    ) -> anyhow::Result<Vec<DeliveryAttempt>>;

    /// Applies a provider callback. Returns how many attempts matched.
    async fn update_status_by_provider_id(
        &self,
        provider_message_id: &str,
        status: DeliveryStatus,
    ) -> anyhow::Result<u64>;

    async fn list_inbox(
        &self,
        user_id: Uuid,
        filter: InboxFilter,
        limit: i64,
    ) -> anyhow::Result<Vec<InboxEntry>>;

    async fn unread_count(&self, user_id: Uuid) -> anyhow::Result<i64>;

    async fn find_inbox_entry(
        &self,
        user_id: Uuid,
        receipt_id: Uuid,
    ) -> anyhow::Result<Option<InboxEntry>>;

    /// `read_at = None` marks the receipts unread. Only the user's own
    /// receipts are touched.
    async fn set_read(
        &self,
        user_id: Uuid,
        receipt_ids: &[Uuid],
        read_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<u64>;

    async fn mark_all_read(&self, user_id: Uuid, at: DateTime<Utc>) -> anyhow::Result<u64>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_preferences(&self, user_id: Uuid) -> anyhow::Result<Option<NotificationPreference>>;

    /// Inserts the all-off defaults when the user has no row yet.
    async fn ensure_preferences(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<NotificationPreference>;

    async fn save_preferences(&self, prefs: &NotificationPreference) -> anyhow::Result<()>;
}

#[async_trait]
pub trait VerificationStore: Send + Sync {
    async fn create_verification(
        &self,
        new: &NewPhoneVerification,
    ) -> anyhow::Result<PhoneVerification>;

    /// Newest-first unconsumed codes for one (user, phone), bounded by `limit`.
    async fn recent_unconsumed(
        &self,
        user_id: Uuid,
        phone_e164: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<PhoneVerification>>;

    /// Consumes every unconsumed code for (user, phone) except `keep`.
    async fn consume_unconsumed(
        &self,
        user_id: Uuid,
        phone_e164: &str,
        at: DateTime<Utc>,
        keep: Option<Uuid>,
    ) -> anyhow::Result<u64>;

    async fn consume(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()>;

    async fn increment_attempts(&self, id: Uuid) -> anyhow::Result<()>;
}

/// Everything the notification engine persists.
pub trait Store: DirectoryStore + NotificationStore + PreferenceStore + VerificationStore {}

impl<T> Store for T where T: DirectoryStore + NotificationStore + PreferenceStore + VerificationStore {}
