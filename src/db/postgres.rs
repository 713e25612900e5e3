use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::db::store::{DirectoryStore, NotificationStore, PreferenceStore, VerificationStore};
use crate::models::{
    notification::{
        DeliveryAttempt, DeliveryStatus, InboxEntry, InboxFilter, NewDeliveryAttempt,
        NewNotification, Notification, NotificationReceipt,
    },
    phone_verification::{NewPhoneVerification, PhoneVerification},
    preference::NotificationPreference,
    user::{Player, UserAccount},
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// Enum columns are stored as text and converted on the way out.

#[derive(FromRow)]
struct NotificationRow {
    id: Uuid,
    event: String,
    season_id: Option<Uuid>,
    fixture_id: Option<Uuid>,
    player_id: Option<Uuid>,
    title: String,
    body: String,
    url: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = anyhow::Error;

    fn try_from(r: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Notification {
            id: r.id,
            event: r.event.parse()?,
            season_id: r.season_id,
            fixture_id: r.fixture_id,
            player_id: r.player_id,
            title: r.title,
            body: r.body,
            url: r.url,
            created_at: r.created_at,
            expires_at: r.expires_at,
        })
    }
}

#[derive(FromRow)]
struct ReceiptRow {
    id: Uuid,
    notification_id: Uuid,
    user_id: Uuid,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<ReceiptRow> for NotificationReceipt {
    fn from(r: ReceiptRow) -> Self {
        NotificationReceipt {
            id: r.id,
            notification_id: r.notification_id,
            user_id: r.user_id,
            read_at: r.read_at,
            created_at: r.created_at,
        }
    }
}

#[derive(FromRow)]
struct AttemptRow {
    id: Uuid,
    notification_id: Uuid,
    user_id: Uuid,
    channel: String,
    destination: String,
    provider_message_id: String,
    error: String,
    status: String,
    retry_count: i16,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<AttemptRow> for DeliveryAttempt {
    type Error = anyhow::Error;

    fn try_from(r: AttemptRow) -> Result<Self, Self::Error> {
        Ok(DeliveryAttempt {
            id: r.id,
            notification_id: r.notification_id,
            user_id: r.user_id,
            channel: r.channel.parse()?,
            destination: r.destination,
            provider_message_id: r.provider_message_id,
            error: r.error,
            status: r.status.parse()?,
            retry_count: r.retry_count,
            created_at: r.created_at,
            sent_at: r.sent_at,
        })
    }
}

#[derive(FromRow)]
struct InboxRow {
    receipt_id: Uuid,
    notification_id: Uuid,
    event: String,
    title: String,
    body: String,
    url: String,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<InboxRow> for InboxEntry {
    type Error = anyhow::Error;

    fn try_from(r: InboxRow) -> Result<Self, Self::Error> {
        Ok(InboxEntry {
            receipt_id: r.receipt_id,
            notification_id: r.notification_id,
            event: r.event.parse()?,
            title: r.title,
            body: r.body,
            url: r.url,
            read_at: r.read_at,
            created_at: r.created_at,
        })
    }
}

const INBOX_SELECT: &str = "SELECT r.id AS receipt_id, n.id AS notification_id, n.event, n.title,
        n.body, n.url, r.read_at, n.created_at
     FROM notification_receipts r
     JOIN notifications n ON n.id = r.notification_id";

#[async_trait]
impl DirectoryStore for PgStore {
    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<UserAccount>> {
        let user = sqlx::query_as::<_, UserAccount>(
            "SELECT u.id, u.email, u.first_name, u.last_name, u.is_staff,
                    COALESCE(p.is_captain, FALSE) AS is_captain
             FROM users u
             LEFT JOIN players p ON p.user_id = u.id
             WHERE u.id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_player_by_user(&self, user_id: Uuid) -> anyhow::Result<Option<Player>> {
        let player = sqlx::query_as::<_, Player>(
            "SELECT id, user_id, first_name, last_name, is_captain FROM players WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(player)
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn create_notification(
        &self,
        new: &NewNotification,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<Notification> {
        let row = sqlx::query_as::<_, NotificationRow>(
            "INSERT INTO notifications
                (event, season_id, fixture_id, player_id, title, body, url, created_at, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING *",
        )
        .bind(new.event.as_str())
        .bind(new.season_id)
        .bind(new.fixture_id)
        .bind(new.player_id)
        .bind(&new.title)
        .bind(&new.body)
        .bind(&new.url)
        .bind(created_at)
        .bind(new.expires_at)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_or_create_receipt(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(NotificationReceipt, bool)> {
        let inserted = sqlx::query_as::<_, ReceiptRow>(
            "INSERT INTO notification_receipts (notification_id, user_id, created_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (notification_id, user_id) DO NOTHING
             RETURNING *",
        )
        .bind(notification_id)
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row.into(), true));
        }

        let existing = sqlx::query_as::<_, ReceiptRow>(
            "SELECT * FROM notification_receipts WHERE notification_id = $1 AND user_id = $2",
        )
        .bind(notification_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((existing.into(), false))
    }

    async fn create_attempt(
        &self,
        new: &NewDeliveryAttempt,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<DeliveryAttempt> {
        let row = sqlx::query_as::<_, AttemptRow>(
            "INSERT INTO delivery_attempts
                (notification_id, user_id, channel, destination, status, error, retry_count, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, 0, $7)
             RETURNING *",
        )
        .bind(new.notification_id)
        .bind(new.user_id)
        .bind(new.channel.to_string())
        .bind(&new.destination)
        .bind(new.status.to_string())
        .bind(&new.error)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn save_attempt(&self, attempt: &DeliveryAttempt) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE delivery_attempts
             SET destination = $2, provider_message_id = $3, error = $4, status = $5,
                 retry_count = $6, sent_at = $7
             WHERE id = $1",
        )
        .bind(attempt.id)
        .bind(&attempt.destination)
        .bind(&attempt.provider_message_id)
        .bind(&attempt.error)
        .bind(attempt.status.to_string())
        .bind(attempt.retry_count)
        .bind(attempt.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn attempts_for_notification(
        &self,
        notification_id: Uuid,
    ) -> anyhow::Result<Vec<DeliveryAttempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(
            "SELECT * FROM delivery_attempts WHERE notification_id = $1 ORDER BY created_at, channel",
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_status_by_provider_id(
        &self,
        provider_message_id: &str,
        status: DeliveryStatus,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE delivery_attempts SET status = $2
             WHERE provider_message_id = $1 AND provider_message_id <> ''",
        )
        .bind(provider_message_id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_inbox(
        &self,
        user_id: Uuid,
        filter: InboxFilter,
        limit: i64,
    ) -> anyhow::Result<Vec<InboxEntry>> {
        let read_clause = match filter {
            InboxFilter::Unread => "AND r.read_at IS NULL",
            InboxFilter::Read => "AND r.read_at IS NOT NULL",
            InboxFilter::All => "",
        };
        let rows = sqlx::query_as::<_, InboxRow>(&format!(
            "{INBOX_SELECT}
             WHERE r.user_id = $1 {read_clause}
               AND (n.expires_at IS NULL OR n.expires_at > NOW())
             ORDER BY n.created_at DESC
             LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn unread_count(&self, user_id: Uuid) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notification_receipts r
             JOIN notifications n ON n.id = r.notification_id
             WHERE r.user_id = $1 AND r.read_at IS NULL
               AND (n.expires_at IS NULL OR n.expires_at > NOW())",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn find_inbox_entry(
        &self,
        user_id: Uuid,
        receipt_id: Uuid,
    ) -> anyhow::Result<Option<InboxEntry>> {
        let row = sqlx::query_as::<_, InboxRow>(&format!(
            "{INBOX_SELECT} WHERE r.user_id = $1 AND r.id = $2"
        ))
        .bind(user_id)
        .bind(receipt_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn set_read(
        &self,
        user_id: Uuid,
        receipt_ids: &[Uuid],
        read_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE notification_receipts SET read_at = $3 WHERE user_id = $1 AND id = ANY($2)",
        )
        .bind(user_id)
        .bind(receipt_ids)
        .bind(read_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_all_read(&self, user_id: Uuid, at: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE notification_receipts SET read_at = $2 WHERE user_id = $1 AND read_at IS NULL",
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PreferenceStore for PgStore {
    async fn get_preferences(&self, user_id: Uuid) -> anyhow::Result<Option<NotificationPreference>> {
        let prefs = sqlx::query_as::<_, NotificationPreference>(
            "SELECT * FROM notification_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(prefs)
    }

    async fn ensure_preferences(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<NotificationPreference> {
        sqlx::query(
            "INSERT INTO notification_preferences (user_id, updated_at) VALUES ($1, $2)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let prefs = sqlx::query_as::<_, NotificationPreference>(
            "SELECT * FROM notification_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(prefs)
    }

    async fn save_preferences(&self, p: &NotificationPreference) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE notification_preferences SET
                email_enabled = $2, sms_enabled = $3, sms_opt_in = $4,
                phone_number = $5, phone_e164 = $6, phone_verified_at = $7,
                sms_consent_text = $8, sms_consent_ip = $9, sms_consent_user_agent = $10,
                sms_consent_at = $11, timezone = $12,
                share_email_with_team = $13, share_mobile_with_team = $14,
                lineup_overdue_staff_email = $15, scores_overdue_staff_email = $16,
                lineup_published_email = $17, lineup_published_sms = $18,
                subplan_created_email = $19, subplan_created_sms = $20,
                result_posted_email = $21, result_posted_sms = $22,
                match_reminder_24h_email = $23, match_reminder_24h_sms = $24,
                availability_reminder_5d_email = $25, availability_reminder_5d_sms = $26,
                updated_at = $27
             WHERE user_id = $1",
        )
        .bind(p.user_id)
        .bind(p.email_enabled)
        .bind(p.sms_enabled)
        .bind(p.sms_opt_in)
        .bind(&p.phone_number)
        .bind(&p.phone_e164)
        .bind(p.phone_verified_at)
        .bind(&p.sms_consent_text)
        .bind(&p.sms_consent_ip)
        .bind(&p.sms_consent_user_agent)
        .bind(p.sms_consent_at)
        .bind(&p.timezone)
        .bind(p.share_email_with_team)
        .bind(p.share_mobile_with_team)
        .bind(p.lineup_overdue_staff_email)
        .bind(p.scores_overdue_staff_email)
        .bind(p.lineup_published_email)
        .bind(p.lineup_published_sms)
        .bind(p.subplan_created_email)
        .bind(p.subplan_created_sms)
        .bind(p.result_posted_email)
        .bind(p.result_posted_sms)
        .bind(p.match_reminder_24h_email)
        .bind(p.match_reminder_24h_sms)
        .bind(p.availability_reminder_5d_email)
        .bind(p.availability_reminder_5d_sms)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl VerificationStore for PgStore {
    async fn create_verification(
        &self,
        new: &NewPhoneVerification,
    ) -> anyhow::Result<PhoneVerification> {
        let pv = sqlx::query_as::<_, PhoneVerification>(
            "INSERT INTO phone_verifications (user_id, phone_e164, code, created_at, expires_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(new.user_id)
        .bind(&new.phone_e164)
        .bind(&new.code)
        .bind(new.created_at)
        .bind(new.expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(pv)
    }

    async fn recent_unconsumed(
        &self,
        user_id: Uuid,
        phone_e164: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<PhoneVerification>> {
        let rows = sqlx::query_as::<_, PhoneVerification>(
            "SELECT * FROM phone_verifications
             WHERE user_id = $1 AND phone_e164 = $2 AND consumed_at IS NULL
             ORDER BY created_at DESC
             LIMIT $3",
        )
        .bind(user_id)
        .bind(phone_e164)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn consume_unconsumed(
        &self,
        user_id: Uuid,
        phone_e164: &str,
        at: DateTime<Utc>,
        keep: Option<Uuid>,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE phone_verifications SET consumed_at = $3
             WHERE user_id = $1 AND phone_e164 = $2 AND consumed_at IS NULL
               AND ($4::uuid IS NULL OR id <> $4)",
        )
        .bind(user_id)
        .bind(phone_e164)
        .bind(at)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn consume(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query("UPDATE phone_verifications SET consumed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_attempts(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE phone_verifications SET attempts = attempts + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
