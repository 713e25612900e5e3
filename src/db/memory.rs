//! In-process store used by unit tests in place of Postgres.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
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

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, UserAccount>,
    players: Vec<Player>,
    notifications: Vec<Notification>,
    receipts: Vec<NotificationReceipt>,
    attempts: Vec<DeliveryAttempt>,
    preferences: HashMap<Uuid, NotificationPreference>,
    verifications: Vec<PhoneVerification>,
    fail_attempt_saves: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: UserAccount) {
        self.inner.lock().unwrap().users.insert(user.id, user);
    }

    pub fn add_player(&self, player: Player) {
        self.inner.lock().unwrap().players.push(player);
    }

    pub fn put_preferences(&self, prefs: NotificationPreference) {
        self.inner.lock().unwrap().preferences.insert(prefs.user_id, prefs);
    }

    pub fn preferences(&self, user_id: Uuid) -> Option<NotificationPreference> {
        self.inner.lock().unwrap().preferences.get(&user_id).cloned()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().unwrap().notifications.clone()
    }

    pub fn receipts(&self) -> Vec<NotificationReceipt> {
        self.inner.lock().unwrap().receipts.clone()
    }

    pub fn attempts(&self) -> Vec<DeliveryAttempt> {
        self.inner.lock().unwrap().attempts.clone()
    }

    pub fn verifications(&self) -> Vec<PhoneVerification> {
        self.inner.lock().unwrap().verifications.clone()
    }

    /// Makes every later `save_attempt` fail, to exercise error isolation.
    pub fn fail_attempt_saves(&self) {
        self.inner.lock().unwrap().fail_attempt_saves = true;
    }

    fn entry(inner: &Inner, r: &NotificationReceipt) -> Option<InboxEntry> {
        let n = inner.notifications.iter().find(|n| n.id == r.notification_id)?;
        Some(InboxEntry {
            receipt_id: r.id,
            notification_id: n.id,
            event: n.event,
            title: n.title.clone(),
            body: n.body.clone(),
            url: n.url.clone(),
            read_at: r.read_at,
            created_at: n.created_at,
        })
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<UserAccount>> {
        Ok(self.inner.lock().unwrap().users.get(&id).cloned())
    }

    async fn find_player_by_user(&self, user_id: Uuid) -> anyhow::Result<Option<Player>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.players.iter().find(|p| p.user_id == Some(user_id)).cloned())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create_notification(
        &self,
        new: &NewNotification,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<Notification> {
        let n = Notification {
            id: Uuid::new_v4(),
            event: new.event,
            season_id: new.season_id,
            fixture_id: new.fixture_id,
            player_id: new.player_id,
            title: new.title.clone(),
            body: new.body.clone(),
            url: new.url.clone(),
            created_at,
            expires_at: new.expires_at,
        };
        self.inner.lock().unwrap().notifications.push(n.clone());
        Ok(n)
    }

    async fn get_or_create_receipt(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(NotificationReceipt, bool)> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(r) = inner
            .receipts
            .iter()
            .find(|r| r.notification_id == notification_id && r.user_id == user_id)
        {
            return Ok((r.clone(), false));
        }
        let r = NotificationReceipt {
            id: Uuid::new_v4(),
            notification_id,
            user_id,
            read_at: None,
            created_at: now,
        };
        inner.receipts.push(r.clone());
        Ok((r, true))
    }

    async fn create_attempt(
        &self,
        new: &NewDeliveryAttempt,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<DeliveryAttempt> {
        let a = DeliveryAttempt {
            id: Uuid::new_v4(),
            notification_id: new.notification_id,
            user_id: new.user_id,
            channel: new.channel,
            destination: new.destination.clone(),
            provider_message_id: String::new(),
            error: new.error.clone(),
            status: new.status,
            retry_count: 0,
            created_at,
            sent_at: None,
        };
        self.inner.lock().unwrap().attempts.push(a.clone());
        Ok(a)
    }

    async fn save_attempt(&self, attempt: &DeliveryAttempt) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_attempt_saves {
            anyhow::bail!("connection reset");
        }
        match inner.attempts.iter_mut().find(|a| a.id == attempt.id) {
            Some(a) => *a = attempt.clone(),
            None => anyhow::bail!("attempt {} not found", attempt.id),
        }
        Ok(())
    }

    async fn attempts_for_notification(
        &self,
        notification_id: Uuid,
    ) -> anyhow::Result<Vec<DeliveryAttempt>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .attempts
            .iter()
            .filter(|a| a.notification_id == notification_id)
            .cloned()
            .collect())
    }

    async fn update_status_by_provider_id(
        &self,
        provider_message_id: &str,
        status: DeliveryStatus,
    ) -> anyhow::Result<u64> {
        if provider_message_id.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.lock().unwrap();
        let mut n = 0;
        for a in inner
            .attempts
            .iter_mut()
            .filter(|a| a.provider_message_id == provider_message_id)
        {
            a.status = status;
            n += 1;
        }
        Ok(n)
    }

    async fn list_inbox(
        &self,
        user_id: Uuid,
        filter: InboxFilter,
        limit: i64,
    ) -> anyhow::Result<Vec<InboxEntry>> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<InboxEntry> = inner
            .receipts
            .iter()
            .filter(|r| r.user_id == user_id)
            .filter(|r| match filter {
                InboxFilter::Unread => r.read_at.is_none(),
                InboxFilter::Read => r.read_at.is_some(),
                InboxFilter::All => true,
            })
            .filter_map(|r| Self::entry(&inner, r))
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn unread_count(&self, user_id: Uuid) -> anyhow::Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .receipts
            .iter()
            .filter(|r| r.user_id == user_id && r.read_at.is_none())
            .count() as i64)
    }

    async fn find_inbox_entry(
        &self,
        user_id: Uuid,
        receipt_id: Uuid,
    ) -> anyhow::Result<Option<InboxEntry>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .receipts
            .iter()
            .find(|r| r.id == receipt_id && r.user_id == user_id)
            .and_then(|r| Self::entry(&inner, r)))
    }

    async fn set_read(
        &self,
        user_id: Uuid,
        receipt_ids: &[Uuid],
        read_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut n = 0;
        for r in inner
            .receipts
            .iter_mut()
            .filter(|r| r.user_id == user_id && receipt_ids.contains(&r.id))
        {
            r.read_at = read_at;
            n += 1;
        }
        Ok(n)
    }

    async fn mark_all_read(&self, user_id: Uuid, at: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut n = 0;
        for r in inner
            .receipts
            .iter_mut()
            .filter(|r| r.user_id == user_id && r.read_at.is_none())
        {
            r.read_at = Some(at);
            n += 1;
        }
        Ok(n)
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn get_preferences(&self, user_id: Uuid) -> anyhow::Result<Option<NotificationPreference>> {
        Ok(self.preferences(user_id))
    }

    async fn ensure_preferences(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<NotificationPreference> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner
            .preferences
            .entry(user_id)
            .or_insert_with(|| NotificationPreference::defaults_for(user_id, now))
            .clone())
    }

    async fn save_preferences(&self, prefs: &NotificationPreference) -> anyhow::Result<()> {
        self.put_preferences(prefs.clone());
        Ok(())
    }
}

#[async_trait]
impl VerificationStore for MemoryStore {
    async fn create_verification(
        &self,
        new: &NewPhoneVerification,
    ) -> anyhow::Result<PhoneVerification> {
        let pv = PhoneVerification {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            phone_e164: new.phone_e164.clone(),
            code: new.code.clone(),
            created_at: new.created_at,
            expires_at: new.expires_at,
            attempts: 0,
            consumed_at: None,
        };
        self.inner.lock().unwrap().verifications.push(pv.clone());
        Ok(pv)
    }

    async fn recent_unconsumed(
        &self,
        user_id: Uuid,
        phone_e164: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<PhoneVerification>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<PhoneVerification> = inner
            .verifications
            .iter()
            .filter(|v| v.user_id == user_id && v.phone_e164 == phone_e164 && v.consumed_at.is_none())
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn consume_unconsumed(
        &self,
        user_id: Uuid,
        phone_e164: &str,
        at: DateTime<Utc>,
        keep: Option<Uuid>,
    ) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut n = 0;
        for v in inner.verifications.iter_mut().filter(|v| {
            v.user_id == user_id
                && v.phone_e164 == phone_e164
                && v.consumed_at.is_none()
                && Some(v.id) != keep
        }) {
            v.consumed_at = Some(at);
            n += 1;
        }
        Ok(n)
    }

    async fn consume(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(v) = inner.verifications.iter_mut().find(|v| v.id == id) {
            v.consumed_at = Some(at);
        }
        Ok(())
    }

    async fn increment_attempts(&self, id: Uuid) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(v) = inner.verifications.iter_mut().find(|v| v.id == id) {
            v.attempts += 1;
        }
        Ok(())
    }
}
