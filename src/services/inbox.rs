use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::db::Store;
use crate::models::notification::{InboxEntry, InboxFilter};
use crate::services::SharedClock;

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 200;
/// Where "open" sends the user when a notification carries no link.
pub const DASHBOARD_URL: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    MarkRead,
    MarkUnread,
}

/// The bell and inbox view over a user's receipts. Every operation is scoped
/// to the calling user; ids belonging to someone else are ignored.
pub struct InboxService {
    store: Arc<dyn Store>,
    clock: SharedClock,
}

impl InboxService {
    pub fn new(store: Arc<dyn Store>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        filter: InboxFilter,
        limit: Option<i64>,
    ) -> anyhow::Result<Vec<InboxEntry>> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        self.store.list_inbox(user_id, filter, limit).await
    }

    pub async fn unread_count(&self, user_id: Uuid) -> anyhow::Result<i64> {
        self.store.unread_count(user_id).await
    }

    pub async fn bulk(&self, user_id: Uuid, action: BulkAction, ids: &[Uuid]) -> anyhow::Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let read_at = match action {
            BulkAction::MarkRead => Some(self.clock.now()),
            BulkAction::MarkUnread => None,
        };
        self.store.set_read(user_id, ids, read_at).await
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> anyhow::Result<u64> {
        self.store.mark_all_read(user_id, self.clock.now()).await
    }

    /// Marks the receipt read and returns where to send the user, or `None`
    /// when the receipt is not theirs.
    pub async fn open(&self, user_id: Uuid, receipt_id: Uuid) -> anyhow::Result<Option<String>> {
        let Some(entry) = self.store.find_inbox_entry(user_id, receipt_id).await? else {
            return Ok(None);
        };
        if entry.read_at.is_none() {
            self.store.set_read(user_id, &[receipt_id], Some(self.clock.now())).await?;
        }
        let url = match entry.url.trim() {
            "" => DASHBOARD_URL.to_string(),
            u => u.to_string(),
        };
        Ok(Some(url))
    }
}
