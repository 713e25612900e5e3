use crate::db::Store;
use crate::models::notification::DeliveryStatus;
use crate::services::metrics::STATUS_CALLBACKS_COUNTER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Updated(u64),
    /// A status we do not map; the attempt keeps its current status.
    Ignored,
    NoMatch,
}

/// Applies a provider delivery report to every attempt carrying `message_id`.
pub async fn apply_status_callback(
    store: &dyn Store,
    message_id: &str,
    provider_status: &str,
) -> anyhow::Result<CallbackOutcome> {
    let Some(status) = DeliveryStatus::from_provider(provider_status) else {
        tracing::info!(message_id, provider_status, "ignoring unknown SMS status");
        STATUS_CALLBACKS_COUNTER.with_label_values(&["unknown"]).inc();
        return Ok(CallbackOutcome::Ignored);
    };
    STATUS_CALLBACKS_COUNTER
        .with_label_values(&[&status.to_string()])
        .inc();

    match store.update_status_by_provider_id(message_id, status).await? {
        0 => {
            tracing::debug!(message_id, "status callback matched no attempt");
            Ok(CallbackOutcome::NoMatch)
        }
        n => {
            tracing::info!(message_id, %status, updated = n, "SMS status updated");
            Ok(CallbackOutcome::Updated(n))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::store::NotificationStore;
    use crate::models::notification::{Channel, NewDeliveryAttempt};

    async fn sent_attempt(store: &MemoryStore, message_id: &str) -> Uuid {
        let mut a = store
            .create_attempt(
                &NewDeliveryAttempt::pending(Uuid::new_v4(), Uuid::new_v4(), Channel::Sms, "+13125551212"),
                Utc::now(),
            )
            .await
            .unwrap();
        a.mark_sent(Utc::now(), Some(message_id.into()));
        store.save_attempt(&a).await.unwrap();
        a.id
    }

    #[tokio::test]
    async fn delivered_report_updates_the_attempt() {
        let store = MemoryStore::new();
        let id = sent_attempt(&store, "msg-1").await;

        let out = apply_status_callback(&store, "msg-1", "delivered").await.unwrap();
        assert_eq!(out, CallbackOutcome::Updated(1));
        let a = store.attempts().into_iter().find(|a| a.id == id).unwrap();
        assert_eq!(a.status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn undelivered_maps_to_failed() {
        let store = MemoryStore::new();
        sent_attempt(&store, "msg-2").await;
        apply_status_callback(&store, "msg-2", "undelivered").await.unwrap();
        assert_eq!(store.attempts()[0].status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_status_and_unknown_id_change_nothing() {
        let store = MemoryStore::new();
        sent_attempt(&store, "msg-3").await;

        assert_eq!(
            apply_status_callback(&store, "msg-3", "teleported").await.unwrap(),
            CallbackOutcome::Ignored
        );
        assert_eq!(store.attempts()[0].status, DeliveryStatus::Sent);
        assert_eq!(
            apply_status_callback(&store, "msg-404", "delivered").await.unwrap(),
            CallbackOutcome::NoMatch
        );
    }
}
