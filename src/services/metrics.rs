use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec};
use sqlx::PgPool;
use tracing::{info, warn};

lazy_static! {
    // ── Event counters (increment on each event) ────────────────────────────
    pub static ref DISPATCHES_COUNTER: CounterVec = register_counter_vec!(
        "notify_dispatches_total",
        "Notifications dispatched per event",
        &["event"]
    ).unwrap();

    pub static ref DELIVERY_ATTEMPTS_COUNTER: CounterVec = register_counter_vec!(
        "notify_delivery_attempts_total",
        "Delivery attempts per channel and final status",
        &["channel", "status"]
    ).unwrap();

    pub static ref OTP_COUNTER: CounterVec = register_counter_vec!(
        "notify_sms_otp_total",
        "Phone verification outcomes",
        &["outcome"]
    ).unwrap();

    pub static ref STATUS_CALLBACKS_COUNTER: CounterVec = register_counter_vec!(
        "notify_sms_status_callbacks_total",
        "Provider status callbacks by reported status",
        &["status"]
    ).unwrap();

    // ── Collected from the database ─────────────────────────────────────────
    pub static ref ATTEMPTS_24H_GAUGE: GaugeVec = register_gauge_vec!(
        "notify_delivery_attempts_24h",
        "Delivery attempts created in the last 24 hours by channel and status",
        &["channel", "status"]
    ).unwrap();

    pub static ref UNREAD_RECEIPTS_GAUGE: Gauge = register_gauge!(
        "notify_unread_receipts_total",
        "Unread in-app notification receipts"
    ).unwrap();

    pub static ref VERIFIED_PHONES_GAUGE: Gauge = register_gauge!(
        "notify_verified_phones_total",
        "Users with a verified phone and SMS consent"
    ).unwrap();
}

/// Spawn the background metrics collector (refreshes every 5 minutes).
pub fn start(pool: PgPool) {
    tokio::spawn(async move {
        if let Err(e) = collect(&pool).await {
            warn!("Metrics: initial collection failed: {}", e);
        }
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
            if let Err(e) = collect(&pool).await {
                warn!("Metrics: collection failed: {}", e);
            }
        }
    });
}

async fn collect(pool: &PgPool) -> anyhow::Result<()> {
    let attempts: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT channel, status, COUNT(*)::BIGINT FROM delivery_attempts
         WHERE created_at > NOW() - INTERVAL '24 hours'
         GROUP BY channel, status",
    )
    .fetch_all(pool)
    .await?;

    ATTEMPTS_24H_GAUGE.reset();
    for (channel, status, count) in &attempts {
        ATTEMPTS_24H_GAUGE
            .with_label_values(&[channel, status])
            .set(*count as f64);
    }

    let unread: i64 = sqlx::query_scalar(
        "SELECT COUNT(*)::BIGINT FROM notification_receipts WHERE read_at IS NULL",
    )
    .fetch_one(pool)
    .await
    .unwrap_or(0);
    UNREAD_RECEIPTS_GAUGE.set(unread as f64);

    let verified: i64 = sqlx::query_scalar(
        "SELECT COUNT(*)::BIGINT FROM notification_preferences
         WHERE phone_verified_at IS NOT NULL AND sms_opt_in = TRUE",
    )
    .fetch_one(pool)
    .await
    .unwrap_or(0);
    VERIFIED_PHONES_GAUGE.set(verified as f64);

    info!("Metrics: collected {} attempt bucket(s)", attempts.len());
    Ok(())
}
