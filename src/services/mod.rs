pub mod catalog;
pub mod context;
pub mod dispatch;
pub mod email;
pub mod gating;
pub mod inbox;
pub mod lineup;
pub mod metrics;
pub mod phone_verification;
pub mod preferences;
pub mod sms;
pub mod status_callback;
pub mod templates;

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveTime, Utc};

/// Time source for stored timestamps and for the quiet-hours check.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Server-local wall clock; quiet hours are not per-user.
    fn local_time(&self) -> NaiveTime;
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_time(&self) -> NaiveTime {
        Local::now().time()
    }
}

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Logs and discards the error of an optional step so it cannot abort the
/// operation around it. Only for lookups and cleanup whose absence is harmless.
pub fn best_effort<T, E: std::fmt::Display>(label: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(step = label, error = %e, "best-effort step failed");
            None
        }
    }
}
