use chrono::{NaiveTime, Timelike};

use crate::models::{preference::NotificationPreference, user::UserAccount};
use crate::services::catalog::EventKey;

/// Server-local window during which SMS is held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    start: u32,
    end: u32,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self::new(22, 8)
    }
}

impl QuietHours {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start: start % 24, end: end % 24 }
    }

    pub fn is_disabled(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, at: NaiveTime) -> bool {
        let h = at.hour();
        if self.is_disabled() {
            false
        } else if self.start < self.end {
            self.start <= h && h < self.end
        } else {
            !(self.end <= h && h < self.start)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionReason {
    NotCaptainOrStaff,
    EmailDisabled,
    SmsDisabled,
    MissingEmail,
    OptedOut,
    PhoneUnverified,
    QuietHours,
}

impl SuppressionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SuppressionReason::NotCaptainOrStaff => "not captain/staff",
            SuppressionReason::EmailDisabled => "email disabled globally",
            SuppressionReason::SmsDisabled => "sms disabled globally",
            SuppressionReason::MissingEmail => "no email address",
            SuppressionReason::OptedOut => "opted out of this event",
            SuppressionReason::PhoneUnverified => "no verified phone",
            SuppressionReason::QuietHours => "quiet hours",
        }
    }
}

impl std::fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    Suppress(SuppressionReason),
}

impl Verdict {
    pub fn allowed(self) -> bool {
        matches!(self, Verdict::Deliver)
    }
}

/// Pure per-channel decisions. The first failing check wins, so the recorded
/// reason always names the most fundamental gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gate {
    pub quiet_hours: QuietHours,
}

impl Gate {
    pub fn new(quiet_hours: QuietHours) -> Self {
        Self { quiet_hours }
    }

    pub fn email(
        &self,
        user: &UserAccount,
        prefs: &NotificationPreference,
        event: EventKey,
    ) -> Verdict {
        let spec = event.spec();
        if spec.staff_only && !user.is_captain_or_staff() {
            return Verdict::Suppress(SuppressionReason::NotCaptainOrStaff);
        }
        if !prefs.email_enabled {
            return Verdict::Suppress(SuppressionReason::EmailDisabled);
        }
        if !user.has_email() {
            return Verdict::Suppress(SuppressionReason::MissingEmail);
        }
        match spec.email_pref {
            Some(pref) if !prefs.email_opt_in(pref) => {
                Verdict::Suppress(SuppressionReason::OptedOut)
            }
            _ => Verdict::Deliver,
        }
    }

    /// `local_time` is the server-local wall clock used for quiet hours.
    pub fn sms(
        &self,
        user: &UserAccount,
        prefs: &NotificationPreference,
        event: EventKey,
        local_time: NaiveTime,
    ) -> Verdict {
        let spec = event.spec();
        if spec.staff_only && !user.is_captain_or_staff() {
            return Verdict::Suppress(SuppressionReason::NotCaptainOrStaff);
        }
        if !prefs.sms_globally_enabled() {
            return Verdict::Suppress(SuppressionReason::SmsDisabled);
        }
        if let Some(pref) = spec.sms_pref {
            if !prefs.sms_opt_in_for(pref) {
                return Verdict::Suppress(SuppressionReason::OptedOut);
            }
        }
        if !prefs.has_verified_phone() {
            return Verdict::Suppress(SuppressionReason::PhoneUnverified);
        }
        if self.quiet_hours.contains(local_time) {
            return Verdict::Suppress(SuppressionReason::QuietHours);
        }
        Verdict::Deliver
    }

    pub fn may_email(&self, user: &UserAccount, prefs: &NotificationPreference, event: EventKey) -> bool {
        self.email(user, prefs, event).allowed()
    }

    pub fn may_sms(
        &self,
        user: &UserAccount,
        prefs: &NotificationPreference,
        event: EventKey,
        local_time: NaiveTime,
    ) -> bool {
        self.sms(user, prefs, event, local_time).allowed()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn player() -> UserAccount {
        UserAccount {
            id: Uuid::new_v4(),
            email: "pat@example.com".into(),
            first_name: "Pat".into(),
            last_name: "Lee".into(),
            is_staff: false,
            is_captain: false,
        }
    }

    fn fully_enabled(user_id: Uuid) -> NotificationPreference {
        let mut p = NotificationPreference::defaults_for(user_id, Utc::now());
        p.email_enabled = true;
        p.sms_enabled = true;
        p.sms_opt_in = true;
        p.phone_e164 = "+13125551212".into();
        p.phone_verified_at = Some(Utc::now());
        p.lineup_published_email = true;
        p.lineup_published_sms = true;
        p.lineup_overdue_staff_email = true;
        p
    }

    #[test]
    fn quiet_hours_wrap_midnight() {
        let q = QuietHours::new(22, 8);
        for inside in [t(23, 0), t(2, 0), t(7, 59), t(22, 0)] {
            assert!(q.contains(inside), "{inside} should be quiet");
        }
        for outside in [t(8, 0), t(12, 0), t(21, 59)] {
            assert!(!q.contains(outside), "{outside} should not be quiet");
        }
    }

    #[test]
    fn quiet_hours_same_day_window() {
        let q = QuietHours::new(13, 15);
        assert!(q.contains(t(13, 0)));
        assert!(q.contains(t(14, 59)));
        assert!(!q.contains(t(15, 0)));
        assert!(!q.contains(t(12, 59)));
    }

    #[test]
    fn equal_bounds_disable_quiet_hours() {
        let q = QuietHours::new(9, 9);
        for h in 0..24 {
            assert!(!q.contains(t(h, 30)));
        }
    }

    #[test]
    fn staff_events_skip_plain_players() {
        let gate = Gate::default();
        let user = player();
        let prefs = fully_enabled(user.id);
        assert_eq!(
            gate.email(&user, &prefs, EventKey::LineupOverdue),
            Verdict::Suppress(SuppressionReason::NotCaptainOrStaff)
        );

        let captain = UserAccount { is_captain: true, ..player() };
        assert!(gate.may_email(&captain, &prefs, EventKey::LineupOverdue));
    }

    #[test]
    fn email_reasons_follow_gate_order() {
        let gate = Gate::default();
        let mut user = player();
        let mut prefs = fully_enabled(user.id);
        let ev = EventKey::LineupPublishedForPlayer;
        assert_eq!(gate.email(&user, &prefs, ev), Verdict::Deliver);

        prefs.lineup_published_email = false;
        assert_eq!(gate.email(&user, &prefs, ev), Verdict::Suppress(SuppressionReason::OptedOut));

        user.email = " ".into();
        assert_eq!(gate.email(&user, &prefs, ev), Verdict::Suppress(SuppressionReason::MissingEmail));

        prefs.email_enabled = false;
        assert_eq!(gate.email(&user, &prefs, ev), Verdict::Suppress(SuppressionReason::EmailDisabled));
    }

    #[test]
    fn generic_email_has_no_event_switch() {
        let gate = Gate::default();
        let user = player();
        let mut prefs = NotificationPreference::defaults_for(user.id, Utc::now());
        prefs.email_enabled = true;
        assert!(gate.may_email(&user, &prefs, EventKey::Generic));
    }

    #[test]
    fn removing_any_sms_requirement_flips_the_verdict() {
        let gate = Gate::new(QuietHours::new(22, 8));
        let user = player();
        let ev = EventKey::LineupPublishedForPlayer;
        let noon = t(12, 0);
        assert_eq!(gate.sms(&user, &fully_enabled(user.id), ev, noon), Verdict::Deliver);

        let mut p = fully_enabled(user.id);
        p.sms_enabled = false;
        p.sms_opt_in = false;
        assert_eq!(gate.sms(&user, &p, ev, noon), Verdict::Suppress(SuppressionReason::SmsDisabled));

        let mut p = fully_enabled(user.id);
        p.lineup_published_sms = false;
        assert_eq!(gate.sms(&user, &p, ev, noon), Verdict::Suppress(SuppressionReason::OptedOut));

        let mut p = fully_enabled(user.id);
        p.phone_verified_at = None;
        assert_eq!(gate.sms(&user, &p, ev, noon), Verdict::Suppress(SuppressionReason::PhoneUnverified));

        let mut p = fully_enabled(user.id);
        p.phone_e164.clear();
        assert_eq!(gate.sms(&user, &p, ev, noon), Verdict::Suppress(SuppressionReason::PhoneUnverified));

        assert_eq!(
            gate.sms(&user, &fully_enabled(user.id), ev, t(23, 0)),
            Verdict::Suppress(SuppressionReason::QuietHours)
        );

        assert_eq!(
            gate.sms(&user, &fully_enabled(user.id), EventKey::ScoresOverdue, noon),
            Verdict::Suppress(SuppressionReason::NotCaptainOrStaff)
        );
    }

    #[test]
    fn legacy_opt_in_alone_enables_sms_globally() {
        let gate = Gate::default();
        let user = player();
        let mut p = fully_enabled(user.id);
        p.sms_enabled = false;
        assert!(gate.may_sms(&user, &p, EventKey::LineupPublishedForPlayer, t(12, 0)));
    }

    #[test]
    fn global_disable_wins_over_quiet_hours() {
        let gate = Gate::new(QuietHours::new(22, 8));
        let user = player();
        let mut p = fully_enabled(user.id);
        p.sms_enabled = false;
        p.sms_opt_in = false;
        let v = gate.sms(&user, &p, EventKey::LineupPublishedForPlayer, t(23, 30));
        assert_eq!(v, Verdict::Suppress(SuppressionReason::SmsDisabled));
        assert_eq!(SuppressionReason::SmsDisabled.to_string(), "sms disabled globally");
    }
}
