//! Dedup and cooldown decision for a rule that just matched.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    /// No active alert exists and cooldown has elapsed: create a new alert.
    CreateNew,
    /// An alert is already active: extend its `lastSeenAt`, do not create
    /// a new row or re-notify.
    ExtendExisting,
    /// An alert resolved recently enough that the cooldown window is still
    /// open: suppress firing.
    SuppressedByCooldown,
}

pub struct DedupInput {
    pub active_alert_exists: bool,
    pub last_resolved_at: Option<DateTime<Utc>>,
    pub cooldown_minutes: u32,
    pub now: DateTime<Utc>,
}

pub fn decide(input: &DedupInput) -> FireDecision {
    if input.active_alert_exists {
        return FireDecision::ExtendExisting;
    }
    if let Some(resolved_at) = input.last_resolved_at {
        let cooldown_ends = resolved_at + chrono::Duration::minutes(input.cooldown_minutes as i64);
        if input.now < cooldown_ends {
            return FireDecision::SuppressedByCooldown;
        }
    }
    FireDecision::CreateNew
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_alert_extends_instead_of_creating() {
        let decision = decide(&DedupInput {
            active_alert_exists: true,
            last_resolved_at: None,
            cooldown_minutes: 15,
            now: Utc::now(),
        });
        assert_eq!(decision, FireDecision::ExtendExisting);
    }

    #[test]
    fn within_cooldown_window_suppresses() {
        let now = Utc::now();
        let decision = decide(&DedupInput {
            active_alert_exists: false,
            last_resolved_at: Some(now - chrono::Duration::seconds(30)),
            cooldown_minutes: 15,
            now,
        });
        assert_eq!(decision, FireDecision::SuppressedByCooldown);
    }

    #[test]
    fn after_cooldown_window_creates_new() {
        let now = Utc::now();
        let decision = decide(&DedupInput {
            active_alert_exists: false,
            last_resolved_at: Some(now - chrono::Duration::minutes(16)),
            cooldown_minutes: 15,
            now,
        });
        assert_eq!(decision, FireDecision::CreateNew);
    }

    #[test]
    fn never_resolved_before_creates_new() {
        let decision = decide(&DedupInput {
            active_alert_exists: false,
            last_resolved_at: None,
            cooldown_minutes: 15,
            now: Utc::now(),
        });
        assert_eq!(decision, FireDecision::CreateNew);
    }
}
