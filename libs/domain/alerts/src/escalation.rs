//! Escalation-step scheduling. Each step becomes a scheduled job the
//! caller enqueues with `JobKind::EscalationStep`; cancellation on
//! acknowledge/resolve is the caller's responsibility (it cancels the
//! still-pending job rows for the alert).

use breeze_domain_models::alert::EscalationPolicy;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ScheduledEscalation {
    pub alert_id: Uuid,
    pub channel_ids: Vec<Uuid>,
    pub fire_at: DateTime<Utc>,
}

pub fn schedule(policy: &EscalationPolicy, alert_id: Uuid, triggered_at: DateTime<Utc>) -> Vec<ScheduledEscalation> {
    policy
        .steps
        .iter()
        .map(|step| ScheduledEscalation {
            alert_id,
            channel_ids: step.channel_ids.clone(),
            fire_at: triggered_at + chrono::Duration::minutes(step.delay_minutes as i64),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use breeze_domain_models::alert::EscalationStep;

    #[test]
    fn steps_are_scheduled_relative_to_trigger_time() {
        let triggered_at = Utc::now();
        let policy = EscalationPolicy {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            name: "standard".into(),
            steps: vec![
                EscalationStep {
                    delay_minutes: 5,
                    channel_ids: vec![Uuid::new_v4()],
                },
                EscalationStep {
                    delay_minutes: 15,
                    channel_ids: vec![Uuid::new_v4()],
                },
            ],
        };
        let alert_id = Uuid::new_v4();
        let scheduled = schedule(&policy, alert_id, triggered_at);
        assert_eq!(scheduled.len(), 2);
        assert_eq!(scheduled[0].fire_at, triggered_at + chrono::Duration::minutes(5));
        assert_eq!(scheduled[1].fire_at, triggered_at + chrono::Duration::minutes(15));
        assert!(scheduled.iter().all(|s| s.alert_id == alert_id));
    }
}
