//! Alert rules, fired alerts, notification channels and escalation policies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
}

impl ConditionOperator {
    pub fn evaluate(self, value: f64, threshold: f64) -> bool {
        match self {
            ConditionOperator::Gt => value > threshold,
            ConditionOperator::Gte => value >= threshold,
            ConditionOperator::Lt => value < threshold,
            ConditionOperator::Lte => value <= threshold,
            ConditionOperator::Eq => (value - threshold).abs() < f64::EPSILON,
            ConditionOperator::Neq => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

/// A metric-threshold condition, or a structural one (`status=offline for N
/// minutes`, `software_change`) represented with `metric` set to a sentinel
/// name understood by the evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertCondition {
    pub metric: String,
    pub operator: ConditionOperator,
    pub threshold: f64,
    /// Minimum continuous window the condition must hold before firing.
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertTarget {
    pub device_ids: Option<Vec<Uuid>>,
    pub device_group_ids: Option<Vec<Uuid>>,
    pub site_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationStep {
    pub delay_minutes: u32,
    pub channel_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationPolicy {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub steps: Vec<EscalationStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub severity: Severity,
    pub enabled: bool,
    pub targets: AlertTarget,
    pub conditions: Vec<AlertCondition>,
    pub cooldown_minutes: u32,
    pub escalation_policy_id: Option<Uuid>,
    pub notification_channel_ids: Vec<Uuid>,
    pub auto_resolve: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Suppressed,
}

impl AlertStatus {
    /// State transitions form a DAG rooted at `active`, terminating at
    /// `resolved`.
    pub fn can_transition_to(self, next: AlertStatus) -> bool {
        use AlertStatus::*;
        matches!(
            (self, next),
            (Active, Acknowledged)
                | (Active, Resolved)
                | (Active, Suppressed)
                | (Acknowledged, Resolved)
                | (Suppressed, Active)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AlertStatus::Resolved)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub org_id: Uuid,
    pub device_id: Uuid,
    pub severity: Severity,
    pub status: AlertStatus,
    pub title: String,
    pub message: String,
    pub context: serde_json::Value,
    pub triggered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
}

impl Alert {
    /// `acknowledgedBy` is set iff status is `acknowledged`, or `resolved`
    /// having passed through `acknowledged`.
    pub fn acknowledged_by_invariant_holds(&self) -> bool {
        let should_be_set = matches!(self.status, AlertStatus::Acknowledged)
            || (self.status == AlertStatus::Resolved && self.acknowledged_at.is_some());
        should_be_set == self.acknowledged_by.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannelType {
    Email,
    Slack,
    Teams,
    Webhook,
    Pagerduty,
    Sms,
    Inapp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationChannel {
    pub id: Uuid,
    pub org_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationChannelType,
    pub config: serde_json::Value,
    pub enabled: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}
