//! Rule-condition evaluation over a single device's metric snapshot.

use std::collections::HashMap;

use breeze_domain_models::alert::{AlertCondition, AlertRule};

/// Sentinel metric names for structural conditions that aren't a plain
/// numeric threshold.
pub const METRIC_STATUS_OFFLINE_MINUTES: &str = "status_offline_minutes";
pub const METRIC_SOFTWARE_CHANGE: &str = "software_change";

/// A device's current metric values, keyed by metric name, plus duration
/// state for how long each metric has continuously satisfied its last
/// evaluated condition (tracked by the caller in the cache, per
/// `(ruleId, deviceId, metric)`).
pub struct EvaluationInput<'a> {
    pub metrics: &'a HashMap<String, f64>,
    /// Minutes each metric has held a value satisfying its threshold,
    /// looked up by the caller from the sliding-window cache state.
    pub continuous_minutes: &'a HashMap<String, u32>,
}

/// A rule fires when every one of its conditions currently holds. All
/// conditions for a rule are conjunctive; a rule with no conditions never
/// fires (guards against a malformed rule matching everything).
pub fn rule_matches(rule: &AlertRule, input: &EvaluationInput<'_>) -> bool {
    if rule.conditions.is_empty() {
        return false;
    }
    rule.conditions.iter().all(|c| condition_holds(c, input))
}

fn condition_holds(condition: &AlertCondition, input: &EvaluationInput<'_>) -> bool {
    let Some(&value) = input.metrics.get(&condition.metric) else {
        return false;
    };
    if !condition.operator.evaluate(value, condition.threshold) {
        return false;
    }
    match condition.duration_minutes {
        None => true,
        Some(required) => input
            .continuous_minutes
            .get(&condition.metric)
            .copied()
            .unwrap_or(0)
            >= required,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use breeze_domain_models::alert::{AlertTarget, ConditionOperator, Severity};
    use uuid::Uuid;

    fn rule_with(conditions: Vec<AlertCondition>) -> AlertRule {
        AlertRule {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            name: "cpu high".into(),
            severity: Severity::Warning,
            enabled: true,
            targets: AlertTarget {
                device_ids: None,
                device_group_ids: None,
                site_ids: None,
            },
            conditions,
            cooldown_minutes: 15,
            escalation_policy_id: None,
            notification_channel_ids: vec![],
            auto_resolve: true,
            deleted_at: None,
        }
    }

    #[test]
    fn simple_threshold_condition_fires_when_exceeded() {
        let rule = rule_with(vec![AlertCondition {
            metric: "cpu_percent".into(),
            operator: ConditionOperator::Gt,
            threshold: 90.0,
            duration_minutes: None,
        }]);
        let mut metrics = HashMap::new();
        metrics.insert("cpu_percent".to_string(), 95.0);
        let input = EvaluationInput {
            metrics: &metrics,
            continuous_minutes: &HashMap::new(),
        };
        assert!(rule_matches(&rule, &input));
    }

    #[test]
    fn duration_qualified_condition_requires_minimum_window() {
        let rule = rule_with(vec![AlertCondition {
            metric: "cpu_percent".into(),
            operator: ConditionOperator::Gt,
            threshold: 90.0,
            duration_minutes: Some(5),
        }]);
        let mut metrics = HashMap::new();
        metrics.insert("cpu_percent".to_string(), 95.0);
        let mut continuous = HashMap::new();
        continuous.insert("cpu_percent".to_string(), 3);
        let input = EvaluationInput {
            metrics: &metrics,
            continuous_minutes: &continuous,
        };
        assert!(!rule_matches(&rule, &input));

        continuous.insert("cpu_percent".to_string(), 5);
        let input = EvaluationInput {
            metrics: &metrics,
            continuous_minutes: &continuous,
        };
        assert!(rule_matches(&rule, &input));
    }

    #[test]
    fn missing_metric_never_matches() {
        let rule = rule_with(vec![AlertCondition {
            metric: "disk_percent".into(),
            operator: ConditionOperator::Gt,
            threshold: 90.0,
            duration_minutes: None,
        }]);
        let input = EvaluationInput {
            metrics: &HashMap::new(),
            continuous_minutes: &HashMap::new(),
        };
        assert!(!rule_matches(&rule, &input));
    }

    #[test]
    fn rule_with_no_conditions_never_fires() {
        let rule = rule_with(vec![]);
        let input = EvaluationInput {
            metrics: &HashMap::new(),
            continuous_minutes: &HashMap::new(),
        };
        assert!(!rule_matches(&rule, &input));
    }
}
