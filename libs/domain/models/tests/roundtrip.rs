use breeze_domain_models::alert::{Alert, AlertStatus, Severity};
use breeze_domain_models::device::{Device, DeviceStatus, OsType};
use breeze_domain_models::job::RetryPolicy;
use breeze_domain_models::tenancy::AccessibleOrgIds;
use chrono::Utc;
use uuid::Uuid;

#[test]
fn accessible_org_ids_all_contains_anything() {
    let all = AccessibleOrgIds::all();
    assert!(all.contains(Uuid::new_v4()));
    assert!(!all.is_empty_set());
}

#[test]
fn accessible_org_ids_none_contains_nothing() {
    let none = AccessibleOrgIds::none();
    assert!(!none.contains(Uuid::new_v4()));
    assert!(none.is_empty_set());
}

#[test]
fn accessible_org_ids_selected_is_exact() {
    let org = Uuid::new_v4();
    let selected = AccessibleOrgIds::selected(vec![org]);
    assert!(selected.contains(org));
    assert!(!selected.contains(Uuid::new_v4()));
}

#[test]
fn device_status_transitions() {
    assert!(DeviceStatus::Offline.can_transition_to(DeviceStatus::Online));
    assert!(!DeviceStatus::Decommissioned.can_transition_to(DeviceStatus::Online));
    assert!(DeviceStatus::Quarantined.can_transition_to(DeviceStatus::Online));
    assert!(!DeviceStatus::Online.can_transition_to(DeviceStatus::Quarantined));
}

#[test]
fn device_is_stale_after_three_missed_intervals() {
    let now = Utc::now();
    let interval = chrono::Duration::seconds(60);
    let mut device = sample_device();
    device.last_seen_at = Some(now - chrono::Duration::seconds(61 * 3));
    assert!(device.is_stale(now, interval));

    device.last_seen_at = Some(now - chrono::Duration::seconds(59 * 3));
    assert!(!device.is_stale(now, interval));
}

#[test]
fn alert_status_dag_terminates_at_resolved() {
    assert!(AlertStatus::Active.can_transition_to(AlertStatus::Acknowledged));
    assert!(AlertStatus::Acknowledged.can_transition_to(AlertStatus::Resolved));
    assert!(!AlertStatus::Resolved.can_transition_to(AlertStatus::Active));
    assert!(AlertStatus::Resolved.is_terminal());
}

#[test]
fn acknowledged_by_invariant() {
    let mut alert = sample_alert();
    alert.status = AlertStatus::Active;
    alert.acknowledged_by = None;
    assert!(alert.acknowledged_by_invariant_holds());

    alert.status = AlertStatus::Acknowledged;
    assert!(!alert.acknowledged_by_invariant_holds());

    alert.acknowledged_by = Some(Uuid::new_v4());
    alert.acknowledged_at = Some(Utc::now());
    assert!(alert.acknowledged_by_invariant_holds());
}

#[test]
fn retry_policy_backs_off_exponentially_and_caps() {
    let policy = RetryPolicy {
        max_retries: 5,
        backoff_multiplier: 2.0,
        initial_delay_ms: 1_000,
        max_delay_ms: 10_000,
    };
    let now = Utc::now();
    let first = policy.next_retry_at(now, 0) - now;
    let second = policy.next_retry_at(now, 1) - now;
    assert_eq!(first, chrono::Duration::milliseconds(1_000));
    assert_eq!(second, chrono::Duration::milliseconds(2_000));

    let capped = policy.next_retry_at(now, 10) - now;
    assert_eq!(capped, chrono::Duration::milliseconds(10_000));

    assert!(!policy.is_exhausted(5));
    assert!(policy.is_exhausted(6));
}

fn sample_device() -> Device {
    Device {
        id: Uuid::new_v4(),
        org_id: Uuid::new_v4(),
        site_id: Uuid::new_v4(),
        agent_id: "a".repeat(64),
        hostname: "host-1".into(),
        display_name: "Host 1".into(),
        os_type: OsType::Linux,
        os_version: "22.04".into(),
        architecture: "x86_64".into(),
        agent_version: "1.0.0".into(),
        status: DeviceStatus::Online,
        agent_token_hash: "hash".into(),
        last_seen_at: None,
        enrolled_at: Utc::now(),
        tags: vec![],
        certificate: None,
        deleted_at: None,
    }
}

fn sample_alert() -> Alert {
    Alert {
        id: Uuid::new_v4(),
        rule_id: Uuid::new_v4(),
        org_id: Uuid::new_v4(),
        device_id: Uuid::new_v4(),
        severity: Severity::Warning,
        status: AlertStatus::Active,
        title: "CPU high".into(),
        message: "CPU above threshold".into(),
        context: serde_json::json!({}),
        triggered_at: Utc::now(),
        last_seen_at: Utc::now(),
        acknowledged_at: None,
        acknowledged_by: None,
        resolved_at: None,
        resolved_by: None,
    }
}
