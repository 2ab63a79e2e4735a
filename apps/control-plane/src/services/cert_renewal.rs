//! Drains `JobKind::CertRenewalSweep` reminder jobs the housekeeping sweep
//! enqueues once a device's certificate is within its renewal window.
//! Renewal itself only ever happens agent-side, via `/renew-cert` — this
//! worker's sole job is to turn the reminder into an audit record an
//! operator's own alerting can act on.

use std::time::Duration;

use breeze_domain_models::audit::{ActorType, AuditResult};
use breeze_domain_models::job::JobKind;
use breeze_infra_queue::{JobOutcome, JobRunner};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::handlers::record_audit;
use crate::state::AppState;

const BATCH_SIZE: i64 = 20;
const LEASE_SECONDS: i64 = 60;
const POLL_INTERVAL: Duration = Duration::from_secs(30);

async fn remind_one(state: &AppState, payload: serde_json::Value) -> JobOutcome {
    let Some(device_id) = payload.get("deviceId").and_then(|v| v.as_str()).and_then(|s| s.parse::<Uuid>().ok()) else {
        return JobOutcome::Poison { error: "cert renewal job missing deviceId".into() };
    };
    let Some(org_id) = payload.get("orgId").and_then(|v| v.as_str()).and_then(|s| s.parse::<Uuid>().ok()) else {
        return JobOutcome::Poison { error: "cert renewal job missing orgId".into() };
    };

    let device = match state.devices.get_by_id(device_id).await {
        Ok(device) => device,
        Err(_) => {
            info!(%device_id, "skipping cert renewal reminder for device no longer present");
            return JobOutcome::Completed;
        }
    };
    let Some(cert) = &device.certificate else {
        return JobOutcome::Completed;
    };

    record_audit(
        state,
        Some(org_id),
        ActorType::System,
        device_id,
        None,
        "device.cert_renewal_due",
        "device",
        Some(device_id),
        AuditResult::Success,
        json!({ "expiresAt": cert.expires_at, "serial": cert.serial }),
    )
    .await;
    JobOutcome::Completed
}

pub fn spawn_cert_renewal_worker(state: AppState) {
    tokio::spawn(async move {
        let runner = JobRunner::new((*state.jobs).clone(), JobKind::CertRenewalSweep, chrono::Duration::seconds(LEASE_SECONDS));
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            ticker.tick().await;
            let state = state.clone();
            match runner
                .run_once(BATCH_SIZE, Utc::now(), move |_job_id, payload| {
                    let state = state.clone();
                    async move { remind_one(&state, payload).await }
                })
                .await
            {
                Ok(drained) if drained > 0 => info!(drained, "cert renewal worker drained batch"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "cert renewal worker batch failed"),
            }
        }
    });
}
