//! Drains `JobKind::DeploymentFanout`/`PatchFanout` jobs: one job carries a
//! batch of target devices and a single action to issue against all of
//! them. Dispatch is idempotent across re-leases — `job_results` rows are
//! seeded once per target and only un-dispatched targets get a fresh
//! `DeviceCommand` on a retried attempt. Per-target completion is the
//! housekeeping sweep's job, not this worker's: dispatch can run to
//! completion long before any agent has acted on the commands it issued.

use std::collections::HashSet;
use std::time::Duration;

use breeze_domain_models::command::{CommandStatus, CommandType, DeviceCommand};
use breeze_domain_models::job::{DeploymentFanoutPayload, JobKind, JobResultStatus};
use breeze_infra_queue::{JobOutcome, JobRunner};
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

const BATCH_SIZE: i64 = 5;
const LEASE_SECONDS: i64 = 120;
const POLL_INTERVAL: Duration = Duration::from_secs(10);
const COMMAND_TTL_MINUTES: i64 = 30;

fn parse_action(action: &str) -> Option<CommandType> {
    serde_json::from_value(Value::String(action.to_string())).ok()
}

async fn dispatch_one(state: &AppState, job_id: Uuid, payload: Value) -> JobOutcome {
    let fanout: DeploymentFanoutPayload = match serde_json::from_value(payload) {
        Ok(fanout) => fanout,
        Err(e) => return JobOutcome::Poison { error: format!("malformed fanout payload: {e}") },
    };
    let Some(command_type) = parse_action(&fanout.action) else {
        return JobOutcome::Poison { error: format!("unknown fanout action '{}'", fanout.action) };
    };
    if fanout.targets.is_empty() {
        return JobOutcome::Completed;
    }

    let mut devices = Vec::with_capacity(fanout.targets.len());
    for device_id in &fanout.targets {
        match state.devices.get_by_id(*device_id).await {
            Ok(device) => devices.push(device),
            Err(_) => info!(%device_id, %job_id, "fanout target no longer exists, skipping"),
        }
    }
    if devices.is_empty() {
        return JobOutcome::Completed;
    }

    let now = Utc::now();
    let orgs: HashSet<Uuid> = devices.iter().map(|d| d.org_id).collect();
    for org_id in orgs {
        let ids: Vec<Uuid> = devices.iter().filter(|d| d.org_id == org_id).map(|d| d.id).collect();
        if let Err(e) = state.fanouts.seed_results(job_id, org_id, &ids, now).await {
            return JobOutcome::Retry { error: e.to_string() };
        }
    }

    let existing = match state.fanouts.list_for_job(job_id).await {
        Ok(rows) => rows,
        Err(e) => return JobOutcome::Retry { error: e.to_string() },
    };
    let already_handled: HashSet<Uuid> = existing.iter().filter(|r| r.status != JobResultStatus::Pending).map(|r| r.device_id).collect();

    for device in &devices {
        if already_handled.contains(&device.id) {
            continue;
        }

        if command_type.is_serialized() {
            match state.commands.has_in_flight_of_kind(device.id, command_type).await {
                Ok(true) => {
                    if let Err(e) = state
                        .fanouts
                        .mark_outcome(job_id, device.id, JobResultStatus::Failed, Some("a command of this type is already in flight for this device"), now)
                        .await
                    {
                        warn!(device_id = %device.id, %job_id, error = %e, "failed to record fanout skip");
                    }
                    continue;
                }
                Ok(false) => {}
                Err(e) => return JobOutcome::Retry { error: e.to_string() },
            }
        }

        let command = DeviceCommand {
            id: Uuid::new_v4(),
            device_id: device.id,
            org_id: device.org_id,
            kind: command_type,
            payload: fanout.payload.clone(),
            status: CommandStatus::Pending,
            exit_code: None,
            stdout: None,
            stderr: None,
            issued_by: fanout.issued_by,
            issued_at: now,
            started_at: None,
            completed_at: None,
            expires_at: now + chrono::Duration::minutes(COMMAND_TTL_MINUTES),
        };
        if let Err(e) = state.commands.enqueue(&command).await {
            return JobOutcome::Retry { error: e.to_string() };
        }
        if let Err(e) = state.fanouts.mark_dispatched(job_id, device.id, command.id).await {
            warn!(device_id = %device.id, %job_id, error = %e, "failed to record fanout dispatch");
        }
    }

    JobOutcome::Completed
}

fn spawn_lane(state: AppState, kind: JobKind) {
    tokio::spawn(async move {
        let runner = JobRunner::new((*state.jobs).clone(), kind, chrono::Duration::seconds(LEASE_SECONDS));
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            ticker.tick().await;
            let state = state.clone();
            match runner
                .run_once(BATCH_SIZE, Utc::now(), move |job_id, payload| {
                    let state = state.clone();
                    async move { dispatch_one(&state, job_id, payload).await }
                })
                .await
            {
                Ok(drained) if drained > 0 => info!(?kind, drained, "fanout worker drained batch"),
                Ok(_) => {}
                Err(e) => warn!(?kind, error = %e, "fanout worker batch failed"),
            }
        }
    });
}

pub fn spawn_fanout_worker(state: AppState) {
    spawn_lane(state.clone(), JobKind::DeploymentFanout);
    spawn_lane(state, JobKind::PatchFanout);
}
