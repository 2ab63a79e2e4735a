//! Periodic housekeeping that doesn't belong to any single request: flip
//! devices to `offline` once their heartbeat goes stale, close remote
//! sessions nobody is driving any more, time out commands the agent never
//! acknowledged, and enqueue certificate renewal reminders before they
//! expire.

use std::collections::HashSet;
use std::time::Duration;

use breeze_domain_models::device::DeviceStatus;
use breeze_domain_models::job::{JobKind, JobResultStatus, JobRun, JobStatus};
use breeze_domain_models::session::RemoteSessionStatus;
use breeze_domain_session::staleness::stale_sessions;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::event_bus::ControlPlaneEvent;
use crate::state::AppState;

const TICK_INTERVAL: Duration = Duration::from_secs(30);

async fn sweep_offline_devices(state: &AppState) {
    let cutoff = Utc::now() - state.config.heartbeat_interval * 3;
    let stale = match state.devices.list_stale_online(cutoff).await {
        Ok(devices) => devices,
        Err(e) => {
            warn!(error = %e, "failed to list stale devices");
            return;
        }
    };
    for device in stale {
        if let Err(e) = state.devices.set_status(device.id, &DeviceStatus::Offline).await {
            warn!(device_id = %device.id, error = %e, "failed to mark device offline");
            continue;
        }
        info!(device_id = %device.id, "device marked offline after missed heartbeats");
        state.event_bus.publish(ControlPlaneEvent::DeviceStatusChanged {
            org_id: device.org_id,
            device_id: device.id,
            status: "offline".to_string(),
        });
    }
}

async fn sweep_stale_sessions(state: &AppState) {
    let active = match state.sessions.list_active().await {
        Ok(sessions) => sessions,
        Err(e) => {
            warn!(error = %e, "failed to list active remote sessions");
            return;
        }
    };
    let now = Utc::now();
    for session in stale_sessions(&active, now, state.config.remote_session_idle_timeout) {
        if let Err(e) = state.sessions.end(session.id, RemoteSessionStatus::Disconnected, now).await {
            warn!(session_id = %session.id, error = %e, "failed to end stale remote session");
        }
    }
}

async fn sweep_expired_commands(state: &AppState) {
    let now = Utc::now();
    let expired = match state.commands.list_expired(now).await {
        Ok(commands) => commands,
        Err(e) => {
            warn!(error = %e, "failed to list expired commands");
            return;
        }
    };
    for command in expired {
        if let Err(e) = state.commands.mark_timed_out(command.id).await {
            warn!(command_id = %command.id, error = %e, "failed to mark command timed out");
            continue;
        }
        state.event_bus.publish(ControlPlaneEvent::CommandCompleted {
            org_id: command.org_id,
            command_id: command.id,
            device_id: command.device_id,
            succeeded: false,
        });
    }
}

/// A cert within this window gets a `cert_renewal_sweep` job enqueued;
/// `JobRepository::enqueue`'s insert-or-ignore on `(kind, event_id)` keyed
/// by the device id keeps this idempotent across ticks.
async fn sweep_expiring_certs(state: &AppState) {
    let horizon = Utc::now() + chrono::Duration::days(14);
    let expiring = match state.devices.list_with_expiring_certs(horizon).await {
        Ok(devices) => devices,
        Err(e) => {
            warn!(error = %e, "failed to list devices with expiring certs");
            return;
        }
    };
    for device in expiring {
        let now = Utc::now();
        let job = JobRun {
            id: Uuid::new_v4(),
            kind: JobKind::CertRenewalSweep,
            event_id: format!("cert-renewal:{}", device.id),
            payload: json!({ "deviceId": device.id, "orgId": device.org_id }),
            status: JobStatus::Pending,
            attempts: 0,
            leased_until: None,
            next_retry_at: None,
            last_error: None,
            scheduled_for: now,
            created_at: now,
            completed_at: None,
        };
        if let Err(e) = state.jobs.enqueue(&job).await {
            warn!(device_id = %device.id, error = %e, "failed to enqueue cert renewal reminder");
        }
    }
}

/// Reconciles `job_results` rows left `dispatched` by the fanout worker
/// against the `DeviceCommand` each one points at, then reports a fanout
/// job complete exactly once all of its targets have reached a terminal
/// command state.
async fn sweep_fanout_completions(state: &AppState) {
    let dispatched = match state.fanouts.list_dispatched().await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "failed to list dispatched fanout targets");
            return;
        }
    };

    let now = Utc::now();
    let mut jobs_touched: HashSet<Uuid> = HashSet::new();
    for result in dispatched {
        let Some(command_id) = result.command_id else { continue };
        let command = match state.commands.get(command_id).await {
            Ok(command) => command,
            Err(_) => continue,
        };
        if !command.status.is_terminal() {
            continue;
        }
        let status = if command.succeeded() { JobResultStatus::Succeeded } else { JobResultStatus::Failed };
        let error = if command.succeeded() { None } else { command.stderr.as_deref() };
        if let Err(e) = state.fanouts.mark_outcome(result.job_id, result.device_id, status, error, now).await {
            warn!(job_id = %result.job_id, device_id = %result.device_id, error = %e, "failed to record fanout target outcome");
            continue;
        }
        jobs_touched.insert(result.job_id);
    }

    for job_id in jobs_touched {
        let targets = match state.fanouts.list_for_job(job_id).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(%job_id, error = %e, "failed to list fanout targets");
                continue;
            }
        };
        if targets.is_empty() || !targets.iter().all(|t| t.status.is_terminal()) {
            continue;
        }
        let succeeded = targets.iter().filter(|t| t.status == JobResultStatus::Succeeded).count();
        let failed = targets.iter().filter(|t| t.status == JobResultStatus::Failed).count();
        match state.fanouts.mark_reported(job_id, now).await {
            Ok(true) => {
                state.event_bus.publish(ControlPlaneEvent::DeviceFanoutComplete { org_id: targets[0].org_id, job_id, succeeded, failed });
            }
            Ok(false) => {}
            Err(e) => warn!(%job_id, error = %e, "failed to mark fanout job reported"),
        }
    }
}

pub fn spawn_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            ticker.tick().await;
            sweep_offline_devices(&state).await;
            sweep_stale_sessions(&state).await;
            sweep_expired_commands(&state).await;
            sweep_expiring_certs(&state).await;
            sweep_fanout_completions(&state).await;
        }
    });
}
