//! Poll-lease-process-ack loop shared by every job kind's worker. Each
//! worker owns one `JobRunner` bound to a single `JobKind`; the concurrency
//! per kind is controlled by how many `JobRunner::run_once` calls the
//! caller drives in parallel, matching `JobKind::env_var`'s per-kind
//! concurrency knobs.

use std::future::Future;

use breeze_domain_models::job::{JobKind, RetryPolicy};
use breeze_infra_db::JobRepository;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::errors::QueueError;

#[derive(Clone)]
pub struct JobRunner {
    jobs: JobRepository,
    kind: JobKind,
    lease_duration: ChronoDuration,
}

/// What a handler decides once it has attempted a leased job.
pub enum JobOutcome {
    Completed,
    /// Retry later unless the job has exhausted its retry budget, in which
    /// case the runner dead-letters it instead of rescheduling.
    Retry { error: String },
    /// Poison-pill: dead-letter immediately regardless of attempt count.
    Poison { error: String },
}

impl JobRunner {
    pub fn new(jobs: JobRepository, kind: JobKind, lease_duration: ChronoDuration) -> Self {
        Self { jobs, kind, lease_duration }
    }

    /// Leases up to `batch_size` due jobs and runs `handler` over each,
    /// acking or rescheduling according to the returned `JobOutcome`.
    /// Returns the number of jobs it drained from the queue this call.
    /// Retries back off on `RetryPolicy::default()`; use
    /// `run_once_with_retry_policy` when a job kind's retry schedule is
    /// configured per-record (e.g. a webhook's own `retryPolicy`).
    #[instrument(skip(self, handler))]
    pub async fn run_once<F, Fut>(&self, batch_size: i64, now: DateTime<Utc>, handler: F) -> Result<usize, QueueError>
    where
        F: Fn(Uuid, serde_json::Value) -> Fut,
        Fut: Future<Output = JobOutcome>,
    {
        self.run_once_with_retry_policy(batch_size, now, handler, |_| async { RetryPolicy::default() }).await
    }

    /// Same as `run_once`, but `retry_policy_for` resolves the backoff
    /// schedule to apply from the job's own payload — letting a webhook
    /// delivery job retry on the webhook's configured policy instead of a
    /// single schedule shared by every job of that kind.
    #[instrument(skip(self, handler, retry_policy_for))]
    pub async fn run_once_with_retry_policy<F, Fut, R, RFut>(&self, batch_size: i64, now: DateTime<Utc>, handler: F, retry_policy_for: R) -> Result<usize, QueueError>
    where
        F: Fn(Uuid, serde_json::Value) -> Fut,
        Fut: Future<Output = JobOutcome>,
        R: Fn(&serde_json::Value) -> RFut,
        RFut: Future<Output = RetryPolicy>,
    {
        let leased = self.jobs.lease_batch(self.kind, batch_size, now, self.lease_duration).await?;
        let drained = leased.len();

        for job in leased {
            let outcome = handler(job.id, job.payload.clone()).await;
            match outcome {
                JobOutcome::Completed => {
                    self.jobs.complete(job.id, now).await?;
                }
                JobOutcome::Poison { error } => {
                    error!(job_id = %job.id, %error, "dead-lettering poison job");
                    self.jobs.fail(job.id, &error, None, true).await?;
                }
                JobOutcome::Retry { error } => {
                    let attempts = job.attempts + 1;
                    let retry_policy = retry_policy_for(&job.payload).await;
                    if retry_policy.is_exhausted(attempts) {
                        info!(job_id = %job.id, attempts, "retry budget exhausted, dead-lettering");
                        self.jobs.fail(job.id, &error, None, true).await?;
                    } else {
                        let next_retry_at = retry_policy.next_retry_at(now, attempts);
                        self.jobs.fail(job.id, &error, Some(next_retry_at), false).await?;
                    }
                }
            }
        }

        Ok(drained)
    }
}
