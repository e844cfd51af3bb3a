// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Stale-job recovery.
//!
//! The non-scheduler failure paths: a worker that crashed after claiming
//! leaves its job in `processing`; a publisher that never ran leaves jobs
//! in `created`; and anything stuck past the hard timeout is failed
//! outright. Every transition is conditional, so a sweep racing a live
//! runner loses cleanly.

use std::sync::Arc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RecoveryConfig;
use crate::database::error::DatabaseResult;
use crate::jobs::JobStatus;
use crate::repository::Repository;

/// Jobs examined per status per sweep
const SWEEP_LIMIT: i64 = 100;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Jobs failed for exceeding the hard timeout
    pub timed_out: usize,
    /// `processing` jobs sent back to `created` for re-enqueue
    pub reset: usize,
    /// `created` jobs republished to the queue
    pub republished: usize,
}

/// The recovery controller task.
pub struct RecoveryController {
    repo: Arc<dyn Repository>,
    config: RecoveryConfig,
}

impl RecoveryController {
    pub fn new(repo: Arc<dyn Repository>, config: RecoveryConfig) -> Self {
        Self { repo, config }
    }

    /// Run sweeps until the shutdown token fires.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.sweep_interval_secs,
            "recovery controller starting"
        );

        let mut ticker = interval(self.config.sweep_interval());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(report) if report != SweepReport::default() => {
                            info!(
                                timed_out = report.timed_out,
                                reset = report.reset,
                                republished = report.republished,
                                "recovery sweep acted"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "recovery sweep failed"),
                    }
                }
            }
        }

        info!("recovery controller stopped");
    }

    /// One full pass over the failure paths.
    ///
    /// The hard-timeout pass runs first so a job past its deadline is
    /// failed rather than resurrected by the stale-`processing` pass.
    pub async fn sweep(&self) -> DatabaseResult<SweepReport> {
        let mut report = SweepReport::default();

        for status in [JobStatus::Processing, JobStatus::Running, JobStatus::Finalizing] {
            let stuck = self
                .repo
                .stale_jobs(status, self.config.hard_timeout_secs, SWEEP_LIMIT)
                .await?;
            for job in stuck {
                let transition = self
                    .repo
                    .update_job_status(job.internal_id, &[status], JobStatus::Failed)
                    .await?;
                if transition.applied {
                    self.repo
                        .record_job_outcome(
                            job.internal_id,
                            job.completed_count,
                            job.failed_count,
                            Some("job exceeded hard timeout"),
                        )
                        .await?;
                    self.repo.cancel_open_executions(job.internal_id).await?;
                    warn!(jobspec_id = %job.jobspec_id, status = %status, "stuck job failed");
                    report.timed_out += 1;
                }
            }
        }

        // A runner that crashed before writing any execution leaves the job
        // in `processing`; send it back to `created` and republish.
        let orphaned = self
            .repo
            .stale_jobs(
                JobStatus::Processing,
                self.config.processing_stale_secs,
                SWEEP_LIMIT,
            )
            .await?;
        for job in orphaned {
            let transition = self
                .repo
                .update_job_status(job.internal_id, &[JobStatus::Processing], JobStatus::Created)
                .await?;
            if transition.applied {
                self.repo.increment_job_retry(job.internal_id).await?;
                self.repo.insert_outbox(job.internal_id).await?;
                info!(jobspec_id = %job.jobspec_id, "orphaned processing job reset");
                report.reset += 1;
            }
        }

        // Jobs stuck before a claim: never published (publisher outage,
        // lost outbox mark) or published into a queue that lost the
        // envelope. Both get a fresh outbox row; duplicate envelopes are
        // absorbed by the claim logic.
        for status in [JobStatus::Created, JobStatus::Queued] {
            let unclaimed = self
                .repo
                .stale_jobs(status, self.config.created_stale_secs, SWEEP_LIMIT)
                .await?;
            for job in unclaimed {
                self.repo.increment_job_retry(job.internal_id).await?;
                self.repo.insert_outbox(job.internal_id).await?;
                info!(jobspec_id = %job.jobspec_id, status = %status, "unclaimed job republished");
                report.republished += 1;
            }
        }

        Ok(report)
    }
}
