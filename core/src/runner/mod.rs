// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The job runner.
//!
//! A runner instance claims an envelope, takes the cluster-wide claim lock
//! on the `jobspec_id`, registers a cancellable context, expands the matrix,
//! feeds the region scheduler, awaits the completion barrier, and finalizes
//! the job's status from what the repository actually persisted. At most one
//! runner is active per `jobspec_id` across the cluster; many jobs run in
//! parallel within one process.

pub mod report;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{QueueConfig, RunnerConfig};
use crate::context::ContextManager;
use crate::database::error::DatabaseResult;
use crate::database::models::JobRecord;
use crate::jobs::{Envelope, JobSpec, JobStatus};
use crate::queue::{ClaimLock, EnvelopeQueue};
use crate::repository::Repository;
use crate::scheduler::{JobProgress, Scheduler};

pub use report::MatrixReport;

/// Poll interval while waiting out the barrier grace window
const GRACE_POLL: Duration = Duration::from_millis(100);

/// How often the barrier re-reads the job row for externally applied
/// terminal statuses (cross-process cancel)
const STATUS_POLL: Duration = Duration::from_millis(500);

/// How the barrier ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BarrierOutcome {
    /// Every unit reported a disposition
    Drained,
    /// The job context ended first (user cancel or process shutdown)
    Interrupted,
    /// The job's hard deadline elapsed
    TimedOut,
}

/// The per-process job runner.
pub struct JobRunner {
    /// Identity of this runner instance, for log correlation
    runner_id: Uuid,
    repo: Arc<dyn Repository>,
    scheduler: Arc<Scheduler>,
    contexts: Arc<ContextManager>,
    claims: Arc<dyn ClaimLock>,
    queue: Arc<dyn EnvelopeQueue>,
    config: RunnerConfig,
    queue_config: QueueConfig,
}

impl JobRunner {
    pub fn new(
        repo: Arc<dyn Repository>,
        scheduler: Arc<Scheduler>,
        contexts: Arc<ContextManager>,
        claims: Arc<dyn ClaimLock>,
        queue: Arc<dyn EnvelopeQueue>,
        config: RunnerConfig,
        queue_config: QueueConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            runner_id: Uuid::new_v4(),
            repo,
            scheduler,
            contexts,
            claims,
            queue,
            config,
            queue_config,
        })
    }

    /// Consume envelopes until the shutdown token fires. Each envelope is
    /// processed on its own task so jobs run in parallel.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(runner_id = %self.runner_id, "job runner starting");

        loop {
            let envelope = match self.queue.pop(&shutdown).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "envelope pop failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if envelope.retry_count > self.queue_config.dead_letter_threshold {
                warn!(
                    job_id = envelope.job_id,
                    jobspec_id = %envelope.jobspec_id,
                    retry_count = envelope.retry_count,
                    "envelope exceeded retry ceiling; dead-lettering"
                );
                if let Err(e) = self.queue.push_dead_letter(envelope).await {
                    error!(error = %e, "dead-letter push failed");
                }
                continue;
            }

            let runner = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                runner.process_envelope(envelope, shutdown).await;
            });
        }

        info!("job runner stopped");
    }

    /// Drive one envelope to a conclusion.
    pub async fn process_envelope(&self, envelope: Envelope, shutdown: CancellationToken) {
        let Ok(Some(job)) = self.repo.job(envelope.job_id).await else {
            debug!(job_id = envelope.job_id, "envelope for unknown job dropped");
            return;
        };

        let Ok(status) = job.job_status() else {
            error!(job_id = job.internal_id, status = %job.status, "unparseable job status");
            return;
        };

        // A terminal job's envelope is dropped with no state change and is
        // not dead-lettered.
        if status.is_terminal() {
            debug!(
                jobspec_id = %job.jobspec_id,
                status = %status,
                "envelope for terminal job dropped"
            );
            return;
        }

        let spec = match job.job_spec() {
            Ok(spec) => spec.normalized(),
            Err(e) => {
                error!(jobspec_id = %job.jobspec_id, error = %e, "unparseable job spec");
                return;
            }
        };

        let job_timeout = Duration::from_secs(spec.constraints.job_timeout_secs);
        let claim_ttl = job_timeout
            + self.config.barrier_grace()
            + Duration::from_secs(self.config.claim_ttl_margin_secs);

        let Some(claim) = self.claims.try_acquire(&job.jobspec_id, claim_ttl) else {
            debug!(jobspec_id = %job.jobspec_id, "claim held elsewhere; envelope dropped");
            return;
        };

        self.process_claimed(&job, &spec, job_timeout, shutdown).await;

        self.claims.release(&job.jobspec_id, claim);
    }

    async fn process_claimed(
        &self,
        job: &JobRecord,
        spec: &JobSpec,
        job_timeout: Duration,
        shutdown: CancellationToken,
    ) {
        let claimed = match self
            .repo
            .update_job_status(job.internal_id, &JobStatus::CLAIMABLE, JobStatus::Processing)
            .await
        {
            Ok(transition) if transition.applied => true,
            Ok(transition) => {
                debug!(
                    jobspec_id = %job.jobspec_id,
                    current = %transition.current,
                    "claim transition lost; envelope dropped"
                );
                false
            }
            Err(e) => {
                error!(jobspec_id = %job.jobspec_id, error = %e, "claim transition failed");
                false
            }
        };
        if !claimed {
            return;
        }

        // The job context: a child of process shutdown, bounded by the
        // job's own deadline below. Registered so a user cancel can reach
        // in-flight work; unregistered on every exit path.
        let token = shutdown.child_token();
        self.contexts.register(&job.jobspec_id, token.clone());

        let matrix = spec.expand_matrix();
        let matrix_size = matrix.len();

        info!(
            jobspec_id = %job.jobspec_id,
            job_id = job.internal_id,
            matrix_size,
            "job claimed"
        );

        let progress = JobProgress::new(matrix_size, token.clone());

        let running = self
            .repo
            .update_job_status(job.internal_id, &[JobStatus::Processing], JobStatus::Running)
            .await;
        match running {
            Ok(transition) if transition.applied => {}
            Ok(transition) => {
                // Cancelled (or recovered) between claim and start.
                debug!(
                    jobspec_id = %job.jobspec_id,
                    current = %transition.current,
                    "job left processing before start"
                );
                self.contexts.unregister(&job.jobspec_id);
                return;
            }
            Err(e) => {
                error!(jobspec_id = %job.jobspec_id, error = %e, "start transition failed");
                self.contexts.unregister(&job.jobspec_id);
                return;
            }
        }

        self.scheduler
            .submit_job(job.internal_id, &job.jobspec_id, spec, &progress);

        let outcome = self
            .await_barrier(job.internal_id, &progress, &token, job_timeout)
            .await;

        if let Err(e) = self
            .finalize(job, spec, matrix_size, outcome, &shutdown)
            .await
        {
            error!(jobspec_id = %job.jobspec_id, error = %e, "finalize failed");
        }

        self.contexts.unregister(&job.jobspec_id);
    }

    /// Wait for the last unit, the job context, the hard deadline, or an
    /// externally applied terminal status, whichever comes first.
    ///
    /// The status poll is what lets a cancel issued by another process
    /// reach this runner's in-flight work: on observing `cancelled` the
    /// local token fires and provider calls abort.
    async fn await_barrier(
        &self,
        job_id: i64,
        progress: &Arc<JobProgress>,
        token: &CancellationToken,
        job_timeout: Duration,
    ) -> BarrierOutcome {
        let deadline = tokio::time::sleep(job_timeout);
        tokio::pin!(deadline);
        let mut status_poll = tokio::time::interval(STATUS_POLL);
        status_poll.tick().await;

        loop {
            tokio::select! {
                _ = progress.wait_all() => return BarrierOutcome::Drained,
                _ = token.cancelled() => return BarrierOutcome::Interrupted,
                _ = &mut deadline => {
                    // Abort in-flight provider calls, then finalize from
                    // whatever rows already landed.
                    token.cancel();
                    return BarrierOutcome::TimedOut;
                }
                _ = status_poll.tick() => {
                    if let Ok(Some(job)) = self.repo.job(job_id).await {
                        if matches!(job.job_status(), Ok(JobStatus::Cancelled)) {
                            token.cancel();
                            return BarrierOutcome::Interrupted;
                        }
                    }
                }
            }
        }
    }

    async fn finalize(
        &self,
        job: &JobRecord,
        spec: &JobSpec,
        matrix_size: usize,
        outcome: BarrierOutcome,
        shutdown: &CancellationToken,
    ) -> DatabaseResult<()> {
        match outcome {
            BarrierOutcome::Interrupted if shutdown.is_cancelled() => {
                // Process shutdown: leave the job active for recovery to
                // re-drive after restart.
                info!(jobspec_id = %job.jobspec_id, "shutdown during job; leaving for recovery");
                Ok(())
            }
            BarrierOutcome::Interrupted => {
                // User cancel already transitioned the job and swept open
                // rows; refresh the counters it could not know yet.
                let report = self.report(job.internal_id, matrix_size).await?;
                self.repo
                    .record_job_outcome(
                        job.internal_id,
                        report.succeeded as i32,
                        report.failed as i32,
                        Some("cancelled by user"),
                    )
                    .await?;
                info!(jobspec_id = %job.jobspec_id, "job cancelled mid-flight");
                Ok(())
            }
            BarrierOutcome::TimedOut => {
                let report = self.report(job.internal_id, matrix_size).await?;
                self.repo.cancel_open_executions(job.internal_id).await?;
                let reason = format!(
                    "job timed out after {}s",
                    spec.constraints.job_timeout_secs
                );
                self.repo
                    .record_job_outcome(
                        job.internal_id,
                        report.succeeded as i32,
                        report.failed as i32,
                        Some(&reason),
                    )
                    .await?;
                let transition = self
                    .repo
                    .update_job_status(
                        job.internal_id,
                        &[JobStatus::Processing, JobStatus::Running, JobStatus::Finalizing],
                        JobStatus::Failed,
                    )
                    .await?;
                warn!(
                    jobspec_id = %job.jobspec_id,
                    applied = transition.applied,
                    "job timed out"
                );
                Ok(())
            }
            BarrierOutcome::Drained => self.finalize_drained(job, spec, matrix_size).await,
        }
    }

    /// Clean finalize: enter the `finalizing` interstitial, wait out the
    /// grace window for in-flight writes, and decide the terminal status
    /// from the persisted rows.
    async fn finalize_drained(
        &self,
        job: &JobRecord,
        spec: &JobSpec,
        matrix_size: usize,
    ) -> DatabaseResult<()> {
        let transition = self
            .repo
            .update_job_status(
                job.internal_id,
                &[JobStatus::Processing, JobStatus::Running],
                JobStatus::Finalizing,
            )
            .await?;
        if !transition.applied {
            // Lost to a concurrent cancel; its bookkeeping stands.
            debug!(
                jobspec_id = %job.jobspec_id,
                current = %transition.current,
                "finalize skipped"
            );
            return Ok(());
        }

        let grace_deadline = Instant::now() + self.config.barrier_grace();
        let mut report = self.report(job.internal_id, matrix_size).await?;
        while !report.covered() && Instant::now() < grace_deadline {
            tokio::time::sleep(GRACE_POLL).await;
            report = self.report(job.internal_id, matrix_size).await?;
        }

        let min_rate = spec.constraints.min_success_rate;
        let success_rate = report.success_rate();

        let (to, reason) = if report.covered() && success_rate >= min_rate {
            (JobStatus::Completed, None)
        } else if !report.covered() {
            (
                JobStatus::Failed,
                Some(format!(
                    "matrix incomplete: {} of {} units settled",
                    report.settled(),
                    matrix_size
                )),
            )
        } else {
            (
                JobStatus::Failed,
                Some(format!(
                    "success rate {success_rate:.2} below minimum {min_rate:.2}"
                )),
            )
        };

        self.repo
            .record_job_outcome(
                job.internal_id,
                report.succeeded as i32,
                report.failed as i32,
                reason.as_deref(),
            )
            .await?;

        let transition = self
            .repo
            .update_job_status(job.internal_id, &[JobStatus::Finalizing], to)
            .await?;

        info!(
            jobspec_id = %job.jobspec_id,
            status = %to,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            applied = transition.applied,
            "job finalized"
        );

        Ok(())
    }

    async fn report(&self, job_id: i64, matrix_size: usize) -> DatabaseResult<MatrixReport> {
        let rows = self.repo.list_executions(job_id).await?;
        Ok(MatrixReport::from_rows(matrix_size, &rows))
    }
}
