// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Region workers and unit execution.
//!
//! One worker runs per canonical region. Per loop iteration it drains, in
//! strict priority order, the global retry queue, its own region retry
//! queue, and finally the next question batch. Units within a batch run
//! concurrently under the region semaphore; questions within a region run
//! sequentially.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::database::models::NewExecution;
use crate::jobs::{ExecutionStatus, Region};
use crate::providers::{InferenceRequest, ProviderRouter};
use crate::receipt::Receipt;
use crate::repository::Repository;
use crate::scheduler::queues::{QuestionBatch, SchedulerQueues};
use crate::scheduler::unit::{retry_backoff, WorkUnit};

/// How long an idle worker sleeps before re-checking delayed retries
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Executes individual units: auto-stop probe, row lifecycle, provider
/// call, receipt assembly, and retry dispatch. Shared by all region workers.
pub struct UnitExecutor {
    repo: Arc<dyn Repository>,
    router: Arc<ProviderRouter>,
    queues: Arc<SchedulerQueues>,
    retry: RetryConfig,
}

impl UnitExecutor {
    pub fn new(
        repo: Arc<dyn Repository>,
        router: Arc<ProviderRouter>,
        queues: Arc<SchedulerQueues>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            repo,
            router,
            queues,
            retry,
        }
    }

    /// The full prompt for a unit: the regional system phrase followed by
    /// the question text resolved through the catalog. Unknown ids degrade
    /// to the raw id so a job never fails on catalog drift.
    pub fn build_prompt(&self, unit: &WorkUnit) -> String {
        let phrase = unit.region.system_prompt_phrase();
        match &unit.question_id {
            Some(id) => {
                let text = meridian_questions::prompt_for(id).unwrap_or(id.as_str());
                format!("{phrase}\n\n{text}")
            }
            None => phrase,
        }
    }

    /// Drive one unit to a disposition.
    ///
    /// Every path either settles the unit (reporting to the job's progress
    /// tracker) or re-enqueues it for retry, leaving it outstanding.
    pub async fn run_unit(&self, unit: WorkUnit) {
        let token = unit.progress.token().clone();

        if token.is_cancelled() {
            self.record_cancelled(&unit).await;
            unit.progress.complete_unit();
            return;
        }

        // Auto-stop: a blocking row means the unit is owned or already
        // answered, typically because an envelope was redelivered.
        match self
            .repo
            .has_blocking_execution(
                unit.job_id,
                unit.region,
                &unit.model_id,
                unit.question_id.as_deref(),
            )
            .await
        {
            Ok(true) => {
                self.record_duplicate(&unit).await;
                unit.progress.complete_unit();
                return;
            }
            Ok(false) => {}
            Err(e) => {
                error!(job_id = unit.job_id, error = %e, "auto-stop probe failed");
                self.requeue_after_error(unit);
                return;
            }
        }

        let execution_id = match self
            .repo
            .insert_execution(NewExecution::running(
                unit.job_id,
                unit.region,
                unit.model_id.clone(),
                unit.question_id.clone(),
                unit.attempt as i32,
            ))
            .await
        {
            Ok(id) => id,
            Err(e) if e.is_duplicate_key() => {
                // Lost the insert race with a concurrent claimant; the
                // unique index is the backstop behind the probe.
                self.record_duplicate(&unit).await;
                unit.progress.complete_unit();
                return;
            }
            Err(e) => {
                error!(job_id = unit.job_id, error = %e, "execution insert failed");
                self.requeue_after_error(unit);
                return;
            }
        };

        let started_at = Utc::now();
        let prompt = self.build_prompt(&unit);
        let request =
            InferenceRequest::new(unit.model_id.clone(), prompt.clone()).with_region(unit.region);

        // Dropping the call future on cancellation aborts the in-flight
        // HTTP request, which cues the provider to release resources.
        let call = tokio::select! {
            result = self.router.execute(unit.region, &request, unit.provider_timeout()) => Some(result),
            _ = token.cancelled() => None,
        };

        match call {
            None => {
                if let Err(e) = self
                    .repo
                    .finalize_execution(execution_id, ExecutionStatus::Cancelled, None, None, None)
                    .await
                {
                    error!(execution_id, error = %e, "failed to mark execution cancelled");
                }
                unit.progress.complete_unit();
            }
            Some(Ok(outcome)) => {
                let receipt = Receipt::assemble(
                    &unit.model_id,
                    unit.question_id.as_deref(),
                    &prompt,
                    unit.region,
                    &outcome,
                    started_at,
                );
                let output = serde_json::to_value(&outcome.response).ok();

                if let Err(e) = self
                    .repo
                    .finalize_execution(
                        execution_id,
                        ExecutionStatus::Completed,
                        Some(&outcome.provider_name),
                        output.as_ref(),
                        Some(&receipt.to_json()),
                    )
                    .await
                {
                    error!(execution_id, error = %e, "failed to persist completed execution");
                }

                debug!(
                    job_id = unit.job_id,
                    region = %unit.region,
                    model = %unit.model_id,
                    provider = %outcome.provider_name,
                    classification = %receipt.classification,
                    "unit completed"
                );
                unit.progress.complete_unit();
            }
            Some(Err(provider_error)) => {
                warn!(
                    job_id = unit.job_id,
                    region = %unit.region,
                    model = %unit.model_id,
                    attempt = unit.attempt,
                    error = %provider_error,
                    "unit failed"
                );

                let output = serde_json::json!({
                    "error": provider_error.to_string(),
                    "attempt": unit.attempt,
                });
                if let Err(e) = self
                    .repo
                    .finalize_execution(
                        execution_id,
                        ExecutionStatus::Failed,
                        None,
                        Some(&output),
                        None,
                    )
                    .await
                {
                    error!(execution_id, error = %e, "failed to persist failed execution");
                }

                let next_attempt = unit.attempt + 1;
                if provider_error.is_retryable()
                    && next_attempt < self.retry.max_attempts
                    && !token.is_cancelled()
                {
                    let delay = retry_backoff(
                        next_attempt,
                        self.retry.backoff_initial(),
                        self.retry.backoff_max(),
                    );
                    // All provider failures, including a region with no
                    // healthy provider, park on the global retry queue: an
                    // idle region may help discharge them, while the unit
                    // still targets a provider in its own region. The
                    // attempt cap and the job timeout bound how long a
                    // starved unit lingers.
                    self.queues.push_global_retry(unit.retry_successor(), delay);
                } else {
                    unit.progress.complete_unit();
                }
            }
        }
    }

    /// Storage hiccup: keep the unit outstanding and try again after the
    /// initial backoff, unless the job is already gone. These stay on the
    /// unit's own region retry queue; they are not provider failures, so
    /// there is nothing another region could discharge.
    fn requeue_after_error(&self, unit: WorkUnit) {
        if unit.progress.token().is_cancelled() {
            unit.progress.complete_unit();
        } else {
            let delay = self.retry.backoff_initial();
            self.queues.push_region_retry(unit, delay);
        }
    }

    async fn record_duplicate(&self, unit: &WorkUnit) {
        let new = NewExecution::duplicate_skipped(
            unit.job_id,
            unit.region,
            unit.model_id.clone(),
            unit.question_id.clone(),
            unit.attempt as i32,
        );
        if let Err(e) = self.repo.insert_execution(new).await {
            warn!(job_id = unit.job_id, error = %e, "failed to record duplicate_skipped");
        }
        debug!(
            job_id = unit.job_id,
            region = %unit.region,
            model = %unit.model_id,
            "duplicate unit skipped"
        );
    }

    async fn record_cancelled(&self, unit: &WorkUnit) {
        let now = Utc::now();
        let new = NewExecution {
            job_id: unit.job_id,
            region: unit.region,
            model_id: unit.model_id.clone(),
            question_id: unit.question_id.clone(),
            attempt: unit.attempt as i32,
            status: ExecutionStatus::Cancelled,
            provider_id: String::new(),
            output: None,
            receipt: None,
            started_at: Some(now),
            completed_at: Some(now),
        };
        if let Err(e) = self.repo.insert_execution(new).await {
            warn!(job_id = unit.job_id, error = %e, "failed to record cancelled unit");
        }
    }
}

/// One worker per canonical region.
pub struct RegionWorker {
    region: Region,
    executor: Arc<UnitExecutor>,
    queues: Arc<SchedulerQueues>,
    semaphore: Arc<Semaphore>,
}

impl RegionWorker {
    pub fn new(
        region: Region,
        executor: Arc<UnitExecutor>,
        queues: Arc<SchedulerQueues>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            region,
            executor,
            queues,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Run until the shutdown token fires.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(region = %self.region, "region worker starting");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            // Priority 1: the process-wide retry queue. Any worker may
            // claim any region's retry; the unit still calls a provider in
            // its own region.
            if let Some(unit) = self.queues.pop_ready_global() {
                self.run_retry_unit(unit).await;
                continue;
            }

            // Priority 2: this region's retry queue.
            if let Some(unit) = self.queues.pop_ready_region_retry(self.region) {
                self.run_retry_unit(unit).await;
                continue;
            }

            // Priority 3: the next question batch, in request order.
            if let Some(batch) = self.queues.pop_batch(self.region) {
                self.run_batch(batch).await;
                continue;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.queues.notified() => {}
                _ = tokio::time::sleep(IDLE_POLL) => {}
            }
        }

        info!(region = %self.region, "region worker stopped");
    }

    /// Execute one retry unit under the region semaphore.
    async fn run_retry_unit(&self, unit: WorkUnit) {
        if let Ok(_permit) = self.semaphore.acquire().await {
            self.executor.run_unit(unit).await;
        }
    }

    /// Run every unit of one question concurrently under the region
    /// semaphore, waiting for all of them to terminate before returning.
    /// The next question for this region starts only then.
    async fn run_batch(&self, batch: QuestionBatch) {
        debug!(
            region = %self.region,
            question_index = batch.question_index,
            units = batch.units.len(),
            "starting question batch"
        );

        let tasks = batch.units.into_iter().map(|unit| {
            let executor = Arc::clone(&self.executor);
            let semaphore = Arc::clone(&self.semaphore);
            async move {
                if let Ok(_permit) = semaphore.acquire().await {
                    executor.run_unit(unit).await;
                }
            }
        });

        futures::future::join_all(tasks).await;
    }
}
