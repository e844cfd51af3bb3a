// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Work units and per-job progress tracking.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::jobs::{Constraints, MatrixUnit, Region};

/// One (job, region, model, question) evaluation in flight.
#[derive(Clone)]
pub struct WorkUnit {
    /// Internal numeric job id
    pub job_id: i64,
    /// Submitter-supplied job id, for logging
    pub jobspec_id: String,
    /// The requested region; the provider called always matches it
    pub region: Region,
    pub model_id: String,
    pub question_id: Option<String>,
    pub question_index: usize,
    /// Zero-based attempt counter
    pub attempt: u32,
    /// Region where the unit was first scheduled, preserved across
    /// cross-region retries
    pub origin_region: Region,
    /// Constraints inherited from the JobSpec
    pub constraints: Constraints,
    /// Shared progress tracker for the owning job
    pub progress: Arc<JobProgress>,
}

impl WorkUnit {
    /// Build the first attempt of a matrix unit.
    pub fn from_matrix(
        job_id: i64,
        jobspec_id: &str,
        unit: &MatrixUnit,
        constraints: Constraints,
        progress: Arc<JobProgress>,
    ) -> Self {
        Self {
            job_id,
            jobspec_id: jobspec_id.to_string(),
            region: unit.region,
            model_id: unit.model_id.clone(),
            question_id: unit.question_id.clone(),
            question_index: unit.question_index,
            attempt: 0,
            origin_region: unit.region,
            constraints,
            progress,
        }
    }

    /// The next attempt of this unit. The region and origin are preserved so
    /// a cross-region claimant still targets the right providers.
    pub fn retry_successor(&self) -> Self {
        let mut next = self.clone();
        next.attempt += 1;
        next
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.constraints.provider_timeout_secs)
    }
}

impl std::fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit")
            .field("job_id", &self.job_id)
            .field("region", &self.region)
            .field("model_id", &self.model_id)
            .field("question_id", &self.question_id)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Completion barrier state for one job.
///
/// The runner creates one tracker per job sized to the matrix; every unit
/// reports exactly one final disposition. `wait_all` resolves when the last
/// unit settles; the embedded token carries job-level cancellation to every
/// unit.
pub struct JobProgress {
    outstanding: AtomicUsize,
    notify: Notify,
    token: CancellationToken,
}

impl JobProgress {
    pub fn new(total_units: usize, token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            outstanding: AtomicUsize::new(total_units),
            notify: Notify::new(),
            token,
        })
    }

    /// The job's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Units not yet settled.
    pub fn remaining(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Record one unit's final disposition.
    pub fn complete_unit(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "more completions than units");
        if previous == 1 {
            self.notify.notify_waiters();
        }
    }

    /// Wait until every unit has settled.
    pub async fn wait_all(&self) {
        loop {
            let notified = self.notify.notified();
            if self.remaining() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Exponential retry backoff: `initial * 2^(attempt-1)`, capped.
///
/// `attempt` is the 1-based number of the retry being scheduled, so the
/// first retry waits the initial delay.
pub fn retry_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    if attempt <= 1 {
        return initial.min(max);
    }
    let exponent = (attempt - 1).min(16);
    initial
        .checked_mul(1u32 << exponent)
        .map_or(max, |d| d.min(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_backoff_growth() {
        let initial = Duration::from_secs(2);
        let max = Duration::from_secs(30);

        assert_eq!(retry_backoff(1, initial, max), Duration::from_secs(2));
        assert_eq!(retry_backoff(2, initial, max), Duration::from_secs(4));
        assert_eq!(retry_backoff(3, initial, max), Duration::from_secs(8));
        assert_eq!(retry_backoff(4, initial, max), Duration::from_secs(16));
        // Capped.
        assert_eq!(retry_backoff(5, initial, max), Duration::from_secs(30));
        assert_eq!(retry_backoff(30, initial, max), Duration::from_secs(30));
    }

    #[test]
    fn test_retry_successor_preserves_origin() {
        let progress = JobProgress::new(1, CancellationToken::new());
        let unit = WorkUnit {
            job_id: 1,
            jobspec_id: "job".to_string(),
            region: Region::UsEast,
            model_id: "m1".to_string(),
            question_id: Some("q1".to_string()),
            question_index: 0,
            attempt: 0,
            origin_region: Region::UsEast,
            constraints: Constraints::default(),
            progress,
        };

        let retry = unit.retry_successor();
        assert_eq!(retry.attempt, 1);
        assert_eq!(retry.region, Region::UsEast);
        assert_eq!(retry.origin_region, Region::UsEast);
        assert_eq!(retry.retry_successor().attempt, 2);
    }

    #[tokio::test]
    async fn test_progress_barrier() {
        let progress = JobProgress::new(2, CancellationToken::new());
        assert_eq!(progress.remaining(), 2);

        progress.complete_unit();
        assert_eq!(progress.remaining(), 1);

        let waiter = {
            let progress = Arc::clone(&progress);
            tokio::spawn(async move { progress.wait_all().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        progress.complete_unit();
        waiter.await.unwrap();
        assert_eq!(progress.remaining(), 0);
    }

    #[tokio::test]
    async fn test_wait_all_on_empty_job() {
        let progress = JobProgress::new(0, CancellationToken::new());
        // Resolves immediately.
        progress.wait_all().await;
    }
}
