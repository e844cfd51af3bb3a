// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-region question scheduler.
//!
//! Evaluations are scheduled so that no region is blocked by another
//! region's latency, concurrency per region stays bounded, and retries
//! preempt regular work. The runner feeds whole jobs in; region workers
//! drain question batches sequentially per region and report each unit's
//! disposition to the job's progress tracker.

pub mod queues;
pub mod unit;
pub mod worker;

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{RetryConfig, SchedulerConfig};
use crate::jobs::{JobSpec, ALL_REGIONS};
use crate::providers::ProviderRouter;
use crate::repository::Repository;

pub use queues::{QuestionBatch, SchedulerQueues};
pub use unit::{retry_backoff, JobProgress, WorkUnit};
pub use worker::{RegionWorker, UnitExecutor};

/// The scheduler facade owned by the process.
pub struct Scheduler {
    queues: Arc<SchedulerQueues>,
    executor: Arc<UnitExecutor>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn Repository>,
        router: Arc<ProviderRouter>,
        config: SchedulerConfig,
        retry: RetryConfig,
    ) -> Arc<Self> {
        let queues = Arc::new(SchedulerQueues::new());
        let executor = Arc::new(UnitExecutor::new(
            repo,
            router,
            Arc::clone(&queues),
            retry,
        ));

        Arc::new(Self {
            queues,
            executor,
            config,
        })
    }

    /// The shared queue set.
    pub fn queues(&self) -> Arc<SchedulerQueues> {
        Arc::clone(&self.queues)
    }

    /// Spawn one worker task per canonical region.
    pub fn spawn_region_workers(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        ALL_REGIONS
            .iter()
            .map(|region| {
                let worker = RegionWorker::new(
                    *region,
                    Arc::clone(&self.executor),
                    Arc::clone(&self.queues),
                    self.config.max_concurrent_per_region,
                );
                tokio::spawn(worker.run(shutdown.clone()))
            })
            .collect()
    }

    /// Expand a job into question batches and enqueue them.
    ///
    /// Batches are enqueued per region in question order, which is what
    /// gives each region its sequential question discipline.
    pub fn submit_job(
        &self,
        job_id: i64,
        jobspec_id: &str,
        spec: &JobSpec,
        progress: &Arc<JobProgress>,
    ) {
        let spec = spec.normalized();
        let matrix = spec.expand_matrix();
        let question_count = spec.effective_questions().len();

        for region in spec.regions() {
            for question_index in 0..question_count {
                let units: Vec<WorkUnit> = matrix
                    .iter()
                    .filter(|u| u.region == region && u.question_index == question_index)
                    .map(|u| {
                        WorkUnit::from_matrix(
                            job_id,
                            jobspec_id,
                            u,
                            spec.constraints,
                            Arc::clone(progress),
                        )
                    })
                    .collect();

                if !units.is_empty() {
                    self.queues.submit_batch(QuestionBatch {
                        region,
                        question_index,
                        units,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{Constraints, ModelSpec, Region};
    use crate::providers::ProviderClient;
    use crate::testing::MemoryRepository;
    use std::time::Duration;

    fn scheduler() -> Arc<Scheduler> {
        let repo = Arc::new(MemoryRepository::new());
        let router = Arc::new(ProviderRouter::new(
            &[],
            ProviderClient::new(),
            Duration::from_secs(30),
        ));
        Scheduler::new(
            repo,
            router,
            SchedulerConfig::default(),
            RetryConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_submit_job_batches_by_region_and_question() {
        let scheduler = scheduler();
        let spec = JobSpec {
            models: vec![
                ModelSpec {
                    id: "m1".to_string(),
                    regions: vec![Region::UsEast, Region::EuWest],
                },
                ModelSpec {
                    id: "m2".to_string(),
                    regions: vec![Region::UsEast],
                },
            ],
            questions: vec!["q1".to_string(), "q2".to_string()],
            constraints: Constraints::default(),
        };
        let progress = JobProgress::new(
            spec.matrix_size(),
            tokio_util::sync::CancellationToken::new(),
        );

        scheduler.submit_job(1, "job-1", &spec, &progress);

        let queues = scheduler.queues();

        // us-east gets q1 with both models, then q2.
        let first = queues.pop_batch(Region::UsEast).unwrap();
        assert_eq!(first.question_index, 0);
        assert_eq!(first.units.len(), 2);
        let second = queues.pop_batch(Region::UsEast).unwrap();
        assert_eq!(second.question_index, 1);

        // eu-west only runs m1.
        let eu = queues.pop_batch(Region::EuWest).unwrap();
        assert_eq!(eu.units.len(), 1);
        assert_eq!(eu.units[0].model_id, "m1");

        // No asia-pacific work.
        assert!(queues.pop_batch(Region::AsiaPacific).is_none());
    }

    #[tokio::test]
    async fn test_build_prompt_includes_region_phrase_and_question() {
        let scheduler = scheduler();
        let progress = JobProgress::new(1, tokio_util::sync::CancellationToken::new());
        let spec = JobSpec {
            models: vec![ModelSpec {
                id: "m1".to_string(),
                regions: vec![Region::EuWest],
            }],
            questions: vec![],
            constraints: Constraints::default(),
        };
        scheduler.submit_job(1, "job-1", &spec, &progress);

        let batch = scheduler.queues().pop_batch(Region::EuWest).unwrap();
        let prompt = scheduler.executor.build_prompt(&batch.units[0]);
        assert!(prompt.contains(Region::EuWest.display_name()));
    }
}
