// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Recovery sweep and outbox publisher tests.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use meridian_core::config::{QueueConfig, RecoveryConfig};
use meridian_core::jobs::{Constraints, JobSpec, ModelSpec};
use meridian_core::testing::MemoryRepository;
use meridian_core::{
    EnvelopeQueue, JobStatus, MemoryQueue, OutboxPublisher, RecoveryController, Region, Repository,
};

fn small_spec() -> JobSpec {
    JobSpec {
        models: vec![ModelSpec {
            id: "m1".to_string(),
            regions: vec![Region::UsEast],
        }],
        questions: vec!["q1".to_string()],
        constraints: Constraints::default(),
    }
}

fn recovery_config() -> RecoveryConfig {
    RecoveryConfig {
        sweep_interval_secs: 60,
        processing_stale_secs: 600,
        created_stale_secs: 300,
        hard_timeout_secs: 3_600,
    }
}

/// A runner that crashed after claiming leaves the job `processing`; the
/// sweep sends it back to `created` and republishes an envelope.
#[tokio::test]
async fn test_stale_processing_job_is_reset_and_republished() {
    let repo = Arc::new(MemoryRepository::new());
    let repo_dyn: Arc<dyn Repository> = repo.clone();

    let job = repo.create_job("job-crashed", None, &small_spec()).await.unwrap();
    repo.update_job_status(job.internal_id, &JobStatus::CLAIMABLE, JobStatus::Processing)
        .await
        .unwrap();

    // Drain the original outbox row so the republish is observable.
    let queue = Arc::new(MemoryQueue::new());
    let publisher = OutboxPublisher::new(
        Arc::clone(&repo_dyn),
        Arc::clone(&queue) as _,
        QueueConfig::default(),
    );
    publisher.publish_batch().await.unwrap();
    let cancel = CancellationToken::new();
    queue.pop(&cancel).await.unwrap().unwrap();

    let controller = RecoveryController::new(Arc::clone(&repo_dyn), recovery_config());

    // Fresh processing jobs are left alone.
    let report = controller.sweep().await.unwrap();
    assert_eq!(report.reset, 0);

    repo.age_job(job.internal_id, 1_200);
    let report = controller.sweep().await.unwrap();
    assert_eq!(report.reset, 1);

    let recovered = repo.job(job.internal_id).await.unwrap().unwrap();
    assert_eq!(recovered.job_status().unwrap(), JobStatus::Created);
    assert_eq!(recovered.retry_count, 1);

    // The republished envelope arrives with the bumped retry count.
    publisher.publish_batch().await.unwrap();
    let envelope = queue.pop(&cancel).await.unwrap().unwrap();
    assert_eq!(envelope.job_id, job.internal_id);
    assert_eq!(envelope.retry_count, 1);
}

/// A job stuck past the hard timeout is failed and its open executions
/// swept.
#[tokio::test]
async fn test_hard_timeout_drives_job_terminal() {
    let repo = Arc::new(MemoryRepository::new());
    let repo_dyn: Arc<dyn Repository> = repo.clone();

    let job = repo.create_job("job-stuck", None, &small_spec()).await.unwrap();
    repo.update_job_status(job.internal_id, &JobStatus::CLAIMABLE, JobStatus::Processing)
        .await
        .unwrap();
    repo.update_job_status(job.internal_id, &[JobStatus::Processing], JobStatus::Running)
        .await
        .unwrap();
    repo.insert_execution(meridian_core::database::models::NewExecution::running(
        job.internal_id,
        Region::UsEast,
        "m1",
        Some("q1".to_string()),
        0,
    ))
    .await
    .unwrap();

    repo.age_job(job.internal_id, 7_200);

    let controller = RecoveryController::new(repo_dyn, recovery_config());
    let report = controller.sweep().await.unwrap();
    assert_eq!(report.timed_out, 1);

    let failed = repo.job(job.internal_id).await.unwrap().unwrap();
    assert_eq!(failed.job_status().unwrap(), JobStatus::Failed);
    assert!(failed
        .reason
        .as_deref()
        .unwrap_or("")
        .contains("hard timeout"));

    let counts = repo.count_executions(job.internal_id).await.unwrap();
    assert_eq!(counts.open(), 0);
    assert_eq!(counts.cancelled, 1);

    // A subsequent sweep finds nothing to do: progress-or-terminal.
    let report = controller.sweep().await.unwrap();
    assert_eq!(report.timed_out, 0);
    assert_eq!(report.reset, 0);
}

/// Stale `created` jobs are republished for another delivery attempt.
#[tokio::test]
async fn test_stale_created_job_is_republished() {
    let repo = Arc::new(MemoryRepository::new());
    let repo_dyn: Arc<dyn Repository> = repo.clone();

    let job = repo.create_job("job-unpublished", None, &small_spec()).await.unwrap();
    repo.age_job(job.internal_id, 400);

    let controller = RecoveryController::new(Arc::clone(&repo_dyn), recovery_config());
    let report = controller.sweep().await.unwrap();
    assert_eq!(report.republished, 1);

    // Original row plus the republished one.
    let rows = repo.unpublished_outbox(10).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.job_id == job.internal_id));
}

/// The publisher delivers at least once: a crash between push and
/// mark-published yields a duplicate envelope, never a lost one.
#[tokio::test]
async fn test_publisher_at_least_once() {
    let repo = Arc::new(MemoryRepository::new());
    let repo_dyn: Arc<dyn Repository> = repo.clone();
    let queue = Arc::new(MemoryQueue::new());

    let job = repo.create_job("job-once", None, &small_spec()).await.unwrap();

    let publisher = OutboxPublisher::new(
        Arc::clone(&repo_dyn),
        Arc::clone(&queue) as _,
        QueueConfig::default(),
    );

    let published = publisher.publish_batch().await.unwrap();
    assert_eq!(published, 1);
    assert_eq!(queue.len().await, 1);

    // Nothing left unpublished; a second pass is a no-op.
    assert_eq!(publisher.publish_batch().await.unwrap(), 0);

    // Simulated crash between push and mark: the row reappears and is
    // delivered again.
    repo.insert_outbox(job.internal_id).await.unwrap();
    assert_eq!(publisher.publish_batch().await.unwrap(), 1);
    assert_eq!(queue.len().await, 2);

    let cancel = CancellationToken::new();
    let first = queue.pop(&cancel).await.unwrap().unwrap();
    let second = queue.pop(&cancel).await.unwrap().unwrap();
    assert_eq!(first.job_id, job.internal_id);
    assert_eq!(second.job_id, job.internal_id);
}
