// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! End-to-end job lifecycle tests over the full component stack.

mod common;

use std::time::Duration;

use meridian_core::jobs::{Constraints, JobSpec, ModelSpec};
use meridian_core::scheduler::JobProgress;
use meridian_core::{cancel_job, EnvelopeQueue, ExecutionStatus, JobStatus, Region, Repository};

use common::{fast_retry, provider_mock, Harness};

fn spec_2x2x2() -> JobSpec {
    JobSpec {
        models: vec![
            ModelSpec {
                id: "m1".to_string(),
                regions: vec![Region::UsEast, Region::EuWest],
            },
            ModelSpec {
                id: "m2".to_string(),
                regions: vec![Region::UsEast, Region::EuWest],
            },
        ],
        questions: vec!["q1".to_string(), "q2".to_string()],
        constraints: Constraints {
            job_timeout_secs: 30,
            provider_timeout_secs: 5,
            min_success_rate: 0.5,
        },
    }
}

/// Happy path: 2 models x 2 regions x 2 questions, all providers healthy.
#[tokio::test]
async fn test_happy_path_2x2x2() {
    let us = provider_mock(
        "us-provider",
        Region::UsEast,
        "A thorough answer from the us-east deployment.",
        Duration::ZERO,
    )
    .await;
    let eu = provider_mock(
        "eu-provider",
        Region::EuWest,
        "A thorough answer from the eu-west deployment.",
        Duration::ZERO,
    )
    .await;

    let harness = Harness::start(
        vec![us.endpoint.clone(), eu.endpoint.clone()],
        fast_retry(),
    )
    .await;

    let job = harness.submit("job-happy", &spec_2x2x2()).await;
    let done = harness
        .wait_terminal("job-happy", Duration::from_secs(10))
        .await;

    assert_eq!(done.job_status().unwrap(), JobStatus::Completed);
    assert_eq!(done.completed_count, 8);
    assert_eq!(done.failed_count, 0);

    let rows = harness.repo.list_executions(job.internal_id).await.unwrap();
    assert_eq!(rows.len(), 8);
    for row in &rows {
        assert_eq!(row.execution_status().unwrap(), ExecutionStatus::Completed);
        assert!(row.completed_at.is_some());

        // Strict region lock: the provider that served the call lives in
        // the row's own region.
        let expected_provider = match row.execution_region().unwrap() {
            Region::UsEast => "us-provider",
            Region::EuWest => "eu-provider",
            other => panic!("unexpected region {other}"),
        };
        assert_eq!(row.provider_id, expected_provider);

        let receipt = row.receipt.as_ref().expect("receipt persisted");
        assert_eq!(receipt["provider"]["region"], row.region);
        assert_eq!(receipt["classification"], "substantive");
    }

    // Question sequencing per region: every q1 start precedes every q2
    // start within the same region.
    for region in [Region::UsEast, Region::EuWest] {
        let started = |question: &str| {
            rows.iter()
                .filter(|r| {
                    r.region == region.as_str() && r.question_id.as_deref() == Some(question)
                })
                .map(|r| r.started_at.expect("started_at"))
                .collect::<Vec<_>>()
        };
        let q1 = started("q1");
        let q2 = started("q2");
        assert_eq!(q1.len(), 2);
        assert_eq!(q2.len(), 2);
        let latest_q1 = q1.iter().max().unwrap();
        let earliest_q2 = q2.iter().min().unwrap();
        assert!(latest_q1 <= earliest_q2, "question order violated in {region}");
    }
}

/// A duplicate envelope for a finished job is dropped without touching
/// state or the dead-letter queue.
#[tokio::test]
async fn test_duplicate_envelope_for_terminal_job_is_dropped() {
    let us = provider_mock("us-provider", Region::UsEast, "An adequate answer, long enough.", Duration::ZERO).await;
    let harness = Harness::start(vec![us.endpoint.clone()], fast_retry()).await;

    let spec = JobSpec {
        models: vec![ModelSpec {
            id: "m1".to_string(),
            regions: vec![Region::UsEast],
        }],
        questions: vec!["q1".to_string()],
        constraints: Constraints::default(),
    };

    let job = harness.submit("job-dup", &spec).await;
    harness
        .wait_terminal("job-dup", Duration::from_secs(10))
        .await;

    let before = harness.repo.list_executions(job.internal_id).await.unwrap();

    // Publisher crash between push and mark-published: the same envelope
    // arrives again.
    harness
        .queue
        .push(meridian_core::Envelope::new(job.internal_id, "job-dup", 0))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let after = harness.repo.list_executions(job.internal_id).await.unwrap();
    assert_eq!(before.len(), after.len());
    assert_eq!(harness.queue.dead_letter_len().await, 0);

    let job = harness.repo.job(job.internal_id).await.unwrap().unwrap();
    assert_eq!(job.job_status().unwrap(), JobStatus::Completed);
}

/// Redelivered work against already-persisted units records
/// duplicate_skipped rows and nothing else.
#[tokio::test]
async fn test_redelivered_units_record_duplicate_skipped() {
    let us = provider_mock("us-provider", Region::UsEast, "An adequate answer, long enough.", Duration::ZERO).await;
    let harness = Harness::start(vec![us.endpoint.clone()], fast_retry()).await;

    let spec = JobSpec {
        models: vec![ModelSpec {
            id: "m1".to_string(),
            regions: vec![Region::UsEast],
        }],
        questions: vec!["q1".to_string(), "q2".to_string()],
        constraints: Constraints::default(),
    };

    let job = harness.submit("job-redeliver", &spec).await;
    harness
        .wait_terminal("job-redeliver", Duration::from_secs(10))
        .await;

    // A second runner that somehow got past the claim would re-schedule the
    // same matrix; the auto-stop check absorbs every unit.
    let progress = JobProgress::new(
        spec.matrix_size(),
        tokio_util::sync::CancellationToken::new(),
    );
    harness
        .scheduler
        .submit_job(job.internal_id, "job-redeliver", &spec, &progress);
    progress.wait_all().await;

    let rows = harness.repo.list_executions(job.internal_id).await.unwrap();
    let completed = rows
        .iter()
        .filter(|r| r.execution_status().unwrap() == ExecutionStatus::Completed)
        .count();
    let skipped = rows
        .iter()
        .filter(|r| r.execution_status().unwrap() == ExecutionStatus::DuplicateSkipped)
        .count();

    assert_eq!(completed, 2);
    assert_eq!(skipped, 2);

    // At most one completed row per unit.
    for row in rows.iter().filter(|r| r.status == "completed") {
        let same_unit_completed = rows
            .iter()
            .filter(|r| r.unit_key() == row.unit_key() && r.status == "completed")
            .count();
        assert_eq!(same_unit_completed, 1);
    }
}

/// User cancel mid-flight: completed rows stay, open rows are swept, the
/// context aborts in-flight calls.
#[tokio::test]
async fn test_user_cancel_mid_flight() {
    let us = provider_mock(
        "us-provider",
        Region::UsEast,
        "An adequate answer, long enough.",
        Duration::from_millis(400),
    )
    .await;
    let harness = Harness::start(vec![us.endpoint.clone()], fast_retry()).await;

    let spec = JobSpec {
        models: vec![ModelSpec {
            id: "m1".to_string(),
            regions: vec![Region::UsEast],
        }],
        questions: (1..=4).map(|i| format!("q{i}")).collect(),
        constraints: Constraints {
            job_timeout_secs: 30,
            provider_timeout_secs: 5,
            min_success_rate: 0.0,
        },
    };

    let job = harness.submit("job-cancel", &spec).await;

    // Let the first question land, then cancel while later ones are
    // pending or in flight.
    harness
        .wait_executions(job.internal_id, 1, Duration::from_secs(5))
        .await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let outcome = cancel_job(
        harness.repo.as_ref(),
        &harness.contexts,
        "job-cancel",
        Some("wallet-1"),
    )
    .await
    .expect("cancel succeeds");
    assert_eq!(outcome.status, JobStatus::Cancelled);
    assert!(outcome.context_signalled);

    let done = harness
        .wait_terminal("job-cancel", Duration::from_secs(5))
        .await;
    assert_eq!(done.job_status().unwrap(), JobStatus::Cancelled);

    // Give the workers a moment to drain the remaining batches as
    // cancelled rows.
    harness
        .wait_executions(job.internal_id, 4, Duration::from_secs(5))
        .await;

    let rows = harness.repo.list_executions(job.internal_id).await.unwrap();
    let mut completed = 0;
    for row in &rows {
        let status = row.execution_status().unwrap();
        assert!(
            !matches!(status, ExecutionStatus::Pending | ExecutionStatus::Running),
            "open row survived cancel: {row:?}"
        );
        if status == ExecutionStatus::Completed {
            completed += 1;
        }
    }
    assert!(completed >= 1, "first question should have completed");
    assert!(completed < 4, "cancel arrived before the job finished");

    // Idempotent: cancelling again succeeds without new effects.
    let again = cancel_job(
        harness.repo.as_ref(),
        &harness.contexts,
        "job-cancel",
        Some("wallet-1"),
    )
    .await
    .expect("second cancel succeeds");
    assert_eq!(again.status, JobStatus::Cancelled);
    assert_eq!(again.cancelled_executions, 0);
}

/// Cancel by a non-owner is rejected.
#[tokio::test]
async fn test_cancel_requires_ownership() {
    let us = provider_mock("us-provider", Region::UsEast, "An adequate answer, long enough.", Duration::ZERO).await;
    let harness = Harness::start(vec![us.endpoint.clone()], fast_retry()).await;

    let spec = JobSpec {
        models: vec![ModelSpec {
            id: "m1".to_string(),
            regions: vec![Region::UsEast],
        }],
        questions: vec!["q1".to_string()],
        constraints: Constraints::default(),
    };
    harness.submit("job-owned", &spec).await;

    let err = cancel_job(
        harness.repo.as_ref(),
        &harness.contexts,
        "job-owned",
        Some("someone-else"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, meridian_core::CancelError::NotOwner(_)));
}

/// Job timeout: a slow provider cannot hold the job past its deadline.
#[tokio::test]
async fn test_job_timeout() {
    let us = provider_mock(
        "us-provider",
        Region::UsEast,
        "An adequate answer, long enough.",
        Duration::from_secs(10),
    )
    .await;
    let harness = Harness::start(vec![us.endpoint.clone()], fast_retry()).await;

    let spec = JobSpec {
        models: vec![ModelSpec {
            id: "m1".to_string(),
            regions: vec![Region::UsEast],
        }],
        questions: vec!["q1".to_string()],
        constraints: Constraints {
            job_timeout_secs: 1,
            provider_timeout_secs: 30,
            min_success_rate: 0.5,
        },
    };

    let job = harness.submit("job-timeout", &spec).await;
    let done = harness
        .wait_terminal("job-timeout", Duration::from_secs(5))
        .await;

    assert_eq!(done.job_status().unwrap(), JobStatus::Failed);
    assert!(done.reason.as_deref().unwrap_or("").contains("timed out"));

    let rows = harness.repo.list_executions(job.internal_id).await.unwrap();
    for row in &rows {
        let status = row.execution_status().unwrap();
        assert!(
            matches!(
                status,
                ExecutionStatus::Cancelled | ExecutionStatus::Failed
            ),
            "unexpected status after timeout: {status}"
        );
    }
}

/// Empty questions: one execution per (model, region) with a NULL question.
#[tokio::test]
async fn test_empty_questions_boundary() {
    let us = provider_mock("us-provider", Region::UsEast, "An adequate answer, long enough.", Duration::ZERO).await;
    let harness = Harness::start(vec![us.endpoint.clone()], fast_retry()).await;

    let spec = JobSpec {
        models: vec![ModelSpec {
            id: "m1".to_string(),
            regions: vec![Region::UsEast],
        }],
        questions: vec![],
        constraints: Constraints::default(),
    };

    let job = harness.submit("job-legacy", &spec).await;
    let done = harness
        .wait_terminal("job-legacy", Duration::from_secs(10))
        .await;

    assert_eq!(done.job_status().unwrap(), JobStatus::Completed);

    let rows = harness.repo.list_executions(job.internal_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].question_id.is_none());
    assert_eq!(
        rows[0].execution_status().unwrap(),
        ExecutionStatus::Completed
    );
}
