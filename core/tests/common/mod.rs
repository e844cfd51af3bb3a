// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shared harness for end-to-end orchestration tests: a full component set
//! (runner, schedulers, router, publisher) over the in-memory repository
//! and wiremock providers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use meridian_core::config::{QueueConfig, RetryConfig, RunnerConfig, SchedulerConfig};
use meridian_core::database::models::JobRecord;
use meridian_core::providers::ProviderEndpoint;
use meridian_core::testing::MemoryRepository;
use meridian_core::{
    ContextManager, HealthChecker, JobRunner, JobSpec, MemoryClaimLock, MemoryQueue,
    OutboxPublisher, ProviderClient, ProviderRouter, Region, Repository, Scheduler,
};

/// A provider mock with its registry entry.
pub struct ProviderMock {
    pub server: MockServer,
    pub endpoint: ProviderEndpoint,
}

/// Start a healthy provider answering every inference call with `text`
/// after `delay`.
pub async fn provider_mock(name: &str, region: Region, text: &str, delay: Duration) -> ProviderMock {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "success": true,
                    "response": text,
                    "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30}
                }))
                .set_delay(delay),
        )
        .mount(&server)
        .await;

    let endpoint = ProviderEndpoint {
        name: name.to_string(),
        endpoint: server.uri(),
        region,
    };

    ProviderMock { server, endpoint }
}

/// A registry entry pointing at nothing; its health check always fails.
pub fn dead_provider(name: &str, region: Region) -> ProviderEndpoint {
    ProviderEndpoint {
        name: name.to_string(),
        endpoint: "http://127.0.0.1:1".to_string(),
        region,
    }
}

/// Fast retry policy for tests.
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        backoff_initial_ms: 20,
        backoff_max_ms: 100,
    }
}

/// The full component set under test.
pub struct Harness {
    pub repo: Arc<MemoryRepository>,
    pub router: Arc<ProviderRouter>,
    pub scheduler: Arc<Scheduler>,
    pub queue: Arc<MemoryQueue>,
    pub contexts: Arc<ContextManager>,
    pub publisher: OutboxPublisher,
    pub shutdown: CancellationToken,
}

impl Harness {
    /// Build and start the whole stack against the given providers. Health
    /// is probed once so the router is immediately usable.
    pub async fn start(endpoints: Vec<ProviderEndpoint>, retry: RetryConfig) -> Self {
        let repo = Arc::new(MemoryRepository::new());
        let repo_dyn: Arc<dyn Repository> = repo.clone();

        let router = Arc::new(ProviderRouter::new(
            &endpoints,
            ProviderClient::new(),
            Duration::from_secs(60),
        ));
        HealthChecker::new(Arc::clone(&router), Duration::from_secs(15))
            .check_all()
            .await;

        let queue = Arc::new(MemoryQueue::new());
        let contexts = Arc::new(ContextManager::new());
        let claims = Arc::new(MemoryClaimLock::new());

        let scheduler = Scheduler::new(
            Arc::clone(&repo_dyn),
            Arc::clone(&router),
            SchedulerConfig::default(),
            retry,
        );

        let runner_config = RunnerConfig {
            barrier_grace_secs: 1,
            claim_ttl_margin_secs: 60,
        };

        let runner = JobRunner::new(
            Arc::clone(&repo_dyn),
            Arc::clone(&scheduler),
            Arc::clone(&contexts),
            claims,
            Arc::clone(&queue) as _,
            runner_config,
            QueueConfig::default(),
        );

        let publisher = OutboxPublisher::new(
            Arc::clone(&repo_dyn),
            Arc::clone(&queue) as _,
            QueueConfig::default(),
        );

        let shutdown = CancellationToken::new();
        scheduler.spawn_region_workers(&shutdown);
        tokio::spawn(Arc::clone(&runner).run(shutdown.clone()));

        Self {
            repo,
            router,
            scheduler,
            queue,
            contexts,
            publisher,
            shutdown,
        }
    }

    /// Create a job and publish its envelope.
    pub async fn submit(&self, jobspec_id: &str, spec: &JobSpec) -> JobRecord {
        let job = self
            .repo
            .create_job(jobspec_id, Some("wallet-1"), spec)
            .await
            .expect("create job");
        self.publisher.publish_batch().await.expect("publish");
        job
    }

    /// Poll until the job reaches a terminal status.
    pub async fn wait_terminal(&self, jobspec_id: &str, timeout: Duration) -> JobRecord {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self
                .repo
                .job_by_jobspec_id(jobspec_id)
                .await
                .expect("fetch job")
                .expect("job exists");
            if job
                .job_status()
                .map(|s| s.is_terminal())
                .unwrap_or(false)
            {
                return job;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("job {jobspec_id} not terminal in {timeout:?}: {job:?}");
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Poll until the job has `count` execution rows.
    pub async fn wait_executions(&self, job_id: i64, count: usize, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let rows = self.repo.list_executions(job_id).await.expect("list");
            if rows.len() >= count {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "job {job_id} has {} rows, wanted {count}: {rows:?}",
                    rows.len()
                );
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
