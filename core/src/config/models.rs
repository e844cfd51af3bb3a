// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Configuration data models.

use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::time::Duration;

use crate::database::DatabaseConfig;
use crate::jobs::spec::{
    DEFAULT_JOB_TIMEOUT_SECS, DEFAULT_MIN_SUCCESS_RATE, DEFAULT_PROVIDER_TIMEOUT_SECS,
};
use crate::providers::types::ProviderEndpoint;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Database connection settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Provider registry and health checking
    #[serde(default)]
    #[validate]
    pub providers: ProvidersConfig,

    /// Region scheduler settings
    #[serde(default)]
    #[validate]
    pub scheduler: SchedulerConfig,

    /// Defaults applied to jobs whose spec omits constraints
    #[serde(default)]
    #[validate]
    pub jobs: JobsConfig,

    /// Unit-level retry policy
    #[serde(default)]
    #[validate]
    pub retry: RetryConfig,

    /// Queue and outbox publishing
    #[serde(default)]
    #[validate]
    pub queue: QueueConfig,

    /// Runner behavior
    #[serde(default)]
    #[validate]
    pub runner: RunnerConfig,

    /// Stale-job recovery sweeps
    #[serde(default)]
    #[validate]
    pub recovery: RecoveryConfig,
}

/// Provider registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProvidersConfig {
    /// Ordered list of provider endpoints with region tags
    #[serde(default)]
    #[validate]
    pub endpoints: Vec<ProviderEndpoint>,

    /// Seconds between provider health checks
    #[validate(minimum = 1)]
    pub health_check_interval_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            health_check_interval_secs: 15,
        }
    }
}

impl ProvidersConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// A provider's health flag is trusted for twice the check interval.
    pub fn staleness_window(&self) -> Duration {
        self.health_check_interval() * 2
    }
}

/// Region scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SchedulerConfig {
    /// Bounded concurrency per region worker, sized to hold the model
    /// fan-out of one question plus headroom
    #[validate(minimum = 1)]
    pub max_concurrent_per_region: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_region: 10,
        }
    }
}

/// Job constraint defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JobsConfig {
    /// Hard per-job deadline (seconds)
    #[validate(minimum = 1)]
    pub job_timeout_secs: u64,

    /// Per-provider-call deadline (seconds)
    #[validate(minimum = 1)]
    pub provider_timeout_secs: u64,

    /// Minimum success rate for job-success determination
    #[validate(minimum = 0.0)]
    #[validate(maximum = 1.0)]
    pub min_success_rate: f64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            provider_timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
            min_success_rate: DEFAULT_MIN_SUCCESS_RATE,
        }
    }
}

/// Unit-level retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetryConfig {
    /// Attempts per unit, including the first
    #[validate(minimum = 1)]
    pub max_attempts: u32,

    /// Backoff before the first retry (milliseconds)
    #[validate(minimum = 1)]
    pub backoff_initial_ms: u64,

    /// Backoff ceiling (milliseconds)
    #[validate(minimum = 1)]
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_initial_ms: 2_000,
            backoff_max_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// Queue and outbox publisher configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QueueConfig {
    /// Envelope deliveries after which an envelope is dead-lettered
    #[validate(minimum = 1)]
    pub dead_letter_threshold: i32,

    /// How often the outbox publisher scans for unpublished rows
    /// (milliseconds)
    #[validate(minimum = 10)]
    pub publish_interval_ms: u64,

    /// Outbox rows read per publisher scan
    #[validate(minimum = 1)]
    pub publish_batch: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dead_letter_threshold: 5,
            publish_interval_ms: 500,
            publish_batch: 100,
        }
    }
}

impl QueueConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

/// Runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RunnerConfig {
    /// How long finalize waits for in-flight execution writes to land
    /// (seconds)
    pub barrier_grace_secs: u64,

    /// Margin added to the job timeout when sizing the claim-lock TTL
    /// (seconds)
    #[validate(minimum = 1)]
    pub claim_ttl_margin_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            barrier_grace_secs: 10,
            claim_ttl_margin_secs: 60,
        }
    }
}

impl RunnerConfig {
    pub fn barrier_grace(&self) -> Duration {
        Duration::from_secs(self.barrier_grace_secs)
    }
}

/// Recovery sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecoveryConfig {
    /// Seconds between recovery sweeps
    #[validate(minimum = 1)]
    pub sweep_interval_secs: u64,

    /// A `processing` job with no progress for this long is sent back to
    /// `created` (seconds)
    #[validate(minimum = 1)]
    pub processing_stale_secs: i64,

    /// A `created` job unpublished for this long is re-enqueued (seconds)
    #[validate(minimum = 1)]
    pub created_stale_secs: i64,

    /// A job older than this in any active status is failed with a timeout
    /// reason (seconds)
    #[validate(minimum = 1)]
    pub hard_timeout_secs: i64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            processing_stale_secs: 600,
            created_stale_secs: 300,
            hard_timeout_secs: 3_600,
        }
    }
}

impl RecoveryConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
