// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Queue envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The queue-carried reference to a job.
///
/// Envelopes are idempotent keys: the carrier may redeliver them, and the
/// claim lock plus the execution dedup barrier absorb the duplicates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    /// Internal numeric job id
    pub job_id: i64,
    /// Submitter-supplied job id
    pub jobspec_id: String,
    /// Delivery attempts so far
    pub retry_count: i32,
    /// When this envelope was pushed
    pub enqueued_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(job_id: i64, jobspec_id: impl Into<String>, retry_count: i32) -> Self {
        Self {
            job_id,
            jobspec_id: jobspec_id.into(),
            retry_count,
            enqueued_at: Utc::now(),
        }
    }
}
