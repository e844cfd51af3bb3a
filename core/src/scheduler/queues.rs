// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Scheduler queues.
//!
//! Each region worker owns a regular queue of question batches and a region
//! retry queue; a single process-wide global retry queue is shared by every
//! worker. Per-loop priority is global retry, then region retry, then the
//! regular queue. Retry entries carry a ready-at instant so backoffs are
//! honored without blocking the worker.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::jobs::{Region, ALL_REGIONS};
use crate::scheduler::unit::WorkUnit;

/// The (model, region) units of one question for one region, executed
/// concurrently; the next batch for the region starts only after this one
/// fully terminates.
#[derive(Debug)]
pub struct QuestionBatch {
    pub region: Region,
    pub question_index: usize,
    pub units: Vec<WorkUnit>,
}

struct DelayedUnit {
    unit: WorkUnit,
    ready_at: Instant,
}

#[derive(Default)]
struct RegionQueues {
    retry: Mutex<Vec<DelayedUnit>>,
    regular: Mutex<VecDeque<QuestionBatch>>,
}

/// All scheduler queues.
pub struct SchedulerQueues {
    global_retry: Mutex<Vec<DelayedUnit>>,
    regions: HashMap<Region, RegionQueues>,
    notify: Notify,
}

impl SchedulerQueues {
    pub fn new() -> Self {
        let regions = ALL_REGIONS
            .iter()
            .map(|region| (*region, RegionQueues::default()))
            .collect();

        Self {
            global_retry: Mutex::new(Vec::new()),
            regions,
            notify: Notify::new(),
        }
    }

    /// Enqueue a question batch on its region's regular queue.
    pub fn submit_batch(&self, batch: QuestionBatch) {
        self.regions[&batch.region].regular.lock().push_back(batch);
        self.notify.notify_waiters();
    }

    /// Enqueue a retry on the global queue after `delay`.
    pub fn push_global_retry(&self, unit: WorkUnit, delay: Duration) {
        self.global_retry.lock().push(DelayedUnit {
            unit,
            ready_at: Instant::now() + delay,
        });
        self.notify.notify_waiters();
    }

    /// Park a unit on its own region's retry queue after `delay`.
    pub fn push_region_retry(&self, unit: WorkUnit, delay: Duration) {
        self.regions[&unit.region].retry.lock().push(DelayedUnit {
            unit,
            ready_at: Instant::now() + delay,
        });
        self.notify.notify_waiters();
    }

    /// Pop the first ready unit from the global retry queue, regardless of
    /// region. Any worker may claim it.
    pub fn pop_ready_global(&self) -> Option<WorkUnit> {
        pop_ready(&mut self.global_retry.lock())
    }

    /// Pop the first ready unit from a region's retry queue.
    pub fn pop_ready_region_retry(&self, region: Region) -> Option<WorkUnit> {
        pop_ready(&mut self.regions[&region].retry.lock())
    }

    /// Pop the next question batch for a region, in insertion order.
    pub fn pop_batch(&self, region: Region) -> Option<QuestionBatch> {
        self.regions[&region].regular.lock().pop_front()
    }

    /// Future resolving on the next enqueue, for idle workers.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Whether every queue is empty (delayed retries included).
    pub fn is_idle(&self) -> bool {
        self.global_retry.lock().is_empty()
            && self.regions.values().all(|q| {
                q.retry.lock().is_empty() && q.regular.lock().is_empty()
            })
    }
}

impl Default for SchedulerQueues {
    fn default() -> Self {
        Self::new()
    }
}

fn pop_ready(entries: &mut Vec<DelayedUnit>) -> Option<WorkUnit> {
    let now = Instant::now();
    let index = entries.iter().position(|entry| entry.ready_at <= now)?;
    Some(entries.remove(index).unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Constraints;
    use crate::scheduler::unit::JobProgress;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn unit(region: Region, attempt: u32) -> WorkUnit {
        WorkUnit {
            job_id: 1,
            jobspec_id: "job".to_string(),
            region,
            model_id: "m1".to_string(),
            question_id: Some("q1".to_string()),
            question_index: 0,
            attempt,
            origin_region: region,
            constraints: Constraints::default(),
            progress: JobProgress::new(1, CancellationToken::new()),
        }
    }

    #[tokio::test]
    async fn test_batches_pop_in_insertion_order() {
        let queues = SchedulerQueues::new();
        queues.submit_batch(QuestionBatch {
            region: Region::UsEast,
            question_index: 0,
            units: vec![unit(Region::UsEast, 0)],
        });
        queues.submit_batch(QuestionBatch {
            region: Region::UsEast,
            question_index: 1,
            units: vec![unit(Region::UsEast, 0)],
        });

        assert_eq!(queues.pop_batch(Region::UsEast).unwrap().question_index, 0);
        assert_eq!(queues.pop_batch(Region::UsEast).unwrap().question_index, 1);
        assert!(queues.pop_batch(Region::UsEast).is_none());
        // Other regions are unaffected.
        assert!(queues.pop_batch(Region::EuWest).is_none());
    }

    #[tokio::test]
    async fn test_global_retry_claimable_by_any_region() {
        let queues = SchedulerQueues::new();
        queues.push_global_retry(unit(Region::UsEast, 1), Duration::ZERO);

        // A single global queue: the popped unit keeps its own region.
        let claimed = queues.pop_ready_global().expect("ready unit");
        assert_eq!(claimed.region, Region::UsEast);
        assert!(queues.pop_ready_global().is_none());
    }

    #[tokio::test]
    async fn test_backoff_delays_readiness() {
        let queues = SchedulerQueues::new();
        queues.push_global_retry(unit(Region::UsEast, 1), Duration::from_secs(60));

        assert!(queues.pop_ready_global().is_none());
        assert!(!queues.is_idle());
    }

    #[tokio::test]
    async fn test_region_retry_is_region_scoped() {
        let queues = SchedulerQueues::new();
        queues.push_region_retry(unit(Region::EuWest, 1), Duration::ZERO);

        assert!(queues.pop_ready_region_retry(Region::UsEast).is_none());
        assert!(queues.pop_ready_region_retry(Region::EuWest).is_some());
    }
}
