// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-unit reduction of a job's execution rows.
//!
//! A unit may accumulate several rows across attempts (a failed first
//! attempt, a completed retry, duplicate_skipped markers from absorbed
//! redeliveries). Finalization reasons about units, not rows: each unit
//! reduces to its best disposition.

use std::collections::HashMap;

use crate::database::models::ExecutionRecord;
use crate::jobs::ExecutionStatus;

/// Aggregated unit dispositions for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatrixReport {
    /// Size of the expanded matrix
    pub matrix_size: usize,
    /// Units with a completed row
    pub succeeded: usize,
    /// Units whose final disposition is failed
    pub failed: usize,
    /// Units whose final disposition is cancelled
    pub cancelled: usize,
    /// Units that only ever recorded duplicate_skipped rows
    pub skipped: usize,
    /// Units with an open (pending, running, or retrying) row and no
    /// completed row
    pub open: usize,
}

impl MatrixReport {
    /// Reduce execution rows to per-unit dispositions.
    pub fn from_rows(matrix_size: usize, rows: &[ExecutionRecord]) -> Self {
        let mut by_unit: HashMap<(i64, String, String, String), Vec<ExecutionStatus>> =
            HashMap::new();
        for row in rows {
            if let Ok(status) = row.execution_status() {
                by_unit.entry(row.unit_key()).or_default().push(status);
            }
        }

        let mut report = MatrixReport {
            matrix_size,
            ..Default::default()
        };

        for statuses in by_unit.values() {
            let has = |wanted: ExecutionStatus| statuses.iter().any(|s| *s == wanted);

            if has(ExecutionStatus::Completed) {
                report.succeeded += 1;
            } else if has(ExecutionStatus::Pending)
                || has(ExecutionStatus::Running)
                || has(ExecutionStatus::Retrying)
            {
                report.open += 1;
            } else if has(ExecutionStatus::Failed) {
                report.failed += 1;
            } else if has(ExecutionStatus::Cancelled) {
                report.cancelled += 1;
            } else {
                report.skipped += 1;
            }
        }

        report
    }

    /// Units with a settled disposition.
    pub fn settled(&self) -> usize {
        self.succeeded + self.failed + self.cancelled + self.skipped
    }

    /// Whether every matrix unit has settled.
    pub fn covered(&self) -> bool {
        self.settled() >= self.matrix_size
    }

    /// Success rate over the units that were actually this job's to run
    /// (skipped units were answered by an earlier delivery).
    pub fn success_rate(&self) -> f64 {
        let denominator = self.matrix_size.saturating_sub(self.skipped);
        if denominator == 0 {
            1.0
        } else {
            self.succeeded as f64 / denominator as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Region;
    use chrono::Utc;

    fn row(model: &str, question: Option<&str>, status: ExecutionStatus, attempt: i32) -> ExecutionRecord {
        ExecutionRecord {
            id: 0,
            job_id: 1,
            region: Region::UsEast.as_str().to_string(),
            model_id: model.to_string(),
            question_id: question.map(str::to_string),
            attempt,
            status: status.as_str().to_string(),
            provider_id: String::new(),
            output: None,
            receipt: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_failed_then_completed_counts_once_as_success() {
        let rows = vec![
            row("m1", Some("q1"), ExecutionStatus::Failed, 0),
            row("m1", Some("q1"), ExecutionStatus::Completed, 1),
        ];
        let report = MatrixReport::from_rows(1, &rows);

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
        assert!(report.covered());
        assert_eq!(report.success_rate(), 1.0);
    }

    #[test]
    fn test_open_unit_blocks_coverage() {
        let rows = vec![
            row("m1", Some("q1"), ExecutionStatus::Completed, 0),
            row("m2", Some("q1"), ExecutionStatus::Running, 0),
        ];
        let report = MatrixReport::from_rows(2, &rows);

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.open, 1);
        assert!(!report.covered());
    }

    #[test]
    fn test_skipped_units_excluded_from_rate() {
        let rows = vec![
            row("m1", Some("q1"), ExecutionStatus::Completed, 0),
            row("m2", Some("q1"), ExecutionStatus::DuplicateSkipped, 0),
        ];
        let report = MatrixReport::from_rows(2, &rows);

        assert_eq!(report.skipped, 1);
        assert!(report.covered());
        assert_eq!(report.success_rate(), 1.0);
    }

    #[test]
    fn test_duplicate_marker_does_not_mask_real_disposition() {
        // The same unit carries both a completed row and a later
        // duplicate_skipped marker from a redelivered envelope.
        let rows = vec![
            row("m1", Some("q1"), ExecutionStatus::Completed, 0),
            row("m1", Some("q1"), ExecutionStatus::DuplicateSkipped, 0),
        ];
        let report = MatrixReport::from_rows(1, &rows);

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn test_all_failed() {
        let rows = vec![
            row("m1", Some("q1"), ExecutionStatus::Failed, 0),
            row("m1", Some("q1"), ExecutionStatus::Failed, 1),
            row("m2", Some("q1"), ExecutionStatus::Failed, 0),
        ];
        let report = MatrixReport::from_rows(2, &rows);

        assert_eq!(report.failed, 2);
        assert_eq!(report.succeeded, 0);
        assert!(report.covered());
        assert_eq!(report.success_rate(), 0.0);
    }

    #[test]
    fn test_empty_question_and_empty_string_are_one_unit() {
        let rows = vec![
            row("m1", None, ExecutionStatus::Failed, 0),
            row("m1", Some(""), ExecutionStatus::Completed, 1),
        ];
        let report = MatrixReport::from_rows(1, &rows);

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_empty_matrix_is_trivially_covered() {
        let report = MatrixReport::from_rows(0, &[]);
        assert!(report.covered());
        assert_eq!(report.success_rate(), 1.0);
    }
}
