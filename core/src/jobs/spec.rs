// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Job specifications and matrix expansion.
//!
//! A [`JobSpec`] is the immutable input describing what to evaluate: which
//! models, in which regions, against which questions. Expansion produces the
//! matrix of units the runner must drive to a terminal execution.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::jobs::region::{Region, ALL_REGIONS};

/// Default per-job timeout (seconds)
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 300;

/// Default per-provider-call timeout (seconds)
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 60;

/// Default minimum success rate for job-success determination
pub const DEFAULT_MIN_SUCCESS_RATE: f64 = 0.5;

/// A model to evaluate and the regions it should run in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSpec {
    /// Model identifier
    pub id: String,
    /// Regions this model runs in (submitter aliases normalized on ingestion)
    pub regions: Vec<Region>,
}

/// Per-job execution constraints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Constraints {
    /// Hard deadline for the whole job (seconds)
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
    /// Deadline for a single provider call (seconds)
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
    /// Minimum fraction of the matrix that must complete for the job to be
    /// marked `completed` (0.0 to 1.0)
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,
}

fn default_job_timeout() -> u64 {
    DEFAULT_JOB_TIMEOUT_SECS
}

fn default_provider_timeout() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_SECS
}

fn default_min_success_rate() -> f64 {
    DEFAULT_MIN_SUCCESS_RATE
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            provider_timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
            min_success_rate: DEFAULT_MIN_SUCCESS_RATE,
        }
    }
}

/// The immutable specification of a bias-probe job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSpec {
    /// Models to evaluate
    pub models: Vec<ModelSpec>,
    /// Question ids, resolved to prompt text through the question catalog
    #[serde(default)]
    pub questions: Vec<String>,
    /// Execution constraints
    #[serde(default)]
    pub constraints: Constraints,
}

/// One unit of the expanded matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatrixUnit {
    pub model_id: String,
    pub region: Region,
    /// `None` for legacy specs submitted without questions
    pub question_id: Option<String>,
    /// Position of the question within the spec, used for per-region
    /// sequencing
    pub question_index: usize,
}

impl JobSpec {
    /// Normalize the spec: deduplicate models by id (keeping first
    /// occurrence), deduplicate each model's regions, and deduplicate
    /// questions. Idempotent.
    pub fn normalized(&self) -> JobSpec {
        let mut seen_models = HashSet::new();
        let models = self
            .models
            .iter()
            .filter(|m| seen_models.insert(m.id.clone()))
            .map(|m| {
                let mut seen_regions = HashSet::new();
                ModelSpec {
                    id: m.id.clone(),
                    regions: m
                        .regions
                        .iter()
                        .copied()
                        .filter(|r| seen_regions.insert(*r))
                        .collect(),
                }
            })
            .collect();

        let mut seen_questions = HashSet::new();
        let questions = self
            .questions
            .iter()
            .filter(|q| seen_questions.insert(q.clone()))
            .cloned()
            .collect();

        JobSpec {
            models,
            questions,
            constraints: self.constraints,
        }
    }

    /// The union of regions across models, in fixed canonical order.
    pub fn regions(&self) -> Vec<Region> {
        let used: HashSet<Region> = self
            .models
            .iter()
            .flat_map(|m| m.regions.iter().copied())
            .collect();
        ALL_REGIONS
            .iter()
            .copied()
            .filter(|r| used.contains(r))
            .collect()
    }

    /// The effective question list. An empty set yields a single empty
    /// question so legacy specs still produce one execution per
    /// (model, region).
    pub fn effective_questions(&self) -> Vec<Option<String>> {
        if self.questions.is_empty() {
            vec![None]
        } else {
            self.questions.iter().cloned().map(Some).collect()
        }
    }

    /// Expand the Cartesian product of models, each model's regions, and
    /// questions. The spec is normalized first, so duplicate models,
    /// regions, or questions never inflate the matrix.
    pub fn expand_matrix(&self) -> Vec<MatrixUnit> {
        let spec = self.normalized();
        let questions = spec.effective_questions();

        let mut units = Vec::new();
        for (question_index, question_id) in questions.iter().enumerate() {
            for model in &spec.models {
                for region in &model.regions {
                    units.push(MatrixUnit {
                        model_id: model.id.clone(),
                        region: *region,
                        question_id: question_id.clone(),
                        question_index,
                    });
                }
            }
        }
        units
    }

    /// Size of the expanded matrix.
    pub fn matrix_size(&self) -> usize {
        let spec = self.normalized();
        let questions = spec.effective_questions().len();
        let model_regions: usize = spec.models.iter().map(|m| m.regions.len()).sum();
        model_regions * questions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
            constraints: Constraints::default(),
        }
    }

    #[test]
    fn test_matrix_size_2x2x2() {
        let spec = spec_2x2x2();
        assert_eq!(spec.matrix_size(), 8);
        assert_eq!(spec.expand_matrix().len(), 8);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let mut spec = spec_2x2x2();
        spec.models.push(ModelSpec {
            id: "m1".to_string(),
            regions: vec![Region::AsiaPacific],
        });
        spec.questions.push("q1".to_string());

        let once = spec.normalized();
        let twice = once.normalized();
        assert_eq!(once, twice);

        // The duplicate model id is dropped entirely, keeping the first
        // occurrence's regions.
        assert_eq!(once.models.len(), 2);
        assert_eq!(once.models[0].regions, vec![Region::UsEast, Region::EuWest]);
        assert_eq!(once.questions, vec!["q1".to_string(), "q2".to_string()]);
    }

    #[test]
    fn test_duplicate_regions_deduplicated() {
        let spec = JobSpec {
            models: vec![ModelSpec {
                id: "m1".to_string(),
                regions: vec![Region::UsEast, Region::UsEast, Region::EuWest],
            }],
            questions: vec!["q1".to_string()],
            constraints: Constraints::default(),
        };
        assert_eq!(spec.matrix_size(), 2);
    }

    #[test]
    fn test_empty_questions_synthesize_one_unit_per_model_region() {
        let spec = JobSpec {
            models: vec![ModelSpec {
                id: "m1".to_string(),
                regions: vec![Region::UsEast],
            }],
            questions: vec![],
            constraints: Constraints::default(),
        };
        let matrix = spec.expand_matrix();
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix[0].question_id, None);
        assert_eq!(matrix[0].question_index, 0);
    }

    #[test]
    fn test_regions_union_in_canonical_order() {
        let spec = JobSpec {
            models: vec![
                ModelSpec {
                    id: "m1".to_string(),
                    regions: vec![Region::AsiaPacific],
                },
                ModelSpec {
                    id: "m2".to_string(),
                    regions: vec![Region::UsEast],
                },
            ],
            questions: vec![],
            constraints: Constraints::default(),
        };
        assert_eq!(spec.regions(), vec![Region::UsEast, Region::AsiaPacific]);
    }

    #[test]
    fn test_question_order_preserved_in_matrix() {
        let spec = spec_2x2x2();
        let matrix = spec.expand_matrix();
        let q1_units: Vec<_> = matrix.iter().filter(|u| u.question_index == 0).collect();
        let q2_units: Vec<_> = matrix.iter().filter(|u| u.question_index == 1).collect();
        assert_eq!(q1_units.len(), 4);
        assert_eq!(q2_units.len(), 4);
        assert!(q1_units
            .iter()
            .all(|u| u.question_id.as_deref() == Some("q1")));
        assert!(q2_units
            .iter()
            .all(|u| u.question_id.as_deref() == Some("q2")));
    }

    #[test]
    fn test_spec_deserializes_aliased_regions() {
        let json = r#"{
            "models": [{"id": "m1", "regions": ["US", "Europe"]}],
            "questions": ["q1"]
        }"#;
        let spec: JobSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.models[0].regions, vec![Region::UsEast, Region::EuWest]);
        assert_eq!(spec.constraints, Constraints::default());
    }
}
