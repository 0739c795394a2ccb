//! The full output of one test execution and the assertion entry point.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::assertion::{Assertion, AssertionError};
use super::run_result::RunResult;
use crate::errors::{FlickerError, PhaseFailure};
use crate::status::RunStatus;

/// All evidence and errors of one (possibly repeated) execution.
#[derive(Debug)]
pub struct ResultSet {
    run_results: Vec<RunResult>,
    tags: BTreeSet<String>,
    execution_errors: Vec<Arc<PhaseFailure>>,
    assertion_failures: Vec<AssertionError>,
}

impl ResultSet {
    /// Fails if any result is still `Undefined`.
    pub fn new(
        run_results: Vec<RunResult>,
        tags: BTreeSet<String>,
        execution_errors: Vec<PhaseFailure>,
    ) -> Result<Self, FlickerError> {
        if let Some(undefined) = run_results
            .iter()
            .find(|r| r.status() == RunStatus::Undefined)
        {
            return Err(FlickerError::UndefinedRunResult {
                tag: undefined.tag().to_string(),
                iteration: undefined.iteration(),
            });
        }

        Ok(Self {
            run_results,
            tags,
            execution_errors: execution_errors.into_iter().map(Arc::new).collect(),
            assertion_failures: Vec::new(),
        })
    }

    /// A result set holding nothing but one execution error.
    pub fn from_failure(failure: PhaseFailure) -> Self {
        Self {
            run_results: Vec::new(),
            tags: BTreeSet::new(),
            execution_errors: vec![Arc::new(failure)],
            assertion_failures: Vec::new(),
        }
    }

    pub fn run_results(&self) -> &[RunResult] {
        &self.run_results
    }

    /// User tags created during the execution.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn execution_errors(&self) -> &[Arc<PhaseFailure>] {
        &self.execution_errors
    }

    pub fn assertion_failures(&self) -> &[AssertionError] {
        &self.assertion_failures
    }

    pub fn successful_runs(&self) -> Vec<&RunResult> {
        self.run_results
            .iter()
            .filter(|r| r.status() != RunStatus::RunFailed)
            .collect()
    }

    pub fn failed_runs(&self) -> Vec<&RunResult> {
        self.run_results
            .iter()
            .filter(|r| r.status() == RunStatus::RunFailed)
            .collect()
    }

    /// Merged status of every result.
    pub fn status(&self) -> RunStatus {
        RunStatus::merge(self.run_results.iter().map(|r| r.status()))
    }

    /// Check `assertion` against every usable result with its tag.
    ///
    /// Results that fail are marked `AssertionFailed` and the failure is
    /// recorded. Fails only when no usable result exists for the tag.
    pub fn check_assertion(
        &mut self,
        assertion: &Assertion,
    ) -> Result<Vec<AssertionError>, FlickerError> {
        let selected: Vec<usize> = self
            .run_results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.tag() == assertion.tag() && !r.status().is_failure())
            .map(|(i, _)| i)
            .collect();

        if selected.is_empty() {
            return Err(FlickerError::NoSuccessfulRuns {
                tag: assertion.tag().to_string(),
            });
        }

        let mut failures = Vec::new();
        for index in selected {
            let result = &mut self.run_results[index];
            let Err(e) = assertion.evaluate(result) else {
                continue;
            };

            tracing::info!(
                assertion = assertion.name(),
                tag = result.tag(),
                iteration = result.iteration(),
                error = %format!("{e:#}"),
                "Assertion failed"
            );
            if let Err(status_err) = result.set_status(RunStatus::AssertionFailed) {
                tracing::warn!(error = %status_err, "Could not mark result as failed");
            }
            failures.push(AssertionError {
                assertion: assertion.name().to_string(),
                tag: result.tag().to_string(),
                iteration: result.iteration(),
                artifacts: result.artifact_paths(),
                message: format!("{e:#}"),
            });
        }

        self.assertion_failures.extend(failures.iter().cloned());
        Ok(failures)
    }

    /// Raise every execution error as one combined error.
    pub fn check_for_execution_errors(&self) -> Result<(), FlickerError> {
        if self.execution_errors.is_empty() {
            Ok(())
        } else {
            Err(FlickerError::ExecutionFailed(self.execution_errors.clone()))
        }
    }

    /// Append an execution error found after the set was built.
    pub(crate) fn push_execution_error(&mut self, failure: PhaseFailure) {
        self.execution_errors.push(Arc::new(failure));
    }

    /// Downgrade every result to `RunFailed`.
    pub(crate) fn mark_all_failed(&mut self) {
        mark_all_failed(&mut self.run_results);
    }

    /// Serializable overview of this set.
    pub fn summary(&self, test_name: &str) -> RunSummary {
        let mut status_counts = BTreeMap::new();
        for result in &self.run_results {
            *status_counts.entry(result.status()).or_insert(0) += 1;
        }

        RunSummary {
            run_id: Uuid::new_v4(),
            test_name: test_name.to_string(),
            generated_at: Utc::now(),
            status: self.status(),
            status_counts,
            tags: self.tags.iter().cloned().collect(),
            execution_errors: self
                .execution_errors
                .iter()
                .map(|e| format!("{e:#}"))
                .collect(),
            assertion_failures: self.assertion_failures.clone(),
            results: self
                .run_results
                .iter()
                .map(|r| ResultEntry {
                    tag: r.tag().to_string(),
                    iteration: r.iteration(),
                    status: r.status(),
                    artifacts: r.artifact_paths(),
                })
                .collect(),
        }
    }
}

/// Downgrade every result in `results` to `RunFailed`.
pub(crate) fn mark_all_failed(results: &mut [RunResult]) {
    for result in results {
        if let Err(e) = result.set_status(RunStatus::RunFailed) {
            tracing::debug!(tag = result.tag(), error = %e, "Result kept its failure status");
        }
    }
}

/// JSON overview of a result set, written next to the artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub test_name: String,
    pub generated_at: DateTime<Utc>,
    pub status: RunStatus,
    pub status_counts: BTreeMap<RunStatus, usize>,
    pub tags: Vec<String>,
    pub execution_errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertion_failures: Vec<AssertionError>,
    pub results: Vec<ResultEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEntry {
    pub tag: String,
    pub iteration: u32,
    pub status: RunStatus,
    pub artifacts: Vec<PathBuf>,
}
