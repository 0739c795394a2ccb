//! Typed error hierarchy for the flicker engine.
//!
//! Two top-level enums cover the two kinds of failure:
//! - `PhaseFailure`: a lifecycle phase of a transition run broke
//! - `FlickerError`: misuse of the result model, tags and artifacts,
//!   plus the combined execution error raised on request

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::status::RunStatus;

/// Lifecycle phases of a transition run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    TestSetup,
    TransitionSetup,
    TransitionExecution,
    TraceProcessing,
    TransitionTeardown,
    TestTeardown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::TestSetup => "test_setup",
            Phase::TransitionSetup => "transition_setup",
            Phase::TransitionExecution => "transition_execution",
            Phase::TraceProcessing => "trace_processing",
            Phase::TransitionTeardown => "transition_teardown",
            Phase::TestTeardown => "test_teardown",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failure in one lifecycle phase. Wraps the underlying cause.
#[derive(Debug, Error)]
pub enum PhaseFailure {
    #[error("Test setup failed: {0:#}")]
    TestSetup(#[source] anyhow::Error),

    #[error("Transition setup failed: {0:#}")]
    TransitionSetup(#[source] anyhow::Error),

    #[error("Transition execution failed: {0:#}")]
    TransitionExecution(#[source] anyhow::Error),

    #[error("Trace processing failed: {0:#}")]
    TraceProcessing(#[source] anyhow::Error),

    #[error("Transition teardown failed: {0:#}")]
    TransitionTeardown(#[source] anyhow::Error),

    #[error("Test teardown failed: {0:#}")]
    TestTeardown(#[source] anyhow::Error),
}

impl PhaseFailure {
    /// Wrap `cause` in the variant belonging to `phase`.
    pub fn new(phase: Phase, cause: anyhow::Error) -> Self {
        match phase {
            Phase::TestSetup => PhaseFailure::TestSetup(cause),
            Phase::TransitionSetup => PhaseFailure::TransitionSetup(cause),
            Phase::TransitionExecution => PhaseFailure::TransitionExecution(cause),
            Phase::TraceProcessing => PhaseFailure::TraceProcessing(cause),
            Phase::TransitionTeardown => PhaseFailure::TransitionTeardown(cause),
            Phase::TestTeardown => PhaseFailure::TestTeardown(cause),
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            PhaseFailure::TestSetup(_) => Phase::TestSetup,
            PhaseFailure::TransitionSetup(_) => Phase::TransitionSetup,
            PhaseFailure::TransitionExecution(_) => Phase::TransitionExecution,
            PhaseFailure::TraceProcessing(_) => Phase::TraceProcessing,
            PhaseFailure::TransitionTeardown(_) => Phase::TransitionTeardown,
            PhaseFailure::TestTeardown(_) => Phase::TestTeardown,
        }
    }

    pub fn cause(&self) -> &anyhow::Error {
        match self {
            PhaseFailure::TestSetup(e)
            | PhaseFailure::TransitionSetup(e)
            | PhaseFailure::TransitionExecution(e)
            | PhaseFailure::TraceProcessing(e)
            | PhaseFailure::TransitionTeardown(e)
            | PhaseFailure::TestTeardown(e) => e,
        }
    }
}

/// Errors from the result model and its entry points.
#[derive(Debug, Error)]
pub enum FlickerError {
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: RunStatus, to: RunStatus },

    #[error("Invalid tag '{tag}': {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("Run result for tag {tag} (iteration {iteration}) is still undefined")]
    UndefinedRunResult { tag: String, iteration: u32 },

    #[error("No successful runs for tag {tag}: the transition produced no usable results")]
    NoSuccessfulRuns { tag: String },

    #[error("{}", join_messages(.0))]
    ExecutionFailed(Vec<Arc<PhaseFailure>>),

    #[error("Failed to write artifact bundle at {path}: {source}")]
    BundleFailed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Artifact lock poisoned")]
    LockPoisoned,
}

fn join_messages(failures: &[Arc<PhaseFailure>]) -> String {
    match failures {
        [single] => single.to_string(),
        many => {
            let messages: Vec<String> = many.iter().map(|f| f.to_string()).collect();
            format!("{} execution errors: {}", many.len(), messages.join("; "))
        }
    }
}
