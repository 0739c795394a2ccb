//! Phase orchestration for transition tests.
//!
//! `TransitionRunner::execute` drives one test through its lifecycle:
//!
//! ```text
//! test_setup
//! for each iteration:
//!     transition_setup -> transition_execution -> transition_teardown -> trace_processing
//! test_teardown
//! ```
//!
//! A failing phase never escapes: it is recorded as a [`PhaseFailure`], the
//! remaining iterations are skipped, and `test_teardown` still runs unless
//! `test_setup` itself failed. The caller always gets a [`ResultSet`].

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::artifact::ArtifactFile;
use crate::device::{Device, StateCondition};
use crate::errors::{FlickerError, Phase, PhaseFailure};
use crate::monitor::MonitorSet;
use crate::result::result_set::mark_all_failed;
use crate::result::{IterationOutput, ResultSet, RunResult, RunResultBuilder, is_reserved_tag};
use crate::status::RunStatus;
use crate::subject::{TraceKind, TraceParser};

/// The scripted part of a transition test.
///
/// Every step but `transition` defaults to doing nothing.
#[async_trait]
pub trait TransitionScript: Send + Sync {
    async fn test_setup(&self) -> Result<()> {
        Ok(())
    }

    /// Prepare device and app state before iteration `iteration`.
    async fn transition_setup(&self, _iteration: u32) -> Result<()> {
        Ok(())
    }

    /// Perform the transition. May capture snapshots through `tags`.
    async fn transition(&self, tags: &mut TagRecorder<'_>) -> Result<()>;

    /// Clean up after iteration `iteration`.
    async fn transition_teardown(&self, _iteration: u32) -> Result<()> {
        Ok(())
    }

    async fn test_teardown(&self) -> Result<()> {
        Ok(())
    }
}

/// A named test and how often to repeat its transition.
#[derive(Clone)]
pub struct TestSpec {
    pub name: String,
    pub repetitions: u32,
    pub script: Arc<dyn TransitionScript>,
}

impl TestSpec {
    pub fn new(name: impl Into<String>, repetitions: u32, script: Arc<dyn TransitionScript>) -> Self {
        Self {
            name: name.into(),
            repetitions,
            script,
        }
    }
}

/// Check that `tag` can name a snapshot. Tags end up in file names.
pub fn validate_tag(tag: &str) -> Result<(), FlickerError> {
    let reason = if tag.is_empty() {
        Some("tag is empty")
    } else if tag.chars().any(char::is_whitespace) {
        Some("tag must not contain whitespace")
    } else if tag.contains(['/', '\\']) {
        Some("tag must not contain path separators")
    } else if is_reserved_tag(tag) {
        Some("tag is reserved")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(FlickerError::InvalidTag {
            tag: tag.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Flag tag dumps that never became traces so they are not mistaken for
/// usable output.
fn mark_unparsed(paths: &[&PathBuf]) {
    for path in paths.iter().filter(|p| p.exists()) {
        if let Err(e) = ArtifactFile::new(path.to_path_buf()).set_status(RunStatus::ParsingFailed) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to mark tag dump");
        }
    }
}

/// Accumulators of one execution, threaded through every phase.
#[derive(Debug, Default)]
struct ExecutionState {
    results: Vec<RunResult>,
    pending_tags: Vec<RunResult>,
    tags: BTreeSet<String>,
    errors: Vec<PhaseFailure>,
}

impl ExecutionState {
    fn record(&mut self, phase: Phase, cause: anyhow::Error) {
        tracing::error!(%phase, error = %format!("{cause:#}"), "Phase failed");
        self.errors.push(PhaseFailure::new(phase, cause));
    }

    /// Move buffered tag snapshots into the results with `status`.
    fn flush_tags(&mut self, status: RunStatus) {
        for mut result in self.pending_tags.drain(..) {
            if let Err(e) = result.set_status(status) {
                tracing::warn!(tag = result.tag(), error = %e, "Tag kept its status");
            }
            self.results.push(result);
        }
    }

    fn into_result_set(mut self) -> ResultSet {
        self.flush_tags(RunStatus::RunFailed);
        match ResultSet::new(self.results, self.tags, self.errors) {
            Ok(set) => set,
            Err(e) => {
                tracing::error!(error = %e, "Inconsistent result set");
                ResultSet::from_failure(PhaseFailure::TraceProcessing(e.into()))
            }
        }
    }
}

/// Captures mid-transition snapshots for the current iteration.
pub struct TagRecorder<'a> {
    runner: &'a TransitionRunner,
    test_name: &'a str,
    iteration: u32,
    state: &'a mut ExecutionState,
}

impl TagRecorder<'_> {
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Take an immediate device dump and keep it as the snapshot `tag`.
    ///
    /// The tag is validated before any I/O happens. The snapshot's status is
    /// resolved when its iteration finishes.
    pub async fn create_tag(&mut self, tag: &str) -> Result<()> {
        validate_tag(tag)?;
        if self.state.pending_tags.iter().any(|r| r.tag() == tag) {
            return Err(FlickerError::InvalidTag {
                tag: tag.to_string(),
                reason: format!("tag already created in iteration {}", self.iteration),
            }
            .into());
        }

        tracing::info!(test = self.test_name, iteration = self.iteration, tag, "Creating tag");
        let dump = self
            .runner
            .device
            .dump()
            .await
            .with_context(|| format!("Failed to dump device state for tag {}", tag))?;

        let prefix = format!("{}_{}_{}", self.test_name, self.iteration, tag);
        let wm_path = self.runner.output_dir.join(format!("{}_wm.dump", prefix));
        let layers_path = self.runner.output_dir.join(format!("{}_layers.dump", prefix));
        let parsed = std::fs::write(&wm_path, &dump.window_manager)
            .with_context(|| format!("Failed to write {}", wm_path.display()))
            .and_then(|()| {
                std::fs::write(&layers_path, &dump.layers)
                    .with_context(|| format!("Failed to write {}", layers_path.display()))
            })
            .and_then(|()| {
                let wm = self.runner.parser.parse(TraceKind::WindowManager, &wm_path)?;
                let layers = self.runner.parser.parse(TraceKind::Layers, &layers_path)?;
                Ok((wm, layers))
            });
        let (wm, layers) = match parsed {
            Ok(traces) => traces,
            Err(e) => {
                mark_unparsed(&[&wm_path, &layers_path]);
                return Err(e);
            }
        };

        let result = RunResult::new(tag, self.iteration)
            .with_wm_trace(wm)
            .with_layers_trace(layers)
            .with_artifact(ArtifactFile::shared(wm_path))
            .with_artifact(ArtifactFile::shared(layers_path));

        self.state.pending_tags.push(result);
        self.state.tags.insert(tag.to_string());
        Ok(())
    }
}

/// Runs transition tests against one device with one set of monitors.
pub struct TransitionRunner {
    device: Arc<dyn Device>,
    monitors: MonitorSet,
    parser: Arc<dyn TraceParser>,
    output_dir: PathBuf,
    conditions: Vec<StateCondition>,
}

impl TransitionRunner {
    pub fn new(
        device: Arc<dyn Device>,
        monitors: MonitorSet,
        parser: Arc<dyn TraceParser>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            device,
            monitors,
            parser,
            output_dir: output_dir.into(),
            conditions: StateCondition::stable(),
        }
    }

    /// Replace the conditions waited for around each transition.
    pub fn with_conditions(mut self, conditions: Vec<StateCondition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.output_dir
    }

    /// Run `spec` to completion. Never fails; every error ends up in the
    /// returned result set.
    pub async fn execute(&self, spec: &TestSpec) -> ResultSet {
        let mut state = ExecutionState::default();
        tracing::info!(test = %spec.name, repetitions = spec.repetitions, "Starting transition test");

        if let Err(e) = self.test_setup(spec).await {
            state.record(Phase::TestSetup, e);
            return state.into_result_set();
        }

        for iteration in 0..spec.repetitions {
            if !self.run_iteration(spec, iteration, &mut state).await {
                tracing::warn!(test = %spec.name, iteration, "Stopping repetitions");
                break;
            }
        }

        if let Err(e) = spec.script.test_teardown().await {
            state.flush_tags(RunStatus::RunFailed);
            mark_all_failed(&mut state.results);
            state.record(Phase::TestTeardown, e);
        }

        let set = state.into_result_set();
        tracing::info!(
            test = %spec.name,
            results = set.run_results().len(),
            errors = set.execution_errors().len(),
            status = %set.status(),
            "Transition test finished"
        );
        set
    }

    async fn test_setup(&self, spec: &TestSpec) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("Failed to create output directory {}", self.output_dir.display())
        })?;
        spec.script.test_setup().await
    }

    /// Run one iteration. Returns whether further iterations may run.
    async fn run_iteration(&self, spec: &TestSpec, iteration: u32, state: &mut ExecutionState) -> bool {
        tracing::info!(test = %spec.name, iteration, "Starting iteration");
        let output = self.iteration_output(spec, iteration);

        if let Err(e) = self.transition_setup(spec, iteration).await {
            state.record(Phase::TransitionSetup, e);
            return false;
        }

        if let Err(e) = self.transition_execution(spec, iteration, state).await {
            self.monitors.try_stop_all().await;
            state.record(Phase::TransitionExecution, e);
            self.record_failed_run(&output, state);
            return false;
        }

        if let Err(e) = self.transition_teardown(spec, iteration).await {
            self.monitors.try_stop_all().await;
            state.record(Phase::TransitionTeardown, e);
            self.record_failed_run(&output, state);
            return false;
        }

        let builder = RunResultBuilder::new(output.clone(), Arc::clone(&self.parser));
        match builder.build(RunStatus::AssertionSucceeded).await {
            Ok(results) => {
                state.results.extend(results);
                state.flush_tags(RunStatus::AssertionSucceeded);
                true
            }
            Err(e) => {
                mark_parsing_failed(&output);
                state.flush_tags(RunStatus::RunFailed);
                state.record(Phase::TraceProcessing, e);
                false
            }
        }
    }

    async fn transition_setup(&self, spec: &TestSpec, iteration: u32) -> Result<()> {
        spec.script.transition_setup(iteration).await?;
        self.device
            .wait_for_stable(&self.conditions)
            .await
            .context("Device did not stabilize before the transition")
    }

    async fn transition_execution(
        &self,
        spec: &TestSpec,
        iteration: u32,
        state: &mut ExecutionState,
    ) -> Result<()> {
        self.monitors.start_all().await.context("Failed to start monitors")?;
        let mut recorder = TagRecorder {
            runner: self,
            test_name: &spec.name,
            iteration,
            state,
        };
        spec.script.transition(&mut recorder).await
    }

    async fn transition_teardown(&self, spec: &TestSpec, iteration: u32) -> Result<()> {
        self.device
            .wait_for_stable(&self.conditions)
            .await
            .context("Device did not stabilize after the transition")?;
        self.monitors.stop_all().await.context("Failed to stop monitors")?;
        spec.script.transition_teardown(iteration).await
    }

    fn iteration_output(&self, spec: &TestSpec, iteration: u32) -> IterationOutput {
        IterationOutput {
            test_name: spec.name.clone(),
            iteration,
            output_dir: self.output_dir.clone(),
            wm_trace: self.monitors.output_file(TraceKind::WindowManager),
            layers_trace: self.monitors.output_file(TraceKind::Layers),
            event_log: self.monitors.output_file(TraceKind::EventLog),
            extra_files: self
                .monitors
                .output_file(TraceKind::ScreenRecording)
                .into_iter()
                .collect(),
        }
    }

    /// Keep whatever a failed iteration captured as a RunFailed result.
    fn record_failed_run(&self, output: &IterationOutput, state: &mut ExecutionState) {
        state.flush_tags(RunStatus::RunFailed);
        match RunResultBuilder::build_failed(output) {
            Ok(Some(result)) => state.results.push(result),
            Ok(None) => {
                tracing::debug!(iteration = output.iteration, "No trace captured before failure")
            }
            Err(e) => tracing::warn!(
                iteration = output.iteration,
                error = %format!("{e:#}"),
                "Failed to keep trace of failed iteration"
            ),
        }
    }
}

/// Flag raw output that could not be parsed.
fn mark_parsing_failed(output: &IterationOutput) {
    for file in output.files().into_iter().filter(|f| f.exists()) {
        if let Err(e) = ArtifactFile::new(file).set_status(RunStatus::ParsingFailed) {
            tracing::warn!(error = %e, "Failed to flag unparsable output");
        }
    }
}
