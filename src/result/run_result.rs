//! Run results and the builder that turns monitor output into them.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use crate::artifact::{SharedArtifact, bundle_artifacts, set_shared_status, shared_path};
use crate::errors::FlickerError;
use crate::status::RunStatus;
use crate::subject::{EventLogSubject, TraceKind, TraceParser, TraceSubject};

/// Tag of the result holding the first traced state.
pub const TAG_START: &str = "START";
/// Tag of the result holding the last traced state.
pub const TAG_END: &str = "END";
/// Tag of the result holding the full trace.
pub const TAG_ALL: &str = "ALL";

/// Tags the engine produces itself; user tags may not reuse them.
pub fn is_reserved_tag(tag: &str) -> bool {
    matches!(tag, TAG_START | TAG_END | TAG_ALL)
}

/// One unit of evidence for one tag from one iteration.
#[derive(Debug)]
pub struct RunResult {
    tag: String,
    iteration: u32,
    wm_trace: Option<TraceSubject>,
    layers_trace: Option<TraceSubject>,
    event_log: Option<EventLogSubject>,
    status: RunStatus,
    artifacts: Vec<SharedArtifact>,
}

impl RunResult {
    pub fn new(tag: impl Into<String>, iteration: u32) -> Self {
        Self {
            tag: tag.into(),
            iteration,
            wm_trace: None,
            layers_trace: None,
            event_log: None,
            status: RunStatus::Undefined,
            artifacts: Vec::new(),
        }
    }

    pub fn with_wm_trace(mut self, subject: Option<TraceSubject>) -> Self {
        self.wm_trace = subject;
        self
    }

    pub fn with_layers_trace(mut self, subject: Option<TraceSubject>) -> Self {
        self.layers_trace = subject;
        self
    }

    pub fn with_event_log(mut self, subject: Option<EventLogSubject>) -> Self {
        self.event_log = subject;
        self
    }

    pub fn with_artifact(mut self, artifact: SharedArtifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn wm_trace(&self) -> Option<&TraceSubject> {
        self.wm_trace.as_ref()
    }

    pub fn layers_trace(&self) -> Option<&TraceSubject> {
        self.layers_trace.as_ref()
    }

    pub fn event_log(&self) -> Option<&EventLogSubject> {
        self.event_log.as_ref()
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn artifacts(&self) -> &[SharedArtifact] {
        &self.artifacts
    }

    /// Current paths of every artifact backing this result.
    pub fn artifact_paths(&self) -> Vec<PathBuf> {
        self.artifacts.iter().filter_map(shared_path).collect()
    }

    /// Move to `status` and propagate it to the backing artifacts.
    ///
    /// A result can never go back to `Undefined`. An artifact already held
    /// in a different failure status by another result keeps its name.
    pub fn set_status(&mut self, status: RunStatus) -> Result<(), FlickerError> {
        if status == RunStatus::Undefined && self.status != RunStatus::Undefined {
            return Err(FlickerError::InvalidStatusTransition {
                from: self.status,
                to: status,
            });
        }
        self.status.check_transition(status)?;

        for artifact in &self.artifacts {
            if let Err(e) = set_shared_status(artifact, status) {
                tracing::warn!(tag = %self.tag, iteration = self.iteration, error = %e, "Artifact kept its status");
            }
        }
        self.status = status;
        Ok(())
    }
}

/// Raw monitor output of one iteration.
#[derive(Debug, Clone)]
pub struct IterationOutput {
    pub test_name: String,
    pub iteration: u32,
    pub output_dir: PathBuf,
    pub wm_trace: Option<PathBuf>,
    pub layers_trace: Option<PathBuf>,
    pub event_log: Option<PathBuf>,
    /// Files bundled but never parsed, such as a screen recording
    pub extra_files: Vec<PathBuf>,
}

impl IterationOutput {
    pub fn bundle_name(&self) -> String {
        format!("{}_{}", self.test_name, self.iteration)
    }

    /// Every raw file of the iteration, existing or not.
    pub fn files(&self) -> Vec<PathBuf> {
        self.wm_trace
            .iter()
            .chain(self.layers_trace.iter())
            .chain(self.event_log.iter())
            .chain(self.extra_files.iter())
            .cloned()
            .collect()
    }

    fn bundle(&self) -> Result<Option<SharedArtifact>, FlickerError> {
        let artifact = bundle_artifacts(&self.output_dir, &self.bundle_name(), &self.files())?;
        Ok(artifact.map(|a| Arc::new(std::sync::Mutex::new(a))))
    }
}

type ParseTask = JoinHandle<Result<Option<TraceSubject>>>;

/// Builds the START, END and ALL results of one iteration.
///
/// Construction dispatches the window-manager and layer parses onto the
/// blocking pool; [`build`](Self::build) joins both before slicing. Must be
/// created inside a tokio runtime.
pub struct RunResultBuilder {
    output: IterationOutput,
    wm_task: ParseTask,
    layers_task: ParseTask,
}

impl RunResultBuilder {
    pub fn new(output: IterationOutput, parser: Arc<dyn TraceParser>) -> Self {
        let wm_task = spawn_parse(Arc::clone(&parser), TraceKind::WindowManager, output.wm_trace.clone());
        let layers_task = spawn_parse(parser, TraceKind::Layers, output.layers_trace.clone());
        Self {
            output,
            wm_task,
            layers_task,
        }
    }

    /// Await both parses, bundle the raw files and produce the results,
    /// each set to `status`.
    ///
    /// Raw files are only removed once parsing succeeded, so a failure here
    /// leaves them in place for the caller to mark.
    pub async fn build(self, status: RunStatus) -> Result<Vec<RunResult>> {
        let (wm, layers) = tokio::join!(self.wm_task, self.layers_task);
        let wm = wm.context("Window-manager parse task panicked")??;
        let layers = layers.context("Layer parse task panicked")??;

        let event_log = match &self.output.event_log {
            Some(path) => Some(EventLogSubject::from_file(path)?),
            None => None,
        };

        let artifact = self.output.bundle()?;
        let iteration = self.output.iteration;
        let attach = |result: RunResult| match &artifact {
            Some(a) => result.with_artifact(Arc::clone(a)),
            None => result,
        };

        let mut results = vec![
            attach(
                RunResult::new(TAG_START, iteration)
                    .with_wm_trace(wm.as_ref().and_then(TraceSubject::first))
                    .with_layers_trace(layers.as_ref().and_then(TraceSubject::first)),
            ),
            attach(
                RunResult::new(TAG_END, iteration)
                    .with_wm_trace(wm.as_ref().and_then(TraceSubject::last))
                    .with_layers_trace(layers.as_ref().and_then(TraceSubject::last)),
            ),
            attach(
                RunResult::new(TAG_ALL, iteration)
                    .with_wm_trace(wm)
                    .with_layers_trace(layers),
            ),
        ];

        if let Some(log) = event_log.filter(|log| !log.is_empty()) {
            results.push(attach(RunResult::new(TAG_ALL, iteration).with_event_log(Some(log))));
        }

        for result in &mut results {
            result.set_status(status)?;
        }

        tracing::debug!(
            test = %self.output.test_name,
            iteration,
            results = results.len(),
            "Built run results"
        );
        Ok(results)
    }

    /// Record whatever a failed iteration captured as one RunFailed result,
    /// without parsing. Returns `None` if nothing was captured.
    pub fn build_failed(output: &IterationOutput) -> Result<Option<RunResult>> {
        let Some(artifact) = output.bundle()? else {
            return Ok(None);
        };
        let mut result = RunResult::new(TAG_ALL, output.iteration).with_artifact(artifact);
        result.set_status(RunStatus::RunFailed)?;
        Ok(Some(result))
    }
}

fn spawn_parse(parser: Arc<dyn TraceParser>, kind: TraceKind, path: Option<PathBuf>) -> ParseTask {
    tokio::task::spawn_blocking(move || match path {
        Some(path) => parser.parse(kind, &path),
        None => Ok(None),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactFile;
    use crate::subject::JsonLinesParser;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_trace(path: &Path, timestamps: &[i64]) {
        let lines: Vec<String> = timestamps
            .iter()
            .map(|t| format!("{{\"timestamp\": {}, \"name\": \"state{}\"}}", t, t))
            .collect();
        std::fs::write(path, lines.join("\n")).unwrap();
    }

    fn output_in(dir: &Path) -> IterationOutput {
        IterationOutput {
            test_name: "open_app".into(),
            iteration: 0,
            output_dir: dir.to_path_buf(),
            wm_trace: Some(dir.join("wm_trace.jsonl")),
            layers_trace: Some(dir.join("layers_trace.jsonl")),
            event_log: Some(dir.join("events.jsonl")),
            extra_files: vec![dir.join("screen.mp4")],
        }
    }

    #[test]
    fn test_set_status_rejects_undefined_after_construction() {
        let mut result = RunResult::new(TAG_ALL, 0);
        result.set_status(RunStatus::AssertionSucceeded).unwrap();
        assert!(result.set_status(RunStatus::Undefined).is_err());
    }

    #[test]
    fn test_set_status_propagates_to_artifact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        std::fs::write(&path, b"x").unwrap();
        let mut result = RunResult::new(TAG_END, 1).with_artifact(ArtifactFile::shared(&path));

        result.set_status(RunStatus::RunFailed).unwrap();
        assert_eq!(
            result.artifact_paths(),
            vec![dir.path().join("FAIL_RUN_bundle.zip")]
        );
        assert!(result.set_status(RunStatus::AssertionSucceeded).is_err());
    }

    #[tokio::test]
    async fn test_build_produces_start_end_all_sharing_one_artifact() {
        let dir = tempdir().unwrap();
        let output = output_in(dir.path());
        write_trace(output.wm_trace.as_ref().unwrap(), &[1, 2, 3]);
        write_trace(output.layers_trace.as_ref().unwrap(), &[10, 20]);

        let results = RunResultBuilder::new(output, Arc::new(JsonLinesParser))
            .build(RunStatus::AssertionSucceeded)
            .await
            .unwrap();

        let tags: Vec<&str> = results.iter().map(|r| r.tag()).collect();
        assert_eq!(tags, vec![TAG_START, TAG_END, TAG_ALL]);
        assert!(results.iter().all(|r| r.status() == RunStatus::AssertionSucceeded));

        let bundle = dir.path().join("PASS_open_app_0.zip");
        assert!(bundle.exists());
        for result in &results {
            assert_eq!(result.artifact_paths(), vec![bundle.clone()]);
        }
        assert!(!dir.path().join("wm_trace.jsonl").exists());
    }

    #[tokio::test]
    async fn test_boundaries_match_full_trace() {
        let dir = tempdir().unwrap();
        let output = output_in(dir.path());
        write_trace(output.wm_trace.as_ref().unwrap(), &[5, 6, 7, 8]);
        write_trace(output.layers_trace.as_ref().unwrap(), &[50, 60]);

        let independent_wm = JsonLinesParser
            .parse(TraceKind::WindowManager, output.wm_trace.as_ref().unwrap())
            .unwrap()
            .unwrap();

        let results = RunResultBuilder::new(output, Arc::new(JsonLinesParser))
            .build(RunStatus::AssertionSucceeded)
            .await
            .unwrap();

        let start = &results[0];
        let end = &results[1];
        let all = &results[2];
        assert_eq!(start.wm_trace(), independent_wm.first().as_ref());
        assert_eq!(end.wm_trace(), independent_wm.last().as_ref());
        assert_eq!(all.wm_trace(), Some(&independent_wm));
        assert_eq!(start.layers_trace().unwrap().states()[0].timestamp, 50);
        assert_eq!(end.layers_trace().unwrap().states()[0].timestamp, 60);
    }

    #[tokio::test]
    async fn test_event_log_result_only_when_events_exist() {
        let dir = tempdir().unwrap();
        let output = output_in(dir.path());
        write_trace(output.wm_trace.as_ref().unwrap(), &[1]);
        std::fs::write(
            output.event_log.as_ref().unwrap(),
            "{\"timestamp\":1,\"window\":\"app\",\"kind\":\"focus_gained\"}\n",
        )
        .unwrap();

        let results = RunResultBuilder::new(output, Arc::new(JsonLinesParser))
            .build(RunStatus::AssertionSucceeded)
            .await
            .unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results[3].tag(), TAG_ALL);
        assert!(results[3].event_log().is_some());

        let dir2 = tempdir().unwrap();
        let output2 = output_in(dir2.path());
        write_trace(output2.wm_trace.as_ref().unwrap(), &[1]);
        let results2 = RunResultBuilder::new(output2, Arc::new(JsonLinesParser))
            .build(RunStatus::AssertionSucceeded)
            .await
            .unwrap();
        assert_eq!(results2.len(), 3);
    }

    #[tokio::test]
    async fn test_parse_failure_leaves_raw_files() {
        let dir = tempdir().unwrap();
        let output = output_in(dir.path());
        std::fs::write(output.wm_trace.as_ref().unwrap(), "garbage").unwrap();

        let result = RunResultBuilder::new(output, Arc::new(JsonLinesParser))
            .build(RunStatus::AssertionSucceeded)
            .await;
        assert!(result.is_err());
        assert!(dir.path().join("wm_trace.jsonl").exists());
        assert!(!dir.path().join("open_app_0.zip").exists());
    }

    #[test]
    fn test_build_failed_marks_captured_trace() {
        let dir = tempdir().unwrap();
        let output = output_in(dir.path());
        write_trace(output.wm_trace.as_ref().unwrap(), &[1]);

        let result = RunResultBuilder::build_failed(&output).unwrap().unwrap();
        assert_eq!(result.status(), RunStatus::RunFailed);
        assert_eq!(result.tag(), TAG_ALL);
        assert_eq!(
            result.artifact_paths(),
            vec![dir.path().join("FAIL_RUN_open_app_0.zip")]
        );
    }

    #[test]
    fn test_build_failed_without_trace_is_none() {
        let dir = tempdir().unwrap();
        let output = output_in(dir.path());
        assert!(RunResultBuilder::build_failed(&output).unwrap().is_none());
    }

    #[test]
    fn test_reserved_tags() {
        assert!(is_reserved_tag("START"));
        assert!(is_reserved_tag("ALL"));
        assert!(!is_reserved_tag("midpoint"));
    }
}
