//! Assertions run against run results, and the errors they record.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::run_result::RunResult;
use crate::subject::{EventLogSubject, TraceSubject};

/// Which subject of a run result an assertion inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    WindowManager,
    Layers,
    EventLog,
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubjectKind::WindowManager => write!(f, "window-manager trace"),
            SubjectKind::Layers => write!(f, "layers trace"),
            SubjectKind::EventLog => write!(f, "event log"),
        }
    }
}

/// A borrowed subject handed to an assertion predicate.
#[derive(Debug, Clone, Copy)]
pub enum SubjectRef<'a> {
    Trace(&'a TraceSubject),
    EventLog(&'a EventLogSubject),
}

impl<'a> SubjectRef<'a> {
    pub fn as_trace(&self) -> Option<&'a TraceSubject> {
        match self {
            SubjectRef::Trace(t) => Some(t),
            SubjectRef::EventLog(_) => None,
        }
    }

    pub fn as_event_log(&self) -> Option<&'a EventLogSubject> {
        match self {
            SubjectRef::EventLog(e) => Some(e),
            SubjectRef::Trace(_) => None,
        }
    }
}

impl RunResult {
    /// The subject of `kind`, if this result carries one.
    pub fn subject(&self, kind: SubjectKind) -> Option<SubjectRef<'_>> {
        match kind {
            SubjectKind::WindowManager => self.wm_trace().map(SubjectRef::Trace),
            SubjectKind::Layers => self.layers_trace().map(SubjectRef::Trace),
            SubjectKind::EventLog => self.event_log().map(SubjectRef::EventLog),
        }
    }
}

type Predicate = Arc<dyn Fn(SubjectRef<'_>) -> Result<()> + Send + Sync>;

/// A named predicate over one subject kind of every result with one tag.
#[derive(Clone)]
pub struct Assertion {
    name: String,
    tag: String,
    kind: SubjectKind,
    predicate: Predicate,
}

impl Assertion {
    pub fn new<F>(name: impl Into<String>, tag: impl Into<String>, kind: SubjectKind, predicate: F) -> Self
    where
        F: Fn(SubjectRef<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            tag: tag.into(),
            kind,
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> SubjectKind {
        self.kind
    }

    /// Run the predicate against `result`. A result without the expected
    /// subject fails.
    pub fn evaluate(&self, result: &RunResult) -> Result<()> {
        let subject = result
            .subject(self.kind)
            .ok_or_else(|| anyhow!("No {} available for tag {}", self.kind, result.tag()))?;
        (self.predicate)(subject)
    }
}

impl std::fmt::Debug for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assertion")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// One failed assertion against one run result.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("Assertion '{assertion}' failed on tag {tag} (iteration {iteration}): {message}")]
pub struct AssertionError {
    pub assertion: String,
    pub tag: String,
    pub iteration: u32,
    pub artifacts: Vec<PathBuf>,
    pub message: String,
}
