//! Parsed trace subjects and the parser seam.
//!
//! The engine never interprets trace contents. A [`TraceParser`] turns a raw
//! trace file into a [`TraceSubject`], an ordered list of opaque states the
//! assertion layer can query; the engine only slices it into first and last
//! states.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Kind of trace a monitor produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    #[serde(alias = "wm")]
    WindowManager,
    #[serde(alias = "sf")]
    Layers,
    #[serde(alias = "screenrecord")]
    ScreenRecording,
    #[serde(alias = "eventlog")]
    EventLog,
}

impl TraceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceKind::WindowManager => "window_manager",
            TraceKind::Layers => "layers",
            TraceKind::ScreenRecording => "screen_recording",
            TraceKind::EventLog => "event_log",
        }
    }
}

impl std::fmt::Display for TraceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TraceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "window_manager" | "wm" => Ok(TraceKind::WindowManager),
            "layers" | "sf" => Ok(TraceKind::Layers),
            "screen_recording" | "screenrecord" => Ok(TraceKind::ScreenRecording),
            "event_log" | "eventlog" => Ok(TraceKind::EventLog),
            _ => anyhow::bail!(
                "Invalid trace kind '{}'. Valid values: window_manager, layers, screen_recording, event_log",
                s
            ),
        }
    }
}

/// One snapshot of system state inside a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceState {
    pub timestamp: i64,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// A parsed trace: time-ordered states of one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSubject {
    kind: TraceKind,
    states: Vec<TraceState>,
}

impl TraceSubject {
    pub fn new(kind: TraceKind, states: Vec<TraceState>) -> Self {
        Self { kind, states }
    }

    pub fn kind(&self) -> TraceKind {
        self.kind
    }

    pub fn states(&self) -> &[TraceState] {
        &self.states
    }

    /// A subject holding only the first state.
    pub fn first(&self) -> Option<TraceSubject> {
        self.states
            .first()
            .map(|s| TraceSubject::new(self.kind, vec![s.clone()]))
    }

    /// A subject holding only the last state.
    pub fn last(&self) -> Option<TraceSubject> {
        self.states
            .last()
            .map(|s| TraceSubject::new(self.kind, vec![s.clone()]))
    }
}

/// Kind of focus or interaction event in an event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusEventKind {
    FocusRequested,
    FocusGained,
    FocusLost,
    Input,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusEvent {
    pub timestamp: i64,
    pub window: String,
    pub kind: FocusEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Events collected during one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventLogSubject {
    events: Vec<FocusEvent>,
}

impl EventLogSubject {
    pub fn new(events: Vec<FocusEvent>) -> Self {
        Self { events }
    }

    /// Read a JSON-lines event log. A missing file yields an empty log.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event log: {}", path.display()))?;
        let events = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str::<FocusEvent>(line).with_context(|| {
                    format!("Invalid event on line {} of {}", i + 1, path.display())
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { events })
    }

    pub fn events(&self) -> &[FocusEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Converts a raw trace file into a subject.
///
/// Returns `Ok(None)` when the file holds no usable trace. Implementations
/// may be called concurrently for different trace kinds.
pub trait TraceParser: Send + Sync {
    fn parse(&self, kind: TraceKind, path: &Path) -> Result<Option<TraceSubject>>;
}

impl<F> TraceParser for F
where
    F: Fn(TraceKind, &Path) -> Result<Option<TraceSubject>> + Send + Sync,
{
    fn parse(&self, kind: TraceKind, path: &Path) -> Result<Option<TraceSubject>> {
        self(kind, path)
    }
}

/// Parses traces stored as one JSON object per line, each with an integer
/// `timestamp` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesParser;

impl TraceParser for JsonLinesParser {
    fn parse(&self, kind: TraceKind, path: &Path) -> Result<Option<TraceSubject>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read trace: {}", path.display()))?;

        let mut states = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let state: TraceState = serde_json::from_str(line).with_context(|| {
                format!("Invalid {} state on line {} of {}", kind, i + 1, path.display())
            })?;
            states.push(state);
        }

        if states.is_empty() {
            return Ok(None);
        }
        Ok(Some(TraceSubject::new(kind, states)))
    }
}
