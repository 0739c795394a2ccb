//! In-memory collaborators for unit tests.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::device::{Device, DeviceDump, StateCondition};
use crate::monitor::TraceMonitor;
use crate::runner::{TagRecorder, TransitionScript};
use crate::subject::TraceKind;

const TRACE_LINES: &str = "{\"timestamp\":1,\"focus\":\"launcher\"}\n{\"timestamp\":2,\"focus\":\"app\"}\n";

/// Monitor that writes its trace when started.
pub struct FakeMonitor {
    kind: TraceKind,
    output: Option<PathBuf>,
    content: Option<String>,
    fail_start: bool,
    fail_stop: bool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeMonitor {
    pub fn new(kind: TraceKind, output: Option<PathBuf>) -> Self {
        Self {
            kind,
            output,
            content: Some(TRACE_LINES.to_string()),
            fail_start: false,
            fail_stop: false,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn with_content(mut self, content: &str) -> Self {
        self.content = Some(content.to_string());
        self
    }

    /// Report an output file but never write it.
    pub fn without_output(mut self) -> Self {
        self.content = None;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TraceMonitor for FakeMonitor {
    fn kind(&self) -> TraceKind {
        self.kind
    }

    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            bail!("{} monitor failed to start", self.kind);
        }
        if let (Some(path), Some(content)) = (&self.output, &self.content) {
            std::fs::write(path, content)?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            bail!("{} monitor failed to stop", self.kind);
        }
        Ok(())
    }

    fn output_file(&self) -> Option<PathBuf> {
        self.output.clone()
    }
}

/// Device whose dumps are canned JSON lines.
pub struct FakeDevice {
    /// Fail every stability wait from this call (zero-based) on
    pub fail_stable_from: Option<usize>,
    pub fail_dump: bool,
    /// Return dumps that no parser accepts
    pub garbage_dump: bool,
    pub stable_calls: AtomicUsize,
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self {
            fail_stable_from: None,
            fail_dump: false,
            garbage_dump: false,
            stable_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Device for FakeDevice {
    async fn wait_for_stable(&self, conditions: &[StateCondition]) -> Result<()> {
        let call = self.stable_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stable_from.is_some_and(|from| call >= from) {
            bail!("Timed out waiting for {} conditions", conditions.len());
        }
        Ok(())
    }

    async fn dump(&self) -> Result<DeviceDump> {
        if self.fail_dump {
            bail!("dump failed");
        }
        if self.garbage_dump {
            return Ok(DeviceDump {
                window_manager: b"not json\n".to_vec(),
                layers: b"not json\n".to_vec(),
            });
        }
        Ok(DeviceDump {
            window_manager: b"{\"timestamp\":5,\"focus\":\"app\"}\n".to_vec(),
            layers: b"{\"timestamp\":5,\"visible\":[\"app\"]}\n".to_vec(),
        })
    }
}

/// Script that records every call and fails where told to.
#[derive(Default)]
pub struct FakeScript {
    pub fail_test_setup: bool,
    pub fail_transition_setup_at: Option<u32>,
    pub fail_transition_at: Option<u32>,
    pub fail_transition_teardown_at: Option<u32>,
    pub fail_test_teardown: bool,
    /// Tags created during the transition of the given iteration
    pub tags: Vec<(u32, String)>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeScript {
    fn log(&self, call: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.to_string());
        }
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter(|c| *c == call).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl TransitionScript for FakeScript {
    async fn test_setup(&self) -> Result<()> {
        self.log("test_setup");
        if self.fail_test_setup {
            bail!("setup failed");
        }
        Ok(())
    }

    async fn transition_setup(&self, iteration: u32) -> Result<()> {
        self.log("transition_setup");
        if self.fail_transition_setup_at == Some(iteration) {
            bail!("transition setup failed");
        }
        Ok(())
    }

    async fn transition(&self, tags: &mut TagRecorder<'_>) -> Result<()> {
        self.log("transition");
        let iteration = tags.iteration();
        for (at, tag) in &self.tags {
            if *at == iteration {
                tags.create_tag(tag).await?;
            }
        }
        if self.fail_transition_at == Some(iteration) {
            bail!("transition failed");
        }
        Ok(())
    }

    async fn transition_teardown(&self, iteration: u32) -> Result<()> {
        self.log("transition_teardown");
        if self.fail_transition_teardown_at == Some(iteration) {
            bail!("transition teardown failed");
        }
        Ok(())
    }

    async fn test_teardown(&self) -> Result<()> {
        self.log("test_teardown");
        if self.fail_test_teardown {
            bail!("teardown failed");
        }
        Ok(())
    }
}
