//! Trace monitors: the collaborators that record traces during a transition.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::subject::TraceKind;

/// Records one kind of trace between `start` and `stop`.
#[async_trait]
pub trait TraceMonitor: Send + Sync {
    fn kind(&self) -> TraceKind;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Stop without failing. Errors are logged.
    async fn try_stop(&self) {
        if let Err(e) = self.stop().await {
            tracing::warn!(monitor = %self.kind(), error = %format!("{e:#}"), "Failed to stop monitor");
        }
    }

    /// File the monitor writes, if it writes one.
    fn output_file(&self) -> Option<PathBuf>;
}

/// The monitors attached to one runner, driven together.
#[derive(Clone, Default)]
pub struct MonitorSet {
    monitors: Vec<Arc<dyn TraceMonitor>>,
}

impl MonitorSet {
    pub fn new(monitors: Vec<Arc<dyn TraceMonitor>>) -> Self {
        Self { monitors }
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// Start every monitor in order, stopping at the first failure.
    pub async fn start_all(&self) -> Result<()> {
        for monitor in &self.monitors {
            tracing::debug!(monitor = %monitor.kind(), "Starting monitor");
            monitor.start().await?;
        }
        Ok(())
    }

    /// Stop every monitor. All monitors are stopped even if one fails; the
    /// first error is returned.
    pub async fn stop_all(&self) -> Result<()> {
        let mut first_err = None;
        for monitor in &self.monitors {
            tracing::debug!(monitor = %monitor.kind(), "Stopping monitor");
            if let Err(e) = monitor.stop().await {
                tracing::warn!(monitor = %monitor.kind(), error = %format!("{e:#}"), "Monitor stop failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Best-effort stop used on failure paths.
    pub async fn try_stop_all(&self) {
        for monitor in &self.monitors {
            monitor.try_stop().await;
        }
    }

    /// Output file of the first monitor of `kind`.
    pub fn output_file(&self, kind: TraceKind) -> Option<PathBuf> {
        self.monitors
            .iter()
            .find(|m| m.kind() == kind)
            .and_then(|m| m.output_file())
    }
}
