//! Collaborators backed by shell commands.
//!
//! Every command runs through `sh -c` with a timeout. Commands see the
//! shell's base environment (e.g. `FLICKER_TEST`, `FLICKER_OUTPUT_DIR`)
//! plus per-call variables such as `FLICKER_ITERATION`.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout};

use crate::config::{DeviceSection, MonitorConfig, PhasesSection, RuleConfig, TransitionStep};
use crate::device::{Device, DeviceDump, StateCondition};
use crate::monitor::TraceMonitor;
use crate::rules::SetupRule;
use crate::runner::{TagRecorder, TransitionScript};
use crate::subject::TraceKind;

/// How long a monitor's start command may keep running after `stop`
/// before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(1);

/// Runs commands in one working directory with one timeout.
#[derive(Debug, Clone)]
pub struct Shell {
    cwd: PathBuf,
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl Shell {
    pub fn new(cwd: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            cwd: cwd.into(),
            timeout,
            env: Vec::new(),
        }
    }

    /// Add a variable every command sees.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Same settings in another working directory.
    pub fn in_dir(&self, cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            ..self.clone()
        }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    fn command(&self, command: &str, env: &[(&str, String)]) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd
    }

    /// Run `command` to completion and return its stdout.
    ///
    /// Fails on spawn errors, on timeout and on a non-zero exit; the error
    /// carries the command's stderr.
    pub async fn run(&self, command: &str, env: &[(&str, String)]) -> Result<Vec<u8>> {
        tracing::debug!(command, cwd = %self.cwd.display(), "Running command");

        let child = self
            .command(command, env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn command: {}", command))?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.with_context(|| format!("Failed to wait for command: {}", command))?,
            Err(_) => bail!(
                "Command timed out after {} seconds: {}",
                self.timeout.as_secs(),
                command
            ),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Command '{}' exited with code {}: {}",
                command,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }
        Ok(output.stdout)
    }

    /// Start `command` in the background.
    fn spawn(&self, command: &str, env: &[(&str, String)]) -> Result<Child> {
        tracing::debug!(command, cwd = %self.cwd.display(), "Spawning command");
        self.command(command, env)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn command: {}", command))
    }
}

#[cfg(unix)]
fn killed_by_signal(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal().is_some()
}

#[cfg(not(unix))]
fn killed_by_signal(_status: &ExitStatus) -> bool {
    false
}

fn iteration_env(iteration: u32) -> [(&'static str, String); 1] {
    [("FLICKER_ITERATION", iteration.to_string())]
}

/// A monitor whose recording is a long-running shell command.
///
/// `start` spawns the start command. `stop` runs the optional stop command,
/// then gives the start command a short grace period before killing it.
pub struct CommandMonitor {
    kind: TraceKind,
    start: String,
    stop: Option<String>,
    output: Option<PathBuf>,
    shell: Shell,
    child: Mutex<Option<Child>>,
}

impl CommandMonitor {
    pub fn new(kind: TraceKind, start: impl Into<String>, shell: Shell) -> Self {
        Self {
            kind,
            start: start.into(),
            stop: None,
            output: None,
            shell,
            child: Mutex::new(None),
        }
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop = Some(stop.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Build from config. Commands run in, and relative outputs resolve
    /// against, the shell's directory.
    pub fn from_config(config: &MonitorConfig, shell: Shell) -> Self {
        let output = config.output.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                shell.cwd().join(p)
            }
        });
        Self {
            kind: config.kind,
            start: config.start.clone(),
            stop: config.stop.clone(),
            output,
            shell,
            child: Mutex::new(None),
        }
    }

    fn env(&self) -> Vec<(&'static str, String)> {
        self.output
            .iter()
            .map(|p| ("FLICKER_OUTPUT", p.display().to_string()))
            .collect()
    }
}

#[async_trait]
impl TraceMonitor for CommandMonitor {
    fn kind(&self) -> TraceKind {
        self.kind
    }

    async fn start(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        if child.is_some() {
            bail!("{} monitor is already running", self.kind);
        }
        *child = Some(self.shell.spawn(&self.start, &self.env())?);
        tracing::debug!(monitor = %self.kind, "Monitor started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let stop_result = match &self.stop {
            Some(command) => self.shell.run(command, &self.env()).await.map(|_| ()),
            None => Ok(()),
        };

        let Some(mut child) = self.child.lock().await.take() else {
            return stop_result;
        };

        match timeout(STOP_GRACE, child.wait()).await {
            Ok(status) => {
                let status = status.context("Failed to wait for monitor command")?;
                // A stop command that terminates the recorder is a clean stop
                let stopped = self.stop.is_some() && stop_result.is_ok();
                if !status.success() && !(stopped && killed_by_signal(&status)) {
                    bail!("{} monitor command exited with {}", self.kind, status);
                }
            }
            Err(_) => {
                child
                    .kill()
                    .await
                    .with_context(|| format!("Failed to kill {} monitor", self.kind))?;
            }
        }
        tracing::debug!(monitor = %self.kind, "Monitor stopped");
        stop_result
    }

    fn output_file(&self) -> Option<PathBuf> {
        self.output.clone()
    }
}

/// A device driven through stability and dump commands.
pub struct CommandDevice {
    shell: Shell,
    stable_command: Option<String>,
    wm_dump_command: Option<String>,
    layers_dump_command: Option<String>,
    poll_interval: Duration,
    stable_timeout: Duration,
}

impl CommandDevice {
    pub fn from_config(config: &DeviceSection, shell: Shell) -> Self {
        Self {
            shell,
            stable_command: config.stable_command.clone(),
            wm_dump_command: config.wm_dump_command.clone(),
            layers_dump_command: config.layers_dump_command.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            stable_timeout: Duration::from_secs(config.stable_timeout_secs),
        }
    }

    async fn dump_one(&self, command: Option<&str>, what: &str) -> Result<Vec<u8>> {
        match command {
            Some(command) => self
                .shell
                .run(command, &[])
                .await
                .with_context(|| format!("{} dump failed", what)),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Device for CommandDevice {
    /// Poll the stability command until it exits 0. The requested
    /// conditions are passed in `FLICKER_CONDITIONS`.
    async fn wait_for_stable(&self, conditions: &[StateCondition]) -> Result<()> {
        let Some(command) = &self.stable_command else {
            return Ok(());
        };
        let names: Vec<&str> = conditions.iter().map(|c| c.as_str()).collect();
        let env = [("FLICKER_CONDITIONS", names.join(","))];

        let deadline = Instant::now() + self.stable_timeout;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.shell.run(command, &env).await {
                Ok(_) => {
                    tracing::debug!(attempts, "Device stable");
                    return Ok(());
                }
                Err(e) if Instant::now() >= deadline => {
                    return Err(e.context(format!(
                        "Device not stable after {} attempts in {}s",
                        attempts,
                        self.stable_timeout.as_secs()
                    )));
                }
                Err(e) => {
                    tracing::debug!(attempts, error = %format!("{e:#}"), "Device not stable yet");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn dump(&self) -> Result<DeviceDump> {
        Ok(DeviceDump {
            window_manager: self
                .dump_one(self.wm_dump_command.as_deref(), "Window-manager")
                .await?,
            layers: self.dump_one(self.layers_dump_command.as_deref(), "Layers").await?,
        })
    }
}

/// A transition script made of phase commands and ordered steps.
pub struct CommandScript {
    shell: Shell,
    phases: PhasesSection,
    steps: Vec<TransitionStep>,
}

impl CommandScript {
    pub fn new(shell: Shell, phases: PhasesSection, steps: Vec<TransitionStep>) -> Self {
        Self {
            shell,
            phases,
            steps,
        }
    }

    async fn run_phase(&self, phase: &str, command: Option<&str>, env: &[(&str, String)]) -> Result<()> {
        if let Some(command) = command {
            tracing::info!(phase, "Running phase command");
            self.shell.run(command, env).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TransitionScript for CommandScript {
    async fn test_setup(&self) -> Result<()> {
        self.run_phase("test_setup", self.phases.test_setup.as_deref(), &[])
            .await
    }

    async fn transition_setup(&self, iteration: u32) -> Result<()> {
        self.run_phase(
            "transition_setup",
            self.phases.transition_setup.as_deref(),
            &iteration_env(iteration),
        )
        .await
    }

    async fn transition(&self, tags: &mut TagRecorder<'_>) -> Result<()> {
        let env = iteration_env(tags.iteration());
        for (i, step) in self.steps.iter().enumerate() {
            self.shell
                .run(&step.command, &env)
                .await
                .with_context(|| format!("Transition step {} failed", i + 1))?;
            if let Some(tag) = &step.tag {
                tags.create_tag(tag).await?;
            }
        }
        Ok(())
    }

    async fn transition_teardown(&self, iteration: u32) -> Result<()> {
        self.run_phase(
            "transition_teardown",
            self.phases.transition_teardown.as_deref(),
            &iteration_env(iteration),
        )
        .await
    }

    async fn test_teardown(&self) -> Result<()> {
        self.run_phase("test_teardown", self.phases.test_teardown.as_deref(), &[])
            .await
    }
}

/// A setup rule made of two optional commands.
pub struct CommandRule {
    name: String,
    setup: Option<String>,
    teardown: Option<String>,
    shell: Shell,
}

impl CommandRule {
    pub fn from_config(config: &RuleConfig, shell: Shell) -> Self {
        Self {
            name: config.name.clone(),
            setup: config.setup.clone(),
            teardown: config.teardown.clone(),
            shell,
        }
    }
}

#[async_trait]
impl SetupRule for CommandRule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&self) -> Result<()> {
        match &self.setup {
            Some(command) => self.shell.run(command, &[]).await.map(|_| ()),
            None => Ok(()),
        }
    }

    async fn teardown(&self) -> Result<()> {
        match &self.teardown {
            Some(command) => self.shell.run(command, &[]).await.map(|_| ()),
            None => Ok(()),
        }
    }
}
