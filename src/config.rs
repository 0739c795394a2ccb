//! Configuration for flicker, read from `.flicker/flicker.toml`.
//!
//! Settings are layered file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [test]
//! name = "open_app"
//! repetitions = 3
//! output_dir = "flicker-out"
//!
//! [device]
//! stable_command = "adb shell dumpsys window | grep -q 'mAppTransitionState=APP_STATE_IDLE'"
//! wm_dump_command = "adb exec-out dumpsys window --proto"
//! layers_dump_command = "adb exec-out dumpsys SurfaceFlinger --proto"
//! poll_interval_ms = 500
//! stable_timeout_secs = 30
//! conditions = ["no_pending_transitions", "app_transition_idle"]
//!
//! [phases]
//! test_setup = "adb shell input keyevent KEYCODE_WAKEUP"
//! transition_teardown = "adb shell input keyevent KEYCODE_HOME"
//! timeout_secs = 60
//!
//! [[transition]]
//! command = "adb shell am start -W com.example/.Main"
//! tag = "launched"
//!
//! [[monitors]]
//! kind = "window_manager"
//! start = "record-wm > wm_trace.jsonl"
//! output = "wm_trace.jsonl"
//!
//! [[rules]]
//! name = "stay-awake"
//! setup = "adb shell svc power stayon true"
//! teardown = "adb shell svc power stayon false"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::device::StateCondition;
use crate::runner::validate_tag;
use crate::subject::TraceKind;

/// Name of the per-project configuration directory.
pub const FLICKER_DIR: &str = ".flicker";
/// Name of the configuration file inside [`FLICKER_DIR`].
pub const CONFIG_FILE: &str = "flicker.toml";

/// Environment variable overriding `test.repetitions`.
pub const ENV_REPETITIONS: &str = "FLICKER_REPETITIONS";
/// Environment variable overriding `test.output_dir`.
pub const ENV_OUTPUT_DIR: &str = "FLICKER_OUTPUT_DIR";

/// Starter configuration written by `flicker config init`.
pub const TEMPLATE: &str = r#"[test]
name = "example"
repetitions = 3
output_dir = "flicker-out"

[device]
# Exits 0 once the device is idle; polled until stable_timeout_secs.
# stable_command = "..."
# Print a window-manager / layers state dump on stdout.
# wm_dump_command = "..."
# layers_dump_command = "..."
poll_interval_ms = 500
stable_timeout_secs = 30
# Passed to stable_command in FLICKER_CONDITIONS.
conditions = ["no_pending_transitions", "no_layer_animation", "app_transition_idle"]

[phases]
timeout_secs = 60

[[transition]]
command = "echo transition"

[[monitors]]
kind = "window_manager"
start = "echo '{\"timestamp\":0}' > wm_trace.jsonl"
output = "wm_trace.jsonl"
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSection {
    #[serde(default = "default_test_name")]
    pub name: String,
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    /// Where artifacts are written, relative to the project directory
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_test_name() -> String {
    "transition".to_string()
}

fn default_repetitions() -> u32 {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("flicker-out")
}

impl Default for TestSection {
    fn default() -> Self {
        Self {
            name: default_test_name(),
            repetitions: default_repetitions(),
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wm_dump_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layers_dump_command: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stable_timeout_secs")]
    pub stable_timeout_secs: u64,
    /// Conditions waited for before and after every transition
    #[serde(default = "StateCondition::stable")]
    pub conditions: Vec<StateCondition>,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_stable_timeout_secs() -> u64 {
    30
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            stable_command: None,
            wm_dump_command: None,
            layers_dump_command: None,
            poll_interval_ms: default_poll_interval_ms(),
            stable_timeout_secs: default_stable_timeout_secs(),
            conditions: StateCondition::stable(),
        }
    }
}

/// Shell commands run at the fixed lifecycle points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhasesSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_setup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_setup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_teardown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_teardown: Option<String>,
    /// Timeout for every command flicker runs
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for PhasesSection {
    fn default() -> Self {
        Self {
            test_setup: None,
            transition_setup: None,
            transition_teardown: None,
            test_teardown: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// One step of the transition. A tag is captured after the step succeeds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitionStep {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorConfig {
    pub kind: TraceKind,
    /// Long-running command started before the transition
    pub start: String,
    /// Optional command run before the start command is terminated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<String>,
    /// File the monitor writes, relative to the output directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown: Option<String>,
}

/// The complete flicker.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FlickerToml {
    #[serde(default)]
    pub test: TestSection,
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub phases: PhasesSection,
    #[serde(default, rename = "transition")]
    pub transition: Vec<TransitionStep>,
    #[serde(default)]
    pub monitors: Vec<MonitorConfig>,
    /// Setup rules, outermost first
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl FlickerToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse flicker.toml")
    }

    /// Load `<flicker_dir>/flicker.toml`, or the defaults if it doesn't exist.
    pub fn load_or_default(flicker_dir: &Path) -> Result<Self> {
        let config_path = flicker_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize flicker.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_REPETITIONS) {
            self.test.repetitions = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: '{}'", ENV_REPETITIONS, value))?;
        }
        if let Some(value) = lookup(ENV_OUTPUT_DIR).filter(|v| !v.is_empty()) {
            self.test.output_dir = PathBuf::from(value);
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.test.name.is_empty() || self.test.name.chars().any(char::is_whitespace) {
            warnings.push(format!(
                "Invalid test name '{}': must be non-empty without whitespace",
                self.test.name
            ));
        }
        if self.test.repetitions == 0 {
            warnings.push("test.repetitions is 0: the transition will never run".to_string());
        }
        if self.phases.timeout_secs == 0 {
            warnings.push("phases.timeout_secs is 0: every command will time out".to_string());
        }
        if self.device.stable_command.is_some() && self.device.poll_interval_ms == 0 {
            warnings.push("device.poll_interval_ms is 0".to_string());
        }
        if self.device.stable_command.is_some() && self.device.conditions.is_empty() {
            warnings.push("device.conditions is empty: stability is never checked".to_string());
        }

        if self.transition.is_empty() {
            warnings.push("No [[transition]] steps configured".to_string());
        }
        let mut tags = HashSet::new();
        for step in &self.transition {
            let Some(tag) = &step.tag else { continue };
            if let Err(e) = validate_tag(tag) {
                warnings.push(e.to_string());
            } else if !tags.insert(tag.as_str()) {
                warnings.push(format!("Tag '{}' is used by more than one step", tag));
            }
        }
        if !tags.is_empty()
            && (self.device.wm_dump_command.is_none() || self.device.layers_dump_command.is_none())
        {
            warnings.push(
                "Transition tags are configured but device dump commands are missing".to_string(),
            );
        }

        let mut kinds = HashSet::new();
        for monitor in &self.monitors {
            if !kinds.insert(monitor.kind) {
                warnings.push(format!(
                    "More than one {} monitor: only the first one's output is used",
                    monitor.kind
                ));
            }
        }
        if !kinds.contains(&TraceKind::WindowManager) && !kinds.contains(&TraceKind::Layers) {
            warnings.push("No window_manager or layers monitor configured".to_string());
        }

        let mut rule_names = HashSet::new();
        for rule in &self.rules {
            if !rule_names.insert(rule.name.as_str()) {
                warnings.push(format!("Duplicate rule name '{}'", rule.name));
            }
        }

        warnings
    }
}

/// Configuration resolved for one invocation.
#[derive(Debug, Clone)]
pub struct FlickerConfig {
    pub project_dir: PathBuf,
    pub flicker_dir: PathBuf,
    pub toml: FlickerToml,
    pub verbose: bool,
}

impl FlickerConfig {
    /// Load from `project_dir`, applying environment overrides.
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let mut config = Self::without_env(project_dir, verbose)?;
        config.toml.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from `project_dir` only.
    pub fn without_env(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let flicker_dir = project_dir.join(FLICKER_DIR);
        let toml = FlickerToml::load_or_default(&flicker_dir)?;
        Ok(Self {
            project_dir,
            flicker_dir,
            toml,
            verbose,
        })
    }

    /// Apply CLI overrides, which win over file and environment.
    pub fn with_overrides(mut self, repetitions: Option<u32>, output_dir: Option<PathBuf>) -> Self {
        if let Some(repetitions) = repetitions {
            self.toml.test.repetitions = repetitions;
        }
        if let Some(output_dir) = output_dir {
            self.toml.test.output_dir = output_dir;
        }
        self
    }

    pub fn config_path(&self) -> PathBuf {
        self.flicker_dir.join(CONFIG_FILE)
    }

    /// Output directory, resolved against the project directory.
    pub fn output_dir(&self) -> PathBuf {
        if self.toml.test.output_dir.is_absolute() {
            self.toml.test.output_dir.clone()
        } else {
            self.project_dir.join(&self.toml.test.output_dir)
        }
    }
}
