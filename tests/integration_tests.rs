//! Integration tests for flicker
//!
//! These drive the binary end to end with shell-command collaborators.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a flicker Command
fn flicker() -> Command {
    cargo_bin_cmd!("flicker")
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn write_config(dir: &Path, content: &str) {
    fs::create_dir_all(dir.join(".flicker")).unwrap();
    fs::write(dir.join(".flicker/flicker.toml"), content).unwrap();
}

fn read_summary(dir: &Path) -> serde_json::Value {
    let content = fs::read_to_string(dir.join("flicker-out/results.json")).unwrap();
    serde_json::from_str(&content).unwrap()
}

const PASSING: &str = r#"
[test]
name = "open_app"
repetitions = 2

[device]
stable_command = "true"
wm_dump_command = "echo '{\"timestamp\":5}'"
layers_dump_command = "echo '{\"timestamp\":5}'"
poll_interval_ms = 10

[phases]
test_setup = "touch setup.done"
test_teardown = "touch teardown.done"

[[transition]]
command = "true"
tag = "midpoint"

[[transition]]
command = "true"

[[monitors]]
kind = "window_manager"
start = "printf '{\"timestamp\":1}\n{\"timestamp\":2}\n' > \"$FLICKER_OUTPUT\""
output = "wm_trace.jsonl"

[[rules]]
name = "marker"
setup = "touch rule.marker"
teardown = "rm rule.marker"
"#;

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_flicker_help() {
        flicker()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"));
    }

    #[test]
    fn test_flicker_version() {
        flicker().arg("--version").assert().success();
    }

    #[test]
    fn test_run_help_lists_overrides() {
        flicker()
            .args(["run", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--repetitions"))
            .stdout(predicate::str::contains("--output-dir"));
    }
}

// =============================================================================
// Config Command Tests
// =============================================================================

mod config_commands {
    use super::*;

    #[test]
    fn test_config_init_creates_file() {
        let dir = create_temp_project();

        flicker()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created flicker.toml"));

        assert!(dir.path().join(".flicker/flicker.toml").exists());
    }

    #[test]
    fn test_config_init_keeps_existing_file() {
        let dir = create_temp_project();
        write_config(dir.path(), "[test]\nname = \"mine\"\n");

        flicker()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        let content = fs::read_to_string(dir.path().join(".flicker/flicker.toml")).unwrap();
        assert!(content.contains("mine"));
    }

    #[test]
    fn test_config_validate_template() {
        let dir = create_temp_project();
        flicker()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success();

        flicker()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        write_config(
            dir.path(),
            "[test]\nrepetitions = 0\n\n[[transition]]\ncommand = \"true\"\ntag = \"START\"\n",
        );

        flicker()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"))
            .stdout(predicate::str::contains("reserved"));
    }

    #[test]
    fn test_config_validate_rejects_invalid_toml() {
        let dir = create_temp_project();
        write_config(dir.path(), "[test\nname = ");

        flicker()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse flicker.toml"));
    }

    #[test]
    fn test_config_show_applies_env() {
        let dir = create_temp_project();

        flicker()
            .current_dir(dir.path())
            .env("FLICKER_REPETITIONS", "11")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("repetitions = 11"));
    }
}

// =============================================================================
// Run Command Tests
// =============================================================================

mod run_command {
    use super::*;

    #[test]
    fn test_run_passing_test() {
        let dir = create_temp_project();
        write_config(dir.path(), PASSING);

        flicker()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("ASSERTION_SUCCESS"));

        let out = dir.path().join("flicker-out");
        assert!(out.join("PASS_open_app_0.zip").exists());
        assert!(out.join("PASS_open_app_1.zip").exists());
        assert!(out.join("PASS_open_app_0_midpoint_wm.dump").exists());
        assert!(dir.path().join("setup.done").exists());
        assert!(dir.path().join("teardown.done").exists());
        assert!(!dir.path().join("rule.marker").exists());

        let summary = read_summary(dir.path());
        assert_eq!(summary["test_name"], "open_app");
        assert_eq!(summary["results"].as_array().unwrap().len(), 8);
        assert_eq!(summary["tags"], serde_json::json!(["midpoint"]));
        assert!(summary["execution_errors"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_run_repetitions_override() {
        let dir = create_temp_project();
        write_config(dir.path(), PASSING);

        flicker()
            .current_dir(dir.path())
            .env("FLICKER_REPETITIONS", "3")
            .args(["run", "--repetitions", "1"])
            .assert()
            .success();

        let summary = read_summary(dir.path());
        assert_eq!(summary["results"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_run_transition_failure_exits_nonzero() {
        let dir = create_temp_project();
        let failing = PASSING.replacen("command = \"true\"\n\n[[monitors]]", "command = \"exit 4\"\n\n[[monitors]]", 1);
        write_config(dir.path(), &failing);

        flicker()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Transition execution failed"));

        let out = dir.path().join("flicker-out");
        assert!(out.join("FAIL_RUN_open_app_0.zip").exists());
        assert!(!out.join("PASS_open_app_1.zip").exists());
        assert!(dir.path().join("teardown.done").exists());

        let summary = read_summary(dir.path());
        assert_eq!(summary["status"], "RUN_FAILED");
        assert_eq!(summary["execution_errors"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_run_rule_setup_failure_skips_test() {
        let dir = create_temp_project();
        let failing = PASSING.replace("setup = \"touch rule.marker\"", "setup = \"exit 1\"");
        write_config(dir.path(), &failing);

        flicker()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Test setup failed"));

        assert!(!dir.path().join("setup.done").exists());
        let summary = read_summary(dir.path());
        assert!(summary["results"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_run_output_dir_override() {
        let dir = create_temp_project();
        write_config(dir.path(), PASSING);

        flicker()
            .current_dir(dir.path())
            .args(["run", "--output-dir", "custom"])
            .assert()
            .success();

        assert!(dir.path().join("custom/results.json").exists());
        assert!(dir.path().join("custom/PASS_open_app_0.zip").exists());
    }
}
