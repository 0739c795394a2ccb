//! Test execution (`flicker run`).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::super::Cli;

pub async fn cmd_run(
    cli: &Cli,
    project_dir: PathBuf,
    repetitions: Option<u32>,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    use flicker::command::{CommandDevice, CommandMonitor, CommandRule, CommandScript, Shell};
    use flicker::config::FlickerConfig;
    use flicker::monitor::{MonitorSet, TraceMonitor};
    use flicker::rules::RuleChainRunner;
    use flicker::runner::{TestSpec, TransitionRunner};
    use flicker::subject::JsonLinesParser;

    let config = FlickerConfig::new(project_dir, cli.verbose)?.with_overrides(repetitions, output_dir);
    if !config.config_path().exists() {
        tracing::warn!(
            path = %config.config_path().display(),
            "No flicker.toml found, running with defaults"
        );
    }
    for warning in config.toml.validate() {
        tracing::warn!(%warning, "Configuration warning");
    }

    let toml = &config.toml;
    let output_dir = config.output_dir();
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let shell = Shell::new(&config.project_dir, Duration::from_secs(toml.phases.timeout_secs))
        .with_env("FLICKER_TEST", &toml.test.name)
        .with_env("FLICKER_OUTPUT_DIR", output_dir.display().to_string());

    let monitors: Vec<Arc<dyn TraceMonitor>> = toml
        .monitors
        .iter()
        .map(|m| {
            Arc::new(CommandMonitor::from_config(m, shell.in_dir(&output_dir))) as Arc<dyn TraceMonitor>
        })
        .collect();
    let monitors = MonitorSet::new(monitors);
    if monitors.is_empty() {
        tracing::warn!("No monitors configured, only tag snapshots will be checked");
    }
    let monitor_count = monitors.len();
    let runner = TransitionRunner::new(
        Arc::new(CommandDevice::from_config(&toml.device, shell.clone())),
        monitors,
        Arc::new(JsonLinesParser),
        &output_dir,
    )
    .with_conditions(toml.device.conditions.clone());
    tracing::debug!(output_dir = %runner.output_dir().display(), "Artifacts directory ready");
    let chain = toml.rules.iter().fold(RuleChainRunner::new(runner), |chain, rule| {
        chain.with_rule(Arc::new(CommandRule::from_config(rule, shell.clone())))
    });
    tracing::info!(
        monitors = monitor_count,
        rules = chain.rule_count(),
        "Transition runner configured"
    );

    let script = CommandScript::new(shell.clone(), toml.phases.clone(), toml.transition.clone());
    let spec = TestSpec::new(&toml.test.name, toml.test.repetitions, Arc::new(script));

    println!();
    println!(
        "{} {} ({} repetitions)",
        console::style("Running").bold().cyan(),
        spec.name,
        spec.repetitions
    );
    println!();

    let set = chain.execute(&spec).await;

    let summary = set.summary(&spec.name);
    let summary_path = output_dir.join("results.json");
    let json = serde_json::to_string_pretty(&summary).context("Failed to serialize run summary")?;
    std::fs::write(&summary_path, json)
        .with_context(|| format!("Failed to write {}", summary_path.display()))?;

    print_summary(&summary, &summary_path);

    set.check_for_execution_errors()?;
    Ok(())
}

fn print_summary(summary: &flicker::result::RunSummary, path: &Path) {
    use flicker::status::RunStatus;

    let status = summary.status.to_string();
    let styled = if summary.status.is_failure() {
        console::style(status).red().bold()
    } else if summary.status == RunStatus::AssertionSucceeded {
        console::style(status).green().bold()
    } else {
        console::style(status).yellow().bold()
    };

    println!("Status: {}", styled);
    println!("Results: {}", summary.results.len());
    for (status, count) in &summary.status_counts {
        println!("  {:<18} {}", status.as_str(), count);
    }
    if !summary.tags.is_empty() {
        println!("Tags: {}", summary.tags.join(", "));
    }
    if !summary.execution_errors.is_empty() {
        println!();
        println!("{}", console::style("Execution errors:").red());
        for error in &summary.execution_errors {
            println!("  - {}", error);
        }
    }
    println!();
    println!("Summary written to {}", console::style(path.display()).dim());
}
