use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "flicker")]
#[command(version, about = "Transition-test runner: drive device transitions and capture traces")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the configured transition test
    Run {
        /// Number of repetitions. Overrides flicker.toml and FLICKER_REPETITIONS.
        #[arg(short, long)]
        repetitions: Option<u32>,

        /// Artifact directory. Overrides flicker.toml and FLICKER_OUTPUT_DIR.
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a starter flicker.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    flicker::logging::init(cli.verbose, cli.json_logs);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            repetitions,
            output_dir,
        } => {
            cmd::cmd_run(&cli, project_dir, *repetitions, output_dir.clone()).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
