//! Configuration view and validation commands (`flicker config`).

use anyhow::{Context, Result};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use flicker::config::{FLICKER_DIR, FlickerConfig, FlickerToml, TEMPLATE};

    let flicker_dir = project_dir.join(FLICKER_DIR);
    let config_path = flicker_dir.join(flicker::config::CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No flicker.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            // Effective values include environment overrides
            let config = FlickerConfig::new(project_dir.to_path_buf(), false)?;
            let rendered =
                toml::to_string_pretty(&config.toml).context("Failed to render configuration")?;
            println!("{}", rendered.trim_end());
            println!();
            println!("Output directory: {}", config.output_dir().display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No flicker.toml found. Run 'flicker config init' to create one.");
                return Ok(());
            }

            let toml = FlickerToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("flicker.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&flicker_dir)
                .with_context(|| format!("Failed to create {}", flicker_dir.display()))?;
            std::fs::write(&config_path, TEMPLATE)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;

            println!("Created flicker.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [test] name, repetitions, output_dir");
            println!("  - [device] stability and dump commands");
            println!("  - [[transition]] steps and tags, [[monitors]], [[rules]]");
            println!();
        }
    }

    Ok(())
}
