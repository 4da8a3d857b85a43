//! Configuration loading, view and validation: `stager config`.

use anyhow::Result;

use stager::config::StagerConfig;

use super::super::{Cli, ConfigCommands};

/// Resolve configuration: file, then environment and flags.
pub fn load_config(cli: &Cli) -> Result<StagerConfig> {
    let mut config = StagerConfig::load_or_default(cli.config.as_deref())?;
    config.apply(&cli.overrides);
    Ok(config)
}

pub fn cmd_config(config: &StagerConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            print!("{}", config.to_redacted_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let problems = config.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
            } else {
                for problem in &problems {
                    println!("  - {}", problem);
                }
                anyhow::bail!("{} configuration problem(s) found", problems.len());
            }
        }
    }
    Ok(())
}
