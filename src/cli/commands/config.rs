//! Configuration CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::path::Path;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration after merging files and environment
    Show,
    /// Load and validate the configuration
    Validate,
}

#[derive(Debug, Serialize)]
struct ConfigShowOutput {
    config: Config,
}

impl CommandOutput for ConfigShowOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config).unwrap_or_else(|e| format!("unprintable config: {e}"))
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Serialize)]
struct ConfigValidateOutput {
    valid: bool,
    source: String,
}

impl CommandOutput for ConfigValidateOutput {
    fn to_human(&self) -> String {
        format!("Configuration is valid ({})", self.source)
    }
}

pub fn execute(args: ConfigArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::resolve(config_path).context("Configuration is invalid")?;
    match args.command {
        ConfigCommand::Show => output(&ConfigShowOutput { config: redacted(config) }, json_mode),
        ConfigCommand::Validate => output(
            &ConfigValidateOutput {
                valid: true,
                source: config_path.map_or_else(
                    || ".flotilla/config.yaml".to_string(),
                    |p| p.display().to_string(),
                ),
            },
            json_mode,
        ),
    }
    Ok(())
}

/// Hide the bearer token before printing.
fn redacted(mut config: Config) -> Config {
    if config.remote.token.is_some() {
        config.remote.token = Some("********".to_string());
    }
    config
}
