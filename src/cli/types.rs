//! CLI type definitions
//!
//! Top-level clap structures; per-command arguments live next to their
//! command implementations.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::{config::ConfigArgs, plan::PlanArgs, run::RunArgs};

#[derive(Parser, Debug)]
#[command(name = "flotilla")]
#[command(about = "Flotilla - fleet commander and request scheduler", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .flotilla/config.yaml and .flotilla/local.yaml)
    #[arg(short, long, global = true, env = "FLOTILLA_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the fleet commander until interrupted
    Run(RunArgs),

    /// Compute a one-shot assignment plan from a manifest without running anything
    Plan(PlanArgs),

    /// Inspect or validate configuration
    Config(ConfigArgs),
}
