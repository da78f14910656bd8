//! Offline one-shot planning.

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::Cell;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::cli::output::{list_table, output, render_list, truncate, CommandOutput};
use crate::domain::models::{AssignmentPlan, FleetManifest, FleetSnapshot, Instruction};
use crate::infrastructure::config::ConfigLoader;
use crate::services::StrategyEngine;

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Fleet manifest (YAML)
    #[arg(short, long)]
    pub manifest: PathBuf,

    /// Override the manifest's credit balance
    #[arg(long)]
    pub credits: Option<i64>,
}

#[derive(Debug, Serialize)]
struct PlanRow {
    agent: String,
    category: String,
    system: String,
    objective: String,
    reason: String,
}

#[derive(Debug, Serialize)]
struct PlanOutput {
    credits: i64,
    assignments: Vec<PlanRow>,
    instructions: Vec<Instruction>,
}

impl PlanOutput {
    fn new(snapshot: &FleetSnapshot, plan: &AssignmentPlan) -> Self {
        let assignments = plan
            .assignments
            .iter()
            .map(|(symbol, planned)| {
                let agent = snapshot.agents.get(symbol);
                PlanRow {
                    agent: symbol.to_string(),
                    category: agent.map(|a| a.capabilities.category.to_string()).unwrap_or_default(),
                    system: agent.map(|a| a.system.clone()).unwrap_or_default(),
                    objective: planned.objective.to_string(),
                    reason: planned.reason.to_string(),
                }
            })
            .collect();
        Self {
            credits: snapshot.aggregates.credits,
            assignments,
            instructions: plan.diff(snapshot),
        }
    }
}

impl CommandOutput for PlanOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["agent", "category", "system", "objective", "reason"]);
        for row in &self.assignments {
            table.add_row(vec![
                Cell::new(&row.agent),
                Cell::new(&row.category),
                Cell::new(&row.system),
                Cell::new(truncate(&row.objective, 48)),
                Cell::new(&row.reason),
            ]);
        }
        format!(
            "Credits: {}\n{}\n{} instruction(s) to reach this plan",
            self.credits,
            render_list("assignment", &table, self.assignments.len()),
            self.instructions.len()
        )
    }
}

pub async fn execute(args: PlanArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::resolve(config_path)?;
    let manifest = FleetManifest::from_file(&args.manifest)?;

    let mut snapshot = manifest.snapshot();
    if let Some(credits) = args.credits {
        snapshot.aggregates.credits = credits;
    }

    let engine = StrategyEngine::new(&config.strategy);
    let plan = engine.decide(&snapshot, None);
    plan.validate(&snapshot)
        .context("Strategy engine produced an inconsistent plan")?;

    output(&PlanOutput::new(&snapshot, &plan), json_mode);
    Ok(())
}
