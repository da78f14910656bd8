//! Run the fleet commander against the remote service.

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::Cell;
use console::style;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::missions::default_registry;
use crate::adapters::remote::{HttpRemoteClient, RemoteAggregateSource};
use crate::adapters::sqlite::{initialize_database, SqliteFleetLog};
use crate::cli::output::{colorize_status, list_table, output, render_list, CommandOutput};
use crate::domain::models::{AgentSymbol, FleetEvent, FleetManifest, FleetSnapshot, ObjectiveRequest};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::{LogConfig, LoggerImpl};
use crate::services::{
    EventBus, EventBusConfig, FleetCommander, FleetState, RequestScheduler, ScheduledClient,
    StrategyEngine, TaskSupervisor,
};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Fleet manifest (YAML)
    #[arg(short, long)]
    pub manifest: PathBuf,

    /// Pin an agent to an objective, e.g. `H-1:contract:CT-7` or `H-2:idle`
    #[arg(short, long = "assign", value_name = "SHIP:KIND[:TARGET]")]
    pub assignments: Vec<Assignment>,
}

/// Operator override given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub agent: AgentSymbol,
    pub request: ObjectiveRequest,
}

impl FromStr for Assignment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ship, objective) = s
            .split_once(':')
            .ok_or_else(|| format!("expected SHIP:KIND[:TARGET], got '{s}'"))?;
        if ship.trim().is_empty() {
            return Err(format!("missing ship symbol in '{s}'"));
        }
        Ok(Self {
            agent: AgentSymbol::new(ship.trim()),
            request: objective.parse()?,
        })
    }
}

#[derive(Debug, Serialize)]
struct FleetSummary {
    snapshot: FleetSnapshot,
}

impl CommandOutput for FleetSummary {
    fn to_human(&self) -> String {
        let mut table = list_table(&["agent", "status", "objective", "crashes"]);
        for agent in self.snapshot.agents.values() {
            table.add_row(vec![
                Cell::new(&agent.symbol),
                Cell::new(colorize_status(agent.status)),
                Cell::new(agent.current_objective()),
                Cell::new(agent.crash_count),
            ]);
        }
        format!(
            "Credits: {}\n{}",
            self.snapshot.aggregates.credits,
            render_list("agent", &table, self.snapshot.agents.len())
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.snapshot).unwrap_or(serde_json::Value::Null)
    }
}

pub async fn execute(args: RunArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::resolve(config_path)?;
    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging))?;
    let manifest = FleetManifest::from_file(&args.manifest)?;

    let remote = HttpRemoteClient::new(&config.remote).context("Failed to create remote client")?;
    let scheduler = RequestScheduler::spawn(&config.scheduler);
    let client = ScheduledClient::new(scheduler.clone(), Arc::new(remote), config.retry.clone());

    let bus = Arc::new(EventBus::new(EventBusConfig::from(&config.commander)));
    let state = Arc::new(FleetState::new(manifest.snapshot()));
    let supervisor = Arc::new(TaskSupervisor::new(
        default_registry(),
        client.clone(),
        bus.publisher(),
        &config.supervisor,
    ));

    let mut commander = FleetCommander::new(
        Arc::clone(&state),
        Arc::clone(&bus),
        StrategyEngine::new(&config.strategy),
        supervisor,
        config.commander.clone(),
    );
    if config.database.enabled {
        let pool = initialize_database(&config.database)
            .await
            .with_context(|| format!("Failed to open fleet log at {}", config.database.path))?;
        commander = commander.with_fleet_log(Arc::new(SqliteFleetLog::new(pool)));
    }
    if config.commander.refresh_aggregates && config.remote.token.is_some() {
        commander = commander.with_aggregate_source(Arc::new(RemoteAggregateSource::new(client)));
    }

    let handle = commander.handle();
    for assignment in &args.assignments {
        handle
            .force_assign_request(&assignment.agent, &assignment.request)
            .with_context(|| format!("Cannot pin {} to {}", assignment.agent, assignment.request))?;
        info!(agent = %assignment.agent, objective = %assignment.request, "operator pin applied");
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, standing down");
                signal.cancel();
            }
            Err(e) => warn!(error = %e, "failed to listen for interrupt"),
        }
    });

    let observer = tokio::spawn(print_events(handle.subscribe_events(), shutdown.clone(), json_mode));

    if !json_mode {
        println!(
            "{} {} agents, {} credits",
            style("Fleet commander started:").bold(),
            state.read().agents.len(),
            state.read().aggregates.credits
        );
    }

    let result = commander.run(shutdown.clone()).await;
    shutdown.cancel();
    scheduler.stop();
    let _ = observer.await;

    result.context("Fleet commander stopped with an error")?;
    output(
        &FleetSummary {
            snapshot: (*handle.snapshot()).clone(),
        },
        json_mode,
    );
    Ok(())
}

async fn print_events(
    mut events: tokio::sync::broadcast::Receiver<FleetEvent>,
    shutdown: CancellationToken,
    json_mode: bool,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            received = events.recv() => match received {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event printer lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };
        if json_mode {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{line}");
            }
        } else {
            let sequence = event.sequence.map_or_else(|| "-".to_string(), |s| s.to_string());
            println!(
                "{} {} {}",
                style(format!("#{sequence}")).dim(),
                style(event.timestamp.format("%H:%M:%S")).dim(),
                event
            );
        }
    }
}
