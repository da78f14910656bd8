//! Common test utilities for integration tests
//!
//! Scripted missions, a no-op remote and a small fleet builder wired the
//! same way `flotilla run` wires the real thing.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use flotilla::domain::errors::RemoteError;
use flotilla::domain::models::{
    AgentSymbol, CommanderConfig, EventKind, FleetEvent, FleetManifest, ObjectiveKind, RetryConfig,
    SchedulerConfig, StrategyConfig, SupervisorConfig,
};
use flotilla::domain::ports::{Endpoint, FleetLog, RemoteClient};
use flotilla::services::{
    CommanderHandle, EventBus, EventBusConfig, FleetCommander, FleetState, Mission, MissionContext,
    MissionOutcome, MissionRegistry, RequestScheduler, ScheduledClient, StrategyEngine, TaskSupervisor,
};

/// Three agents in one system: a contract, a trade route and a probe.
pub const MIXED_FLEET: &str = r"
credits: 100000
agents:
  - symbol: H-1
    system: X1-A
    category: hauler
    capacity_class: high
    cargo_capacity: 80
  - symbol: H-2
    system: X1-A
    category: hauler
    capacity_class: high
    cargo_capacity: 80
  - symbol: P-1
    system: X1-A
    category: probe
contracts:
  - contract_id: CT-1
    good: COPPER
    remaining_units: 60
routes:
  - id: R-1
    system: X1-A
    good: FUEL
    source: X1-A-M1
    destination: X1-A-M2
    profit_per_trip: 900
";

/// Two high-capacity haulers, a build site wanting both and a fallback route.
pub const BUILD_FLEET: &str = r"
credits: 350000
agents:
  - symbol: H-1
    system: X1-A
    category: hauler
    capacity_class: high
    cargo_capacity: 80
  - symbol: H-2
    system: X1-A
    category: hauler
    capacity_class: high
    cargo_capacity: 80
builds:
  - site: X1-A-GATE
    material: FAB_MATS
    remaining_units: 1000
    required_agents: 2
routes:
  - id: R-1
    system: X1-A
    good: FUEL
    source: X1-A-M1
    destination: X1-A-M2
    profit_per_trip: 900
";

/// Remote that is never expected to be reached.
pub struct NoRemote;

#[async_trait]
impl RemoteClient for NoRemote {
    async fn call(&self, _endpoint: &Endpoint, _payload: Option<Value>) -> Result<Value, RemoteError> {
        Err(RemoteError::Permanent {
            status: 404,
            message: "no remote in tests".to_string(),
        })
    }
}

/// How a scripted mission ends.
#[derive(Clone)]
pub enum Behavior {
    Complete,
    Fail,
    Panic,
    /// Run until a stop is requested.
    Hold,
    /// Ignore stop requests entirely.
    Stuck,
    /// Complete once the gate is opened, or stop cooperatively.
    CompleteWhen(Arc<Notify>),
}

/// Mission for one objective kind whose outcome is chosen per agent.
pub struct ScriptedMission {
    kind: ObjectiveKind,
    default: Behavior,
    overrides: HashMap<AgentSymbol, Behavior>,
}

impl ScriptedMission {
    pub fn new(kind: ObjectiveKind, default: Behavior) -> Self {
        Self {
            kind,
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with(mut self, agent: &str, behavior: Behavior) -> Self {
        self.overrides.insert(AgentSymbol::new(agent), behavior);
        self
    }
}

#[async_trait]
impl Mission for ScriptedMission {
    fn kind(&self) -> ObjectiveKind {
        self.kind
    }

    async fn run(&self, ctx: MissionContext) -> MissionOutcome {
        let behavior = self
            .overrides
            .get(&ctx.agent.symbol)
            .unwrap_or(&self.default)
            .clone();
        match behavior {
            Behavior::Complete => MissionOutcome::Completed,
            Behavior::Fail => MissionOutcome::Failed("market closed".to_string()),
            Behavior::Panic => panic!("reactor breach on {}", ctx.agent.symbol),
            Behavior::Hold => {
                ctx.cancel.cancelled().await;
                MissionOutcome::Cancelled
            }
            Behavior::Stuck => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                MissionOutcome::Completed
            }
            Behavior::CompleteWhen(gate) => {
                tokio::select! {
                    () = ctx.cancel.cancelled() => MissionOutcome::Cancelled,
                    () = gate.notified() => MissionOutcome::Completed,
                }
            }
        }
    }
}

/// Registry where every objective kind holds until stopped.
pub fn holding_registry() -> MissionRegistry {
    registry_with(Vec::new())
}

/// Holding registry with some kinds replaced.
pub fn registry_with(missions: Vec<ScriptedMission>) -> MissionRegistry {
    let mut registry = MissionRegistry::new();
    for kind in [
        ObjectiveKind::ResourceScan,
        ObjectiveKind::Contract,
        ObjectiveKind::InfrastructureBuild,
        ObjectiveKind::Trade,
    ] {
        registry.register(Arc::new(ScriptedMission::new(kind, Behavior::Hold)));
    }
    for mission in missions {
        registry.register(Arc::new(mission));
    }
    registry
}

/// A commander and the shared pieces tests poke at.
pub struct Fleet {
    pub state: Arc<FleetState>,
    pub bus: Arc<EventBus>,
    pub supervisor: Arc<TaskSupervisor>,
    pub commander: FleetCommander,
    pub handle: CommanderHandle,
}

impl Fleet {
    pub fn new(manifest: &str, registry: MissionRegistry) -> Self {
        Self::build(manifest, registry, CommanderConfig::default(), None)
    }

    pub fn with_log(manifest: &str, registry: MissionRegistry, log: Arc<dyn FleetLog>) -> Self {
        Self::build(manifest, registry, CommanderConfig::default(), Some(log))
    }

    pub fn with_config(manifest: &str, registry: MissionRegistry, config: CommanderConfig) -> Self {
        Self::build(manifest, registry, config, None)
    }

    fn build(
        manifest: &str,
        registry: MissionRegistry,
        config: CommanderConfig,
        log: Option<Arc<dyn FleetLog>>,
    ) -> Self {
        let snapshot = FleetManifest::from_yaml(manifest)
            .expect("fixture manifest parses")
            .snapshot();
        let state = Arc::new(FleetState::new(snapshot));
        let bus = Arc::new(EventBus::new(EventBusConfig::from(&config)));
        let client = ScheduledClient::new(
            RequestScheduler::new(&SchedulerConfig::default()),
            Arc::new(NoRemote),
            RetryConfig::default(),
        );
        let supervisor = Arc::new(TaskSupervisor::new(
            registry,
            client,
            bus.publisher(),
            &SupervisorConfig { stop_timeout_ms: 50 },
        ));
        let mut commander = FleetCommander::new(
            Arc::clone(&state),
            Arc::clone(&bus),
            StrategyEngine::new(&StrategyConfig::default()),
            Arc::clone(&supervisor),
            config,
        );
        if let Some(log) = log {
            commander = commander.with_fleet_log(log);
        }
        let handle = commander.handle();
        Self {
            state,
            bus,
            supervisor,
            commander,
            handle,
        }
    }

    /// Wait for the next event batch and run one cycle over it.
    pub async fn cycle_next_batch(&mut self) -> flotilla::services::CycleReport {
        let batch = tokio::time::timeout(Duration::from_secs(5), self.bus.next_batch())
            .await
            .expect("an event arrives");
        self.commander.run_cycle(batch).await
    }

    /// How many events of `kind` about `agent` the bus has processed.
    pub fn history_count(&self, agent: &str, kind: EventKind) -> usize {
        let agent = AgentSymbol::new(agent);
        self.bus
            .history(usize::MAX)
            .iter()
            .filter(|e| e.kind() == kind && e.agent.as_ref() == Some(&agent))
            .count()
    }
}

pub fn symbol(s: &str) -> AgentSymbol {
    AgentSymbol::new(s)
}

pub fn fleet_event(agent: &str, payload: flotilla::domain::models::EventPayload) -> FleetEvent {
    FleetEvent::for_agent(AgentSymbol::new(agent), payload)
}

/// Poll `predicate` every 10ms until it holds or `timeout_ms` elapses.
pub async fn wait_for<F>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}
