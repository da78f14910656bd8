//! Fleet commander: the single control loop.
//!
//! Each cycle drains the event bus, folds the events into fleet state, asks
//! the strategy engine for a plan once per batch and applies the diff through
//! the supervisor, stops before starts. Only this loop touches the
//! supervisor's start/stop surface, so two diffs are never applied
//! concurrently.

use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::event_bus::SharedEventBus;
use super::fleet_state::FleetState;
use super::strategy_engine::StrategyEngine;
use super::task_supervisor::{StopOutcome, TaskSupervisor};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentSymbol, AggregateDelta, AssignmentPlan, CommanderConfig, DeliveryTarget, EventPayload, FleetEvent,
    FleetMutation, FleetSnapshot, Instruction, Objective, ObjectiveRequest,
};
use crate::domain::ports::{AggregateSource, FleetLog, FleetLogRecord, NullFleetLog};

/// Refresh results waiting for the loop; the refresher waits beyond this.
const REFRESH_CHANNEL_CAPACITY: usize = 1;

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Events absorbed.
    pub events: usize,
    /// Terminal events whose task run had already been stopped or replaced.
    pub stale_events: usize,
    /// Diff applied, across retries.
    pub instructions: Vec<Instruction>,
    pub started: usize,
    pub stopped: usize,
    /// Stops that ended in a crash.
    pub crashed: usize,
    /// The plan was rejected twice and nothing was applied.
    pub abandoned: bool,
}

impl CycleReport {
    /// Nothing was started or stopped.
    pub fn is_noop(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Owns the control loop; see the module docs.
pub struct FleetCommander {
    state: Arc<FleetState>,
    bus: SharedEventBus,
    engine: StrategyEngine,
    supervisor: Arc<TaskSupervisor>,
    log: Arc<dyn FleetLog>,
    aggregates: Option<Arc<dyn AggregateSource>>,
    config: CommanderConfig,
    wake: Arc<Notify>,
    last_credits: i64,
}

impl FleetCommander {
    pub fn new(
        state: Arc<FleetState>,
        bus: SharedEventBus,
        engine: StrategyEngine,
        supervisor: Arc<TaskSupervisor>,
        config: CommanderConfig,
    ) -> Self {
        let last_credits = state.read().aggregates.credits;
        Self {
            state,
            bus,
            engine,
            supervisor,
            log: Arc::new(NullFleetLog::new()),
            aggregates: None,
            config,
            wake: Arc::new(Notify::new()),
            last_credits,
        }
    }

    /// Record plan changes and outcomes to `log`.
    pub fn with_fleet_log(mut self, log: Arc<dyn FleetLog>) -> Self {
        self.log = log;
        self
    }

    /// Poll `source` on the re-evaluation timer while running.
    pub fn with_aggregate_source(mut self, source: Arc<dyn AggregateSource>) -> Self {
        self.aggregates = Some(source);
        self
    }

    /// Control and observability handle; usable while [`run`](Self::run)
    /// owns the commander.
    pub fn handle(&self) -> CommanderHandle {
        CommanderHandle {
            state: Arc::clone(&self.state),
            bus: Arc::clone(&self.bus),
            wake: Arc::clone(&self.wake),
        }
    }

    /// Run until `shutdown` fires or the event bus closes, then stop every
    /// agent task.
    ///
    /// Aggregate refreshes run in their own task and hand their deltas back
    /// over a channel, so a slow remote never holds up events, pins or
    /// shutdown.
    pub async fn run(mut self, shutdown: CancellationToken) -> DomainResult<()> {
        let bus = Arc::clone(&self.bus);
        let wake = Arc::clone(&self.wake);
        let period = self.config.reevaluate_interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();

        let refresh_stop = shutdown.child_token();
        let (refresh_tx, mut refreshed) = mpsc::channel(REFRESH_CHANNEL_CAPACITY);
        let refresher = match (&self.aggregates, self.config.refresh_aggregates) {
            (Some(source), true) => Some(spawn_refresh(
                Arc::clone(source),
                period,
                refresh_tx,
                refresh_stop.clone(),
            )),
            _ => None,
        };

        info!(
            agents = self.state.read().agents.len(),
            interval = ?period,
            refresh = refresher.is_some(),
            "fleet commander started"
        );
        self.run_cycle(Vec::new()).await;

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("fleet commander received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle(Vec::new()).await;
                }
                Some(deltas) = refreshed.recv() => {
                    self.apply_refresh(deltas);
                    self.run_cycle(Vec::new()).await;
                }
                () = wake.notified() => {
                    self.run_cycle(Vec::new()).await;
                }
                batch = bus.next_batch() => {
                    if batch.is_empty() {
                        info!("event bus closed");
                        break;
                    }
                    self.run_cycle(batch).await;
                }
            }
        }

        refresh_stop.cancel();
        if let Some(refresher) = refresher {
            if let Err(err) = refresher.await {
                warn!(error = %err, "aggregate refresh task ended abnormally");
            }
        }
        self.stand_down().await;
        self.bus.close().await;
        info!("fleet commander stopped");
        Ok(())
    }

    /// One full cycle: absorb `batch`, decide once, apply the diff.
    pub async fn run_cycle(&mut self, batch: Vec<FleetEvent>) -> CycleReport {
        let span = info_span!("cycle", events = batch.len(), version = self.state.read().version);
        async {
            let mut report = CycleReport {
                events: batch.len(),
                ..CycleReport::default()
            };
            for event in &batch {
                self.absorb(event, &mut report).await;
            }
            let crossed = self.check_thresholds().await;
            let trigger = batch.last().or(crossed.last());

            self.reconcile(trigger, &mut report).await;
            if report.crashed > 0 && !report.abandoned {
                // Crashed agents are free again; place them this cycle.
                self.reconcile(None, &mut report).await;
            }

            if !report.is_noop() {
                info!(
                    started = report.started,
                    stopped = report.stopped,
                    crashed = report.crashed,
                    "plan applied"
                );
            }
            report
        }
        .instrument(span)
        .await
    }

    /// Fold one event into fleet state.
    async fn absorb(&self, event: &FleetEvent, report: &mut CycleReport) {
        debug!(event = %event, sequence = ?event.sequence, "absorbing event");
        match (&event.agent, &event.payload) {
            (Some(agent), EventPayload::ObjectiveCompleted { .. })
            | (Some(agent), EventPayload::ObjectiveFailed { .. }) => {
                if !self.supervisor.reap(agent).await {
                    debug!(event = %event, "stale terminal event ignored");
                    report.stale_events += 1;
                    return;
                }
                if let EventPayload::ObjectiveFailed { objective, reason } = &event.payload {
                    warn!(agent = %agent, objective = %objective, reason = %reason, "objective failed");
                }
                self.log_event(event).await;
                self.apply(FleetMutation::mark_idle(agent.clone()));
            }
            (Some(agent), EventPayload::AgentCrashed { reason, .. }) => {
                if !self.supervisor.reap(agent).await {
                    report.stale_events += 1;
                    return;
                }
                error!(agent = %agent, reason = %reason, "agent crashed");
                self.log_event(event).await;
                self.settle_crash(agent, reason);
            }
            (None, payload) if payload.kind().is_terminal() => {
                warn!(event = %event, "terminal event without agent ignored");
            }
            (_, EventPayload::DeliveryMade { target, units }) => {
                let delta = match target {
                    DeliveryTarget::Contract(contract_id) => AggregateDelta::ContractDelivered {
                        contract_id: contract_id.clone(),
                        units: *units,
                    },
                    DeliveryTarget::Build(site) => AggregateDelta::BuildDelivered {
                        site: site.clone(),
                        units: *units,
                    },
                };
                self.apply(FleetMutation::UpdateAggregate(delta));
            }
            (_, EventPayload::TradeExecuted { profit, .. }) => {
                self.apply(FleetMutation::UpdateAggregate(AggregateDelta::AdjustCredits(*profit)));
            }
            (_, EventPayload::RouteExhausted { route_id }) => {
                self.apply(FleetMutation::UpdateAggregate(AggregateDelta::RetireRoute {
                    route_id: route_id.clone(),
                }));
            }
            (_, EventPayload::IntelDiscovered { system, routes }) => {
                self.apply(FleetMutation::UpdateAggregate(AggregateDelta::RecordIntel {
                    system: system.clone(),
                    routes: routes.clone(),
                }));
            }
            (agent, EventPayload::AgentIdle { reason }) => {
                debug!(agent = ?agent, reason = %reason, "mission reported idle");
            }
            _ => {}
        }
    }

    /// Decide, validate and apply; retried once from a fresh snapshot.
    async fn reconcile(&self, trigger: Option<&FleetEvent>, report: &mut CycleReport) {
        for attempt in 1..=2 {
            let snapshot = self.state.read();
            let plan = self.engine.decide(&snapshot, trigger);
            match self.prepare(&snapshot, &plan) {
                Ok(instructions) => {
                    report.abandoned = false;
                    self.execute(instructions, report).await;
                    return;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "plan rejected");
                    report.abandoned = true;
                }
            }
        }
        error!("plan abandoned, fleet state unchanged");
    }

    /// Dry-run the whole diff so it is applied entirely or not at all.
    fn prepare(&self, snapshot: &FleetSnapshot, plan: &AssignmentPlan) -> DomainResult<Vec<Instruction>> {
        plan.validate(snapshot)?;
        let instructions = plan.diff(snapshot);
        let mut stops = Vec::new();
        let mut starts = Vec::new();
        for instruction in &instructions {
            let agent = instruction.agent().clone();
            if instruction.stops_first() {
                stops.push(FleetMutation::Unassign(agent.clone()));
                stops.push(FleetMutation::mark_idle(agent.clone()));
            }
            if let Some(objective) = instruction.objective() {
                self.supervisor.ensure_supported(objective)?;
                starts.push(FleetMutation::Assign(agent, objective.clone()));
            }
        }
        stops.extend(starts);
        self.state.validate(&stops)?;
        Ok(instructions)
    }

    async fn execute(&self, instructions: Vec<Instruction>, report: &mut CycleReport) {
        for instruction in &instructions {
            debug!(instruction = %instruction, "applying");
            self.append(FleetLogRecord::new(
                Some(instruction.agent().clone()),
                "plan_change",
                json!(instruction),
            ))
            .await;
        }

        let stopping: Vec<&AgentSymbol> = instructions
            .iter()
            .filter(|i| i.stops_first())
            .map(Instruction::agent)
            .collect();
        let outcomes = join_all(stopping.iter().map(|agent| self.stop_agent(agent))).await;
        let mut crashed = Vec::new();
        for (agent, outcome) in stopping.iter().zip(&outcomes) {
            report.stopped += 1;
            if outcome.is_crash() {
                report.crashed += 1;
                crashed.push(*agent);
            }
        }

        for instruction in &instructions {
            let Some(objective) = instruction.objective() else {
                continue;
            };
            if crashed.contains(&instruction.agent()) {
                continue;
            }
            if self.start_agent(instruction.agent(), objective.clone()) {
                report.started += 1;
            }
        }
        report.instructions.extend(instructions);
    }

    /// RUNNING -> STOPPING -> UNASSIGNED, or CRASHED -> UNASSIGNED when the
    /// task has to be forced.
    async fn stop_agent(&self, agent: &AgentSymbol) -> StopOutcome {
        let held = self
            .state
            .read()
            .agents
            .get(agent)
            .and_then(|a| a.assignment.clone());
        self.apply(FleetMutation::Unassign(agent.clone()));
        let outcome = self.supervisor.stop(agent).await;
        match outcome.crash_reason() {
            None => {
                self.apply(FleetMutation::mark_idle(agent.clone()));
            }
            Some(reason) => {
                let event = self.bus.record(FleetEvent::for_agent(
                    agent.clone(),
                    EventPayload::AgentCrashed {
                        objective: held,
                        reason: reason.clone(),
                    },
                ));
                error!(agent = %agent, reason = %reason, "agent crashed while stopping");
                self.log_event(&event).await;
                self.settle_crash(agent, &reason);
            }
        }
        outcome
    }

    fn start_agent(&self, agent: &AgentSymbol, objective: Objective) -> bool {
        let Some(snapshot) = self.apply(FleetMutation::Assign(agent.clone(), objective.clone())) else {
            return false;
        };
        let started = snapshot
            .agent(agent)
            .and_then(|record| self.supervisor.start(record, objective));
        match started {
            Ok(()) => true,
            Err(err) => {
                error!(agent = %agent, error = %err, "failed to start task, rolling back");
                self.apply(FleetMutation::mark_idle(agent.clone()));
                false
            }
        }
    }

    /// CRASHED is published on its own before the agent becomes free.
    fn settle_crash(&self, agent: &AgentSymbol, reason: &str) {
        self.apply(FleetMutation::MarkCrashed(agent.clone(), reason.to_string()));
        self.apply(FleetMutation::mark_idle(agent.clone()));
    }

    /// Emit an event for every capital floor the credits crossed since the
    /// previous check.
    async fn check_thresholds(&mut self) -> Vec<FleetEvent> {
        let credits = self.state.read().aggregates.credits;
        let previous = std::mem::replace(&mut self.last_credits, credits);
        let policy = self.engine.policy;
        let mut floors = vec![policy.park_floor, policy.trade_floor, policy.build_floor];
        floors.sort_unstable();
        floors.dedup();

        let mut crossed = Vec::new();
        for floor in floors {
            let above = credits >= floor;
            if (previous >= floor) == above {
                continue;
            }
            info!(credits, floor, above, "credit threshold crossed");
            let event = self.bus.record(FleetEvent::fleet_wide(
                EventPayload::ResourceThresholdCrossed {
                    credits,
                    floor,
                    above,
                },
            ));
            self.log_event(&event).await;
            crossed.push(event);
        }
        crossed
    }

    fn apply_refresh(&self, deltas: Vec<AggregateDelta>) {
        let mutations: Vec<_> = deltas.into_iter().map(FleetMutation::UpdateAggregate).collect();
        match self.state.apply_all(&mutations) {
            Ok(snapshot) => debug!(credits = snapshot.aggregates.credits, "aggregates refreshed"),
            Err(err) => warn!(error = %err, "aggregate refresh rejected"),
        }
    }

    /// Stop every running agent.
    async fn stand_down(&self) {
        let running = self.supervisor.running();
        if running.is_empty() {
            return;
        }
        info!(agents = running.len(), "stopping all agent tasks");
        join_all(running.iter().map(|agent| self.stop_agent(agent))).await;
    }

    fn apply(&self, mutation: FleetMutation) -> Option<Arc<FleetSnapshot>> {
        match self.state.apply(mutation) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                error!(error = %err, "fleet mutation failed");
                None
            }
        }
    }

    async fn log_event(&self, event: &FleetEvent) {
        self.append(FleetLogRecord {
            timestamp: event.timestamp,
            agent: event.agent.clone(),
            kind: event.kind().as_str().to_string(),
            detail: json!(event.payload),
        })
        .await;
    }

    async fn append(&self, record: FleetLogRecord) {
        if let Err(err) = self.log.append(&record).await {
            warn!(error = %err, kind = %record.kind, "fleet log append failed");
        }
    }
}

/// Poll `source` every `period` until `stop` fires, sending non-empty
/// results to the commander loop.
fn spawn_refresh(
    source: Arc<dyn AggregateSource>,
    period: Duration,
    deltas: mpsc::Sender<Vec<AggregateDelta>>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    let task = async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let refreshed = tokio::select! {
                () = stop.cancelled() => break,
                refreshed = source.refresh() => refreshed,
            };
            match refreshed {
                Ok(batch) if batch.is_empty() => {}
                Ok(batch) => {
                    tokio::select! {
                        () = stop.cancelled() => break,
                        sent = deltas.send(batch) => if sent.is_err() { break },
                    }
                }
                Err(err) => warn!(error = %err, "aggregate refresh failed"),
            }
        }
        debug!("aggregate refresh stopped");
    };
    tokio::spawn(task.instrument(info_span!("aggregate_refresh")))
}

/// Operator overrides plus read-only views for dashboards.
#[derive(Clone)]
pub struct CommanderHandle {
    state: Arc<FleetState>,
    bus: SharedEventBus,
    wake: Arc<Notify>,
}

impl CommanderHandle {
    /// Pin `objective` to `agent` until cleared or the agent crashes.
    ///
    /// Pinning also clears the agent's crash history.
    pub fn force_assign(&self, agent: &AgentSymbol, objective: Objective) -> DomainResult<()> {
        if let Some(key) = objective.key() {
            let snapshot = self.state.read();
            if let Some((other, _)) = snapshot
                .pins
                .iter()
                .find(|(a, o)| *a != agent && o.key().as_ref() == Some(&key))
            {
                return Err(DomainError::DoubleAssignment {
                    objective: key.to_string(),
                    holder: other.to_string(),
                });
            }
        }
        info!(agent = %agent, objective = %objective, "operator pin");
        self.state.apply_all(&[
            FleetMutation::Pin(agent.clone(), objective),
            FleetMutation::ResetCrashes(agent.clone()),
        ])?;
        self.wake.notify_one();
        Ok(())
    }

    /// Resolve an operator reference such as `contract:CT-7` and pin it.
    pub fn force_assign_request(&self, agent: &AgentSymbol, request: &ObjectiveRequest) -> DomainResult<()> {
        let objective = self.state.read().resolve(request)?;
        self.force_assign(agent, objective)
    }

    /// Pin `agent` to idle.
    pub fn force_idle(&self, agent: &AgentSymbol) -> DomainResult<()> {
        self.force_assign(agent, Objective::Idle)
    }

    /// Drop the pin on `agent` and let the strategy decide again.
    pub fn clear_override(&self, agent: &AgentSymbol) -> DomainResult<()> {
        self.state.read().agent(agent)?;
        info!(agent = %agent, "operator pin cleared");
        self.state.apply(FleetMutation::ClearPin(agent.clone()))?;
        self.wake.notify_one();
        Ok(())
    }

    /// Ask for an evaluation without waiting for an event.
    pub fn request_evaluation(&self) {
        self.wake.notify_one();
    }

    pub fn snapshot(&self) -> Arc<FleetSnapshot> {
        self.state.read()
    }

    /// Up to `limit` most recent processed events, oldest first.
    pub fn event_history(&self, limit: usize) -> Vec<FleetEvent> {
        self.bus.history(limit)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FleetEvent> {
        self.bus.subscribe()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<FleetSnapshot>> {
        self.state.subscribe()
    }
}
