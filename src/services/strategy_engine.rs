//! Strategy engine: a pure function from fleet snapshot to assignment plan.
//!
//! No I/O, no clocks, no randomness. Agents are always visited in ascending
//! symbol order, demands in ascending identifier order, so the same snapshot
//! yields the same plan.
//!
//! Policy, per hauler, first match wins:
//! 1. unmet infrastructure build (high-capacity haulers, up to the build's
//!    required agents; new lanes only above the build floor)
//! 2. open contract (agents sized to the remaining volume)
//! 3. best trade route in the agent's system (new assignments only above the
//!    trade floor)
//! 4. idle
//!
//! Probes scan one system each. Pins override everything. Agents already
//! running a still-demanded objective keep it, and agents running elsewhere
//! are only pulled into a higher tier after every free agent was considered.

use std::collections::{BTreeSet, HashSet};

use crate::domain::models::{
    Agent, AgentCategory, AgentStatus, AgentSymbol, AssignmentPlan, AssignmentReason,
    CapacityClass, FleetEvent, FleetSnapshot, Objective, ObjectiveKey, ObjectiveKind,
    StrategyConfig, TradeRoute,
};

/// Credit floors gating capital use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapitalPolicy {
    /// New build lanes need at least this much.
    pub build_floor: i64,
    /// New trade assignments need at least this much.
    pub trade_floor: i64,
    /// Below this every hauler is parked.
    pub park_floor: i64,
}

impl CapitalPolicy {
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self {
            build_floor: config.build_floor,
            trade_floor: config.trade_floor,
            park_floor: config.park_floor,
        }
    }
}

/// Stateless policy; see the module docs for the rules.
#[derive(Debug, Clone)]
pub struct StrategyEngine {
    pub policy: CapitalPolicy,
    /// Most agents sent to a single contract.
    pub max_contract_agents: u32,
    /// Crashes before an agent is parked until pinned; zero disables.
    pub max_crashes: u32,
}

impl StrategyEngine {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            policy: CapitalPolicy::from_config(config),
            max_contract_agents: config.max_contract_agents.max(1),
            max_crashes: config.max_crashes,
        }
    }

    /// Compute the desired objective for every agent in `snapshot`.
    pub fn decide(&self, snapshot: &FleetSnapshot, trigger: Option<&FleetEvent>) -> AssignmentPlan {
        let mut round = Round {
            snapshot,
            plan: AssignmentPlan {
                trigger: trigger.map(FleetEvent::kind),
                ..AssignmentPlan::default()
            },
            reserved: HashSet::new(),
        };

        // A stopping agent still holds its identity until its task is gone.
        round.reserved.extend(
            snapshot
                .agents
                .values()
                .filter(|a| a.status == AgentStatus::Stopping)
                .filter_map(|a| a.assignment.as_ref().and_then(Objective::key)),
        );
        round.apply_pins();

        let mut haulers = Vec::new();
        let mut probes = Vec::new();
        for agent in snapshot.agents.values() {
            if round.is_planned(&agent.symbol) {
                continue;
            }
            if let Some(reason) = self.not_commandable(agent) {
                round.plan.insert(agent.symbol.clone(), Objective::Idle, reason);
                continue;
            }
            match agent.capabilities.category {
                AgentCategory::Probe => probes.push(agent),
                AgentCategory::Hauler if agent.capabilities.can_haul() => haulers.push(agent),
                _ => {
                    round.plan.insert(
                        agent.symbol.clone(),
                        Objective::Idle,
                        AssignmentReason::NotCommandable,
                    );
                }
            }
        }

        round.assign_probes(&probes);

        let credits = snapshot.aggregates.credits;
        if credits < self.policy.park_floor {
            for agent in haulers {
                round
                    .plan
                    .insert(agent.symbol.clone(), Objective::Idle, AssignmentReason::Parked);
            }
            return round.plan;
        }

        // Free agents first, then those running elsewhere; ascending symbol within each.
        haulers.sort_by_key(|a| (a.status == AgentStatus::Running, a.symbol.clone()));

        self.assign_builds(&mut round, &haulers, credits >= self.policy.build_floor);
        self.assign_contracts(&mut round, &haulers);
        let trade_open = credits >= self.policy.trade_floor;
        round.assign_trades(&haulers, trade_open);

        for agent in haulers {
            if !round.is_planned(&agent.symbol) {
                let reason = if trade_open {
                    AssignmentReason::NoDemand
                } else {
                    AssignmentReason::CapitalGate
                };
                round.plan.insert(agent.symbol.clone(), Objective::Idle, reason);
            }
        }
        round.plan
    }

    fn not_commandable(&self, agent: &Agent) -> Option<AssignmentReason> {
        match agent.capabilities.category {
            AgentCategory::Disabled | AgentCategory::Drone => {
                return Some(AssignmentReason::NotCommandable)
            }
            AgentCategory::Hauler | AgentCategory::Probe => {}
        }
        if matches!(agent.status, AgentStatus::Stopping | AgentStatus::Crashed) {
            return Some(AssignmentReason::NotCommandable);
        }
        if self.max_crashes > 0 && agent.crash_count >= self.max_crashes {
            return Some(AssignmentReason::CrashLimit);
        }
        None
    }

    fn assign_builds(&self, round: &mut Round<'_>, haulers: &[&Agent], open_new: bool) {
        let snapshot = round.snapshot;
        for build in snapshot.aggregates.builds.values() {
            if !build.is_unmet() {
                continue;
            }
            let eligible: Vec<&Agent> = haulers
                .iter()
                .copied()
                .filter(|a| a.capabilities.capacity_class == CapacityClass::High)
                .collect();
            let mut lanes: BTreeSet<u32> = round
                .pinned_lanes(ObjectiveKind::InfrastructureBuild, &build.site)
                .into_iter()
                .map(|(lane, _)| lane)
                .collect();

            for agent in &eligible {
                if let Some(Objective::InfrastructureBuild { site, lane, .. }) = running(agent) {
                    if site == &build.site
                        && *lane < build.required_agents
                        && round.retain(agent)
                    {
                        lanes.insert(*lane);
                    }
                }
            }
            if !open_new {
                continue;
            }
            for agent in eligible {
                if lanes.len() as u32 >= build.required_agents {
                    break;
                }
                if round.is_planned(&agent.symbol) {
                    continue;
                }
                let Some(lane) = free_lane(&lanes, build.required_agents, |lane| {
                    round.is_free_key(ObjectiveKind::InfrastructureBuild, &build.site, lane)
                }) else {
                    break;
                };
                let objective = Objective::InfrastructureBuild {
                    site: build.site.clone(),
                    material: build.material.clone(),
                    lane,
                };
                if round.assign(agent, objective, AssignmentReason::Build) {
                    lanes.insert(lane);
                }
            }
        }
    }

    fn assign_contracts(&self, round: &mut Round<'_>, haulers: &[&Agent]) {
        let cap = self.max_contract_agents;
        let snapshot = round.snapshot;
        for contract in snapshot.aggregates.contracts.values() {
            if !contract.is_open() {
                continue;
            }
            let needed = u64::from(contract.remaining_units);
            let mut covered: u64 = 0;
            let mut lanes: BTreeSet<u32> = BTreeSet::new();
            for (lane, cargo) in round.pinned_lanes(ObjectiveKind::Contract, &contract.contract_id) {
                lanes.insert(lane);
                covered += u64::from(cargo);
            }

            // Holders are visited in ascending symbol; the highest are released first.
            let mut holders: Vec<&Agent> = haulers
                .iter()
                .copied()
                .filter(|a| {
                    matches!(running(a), Some(Objective::Contract { contract_id, .. })
                        if contract_id == &contract.contract_id)
                })
                .collect();
            holders.sort_by(|a, b| a.symbol.cmp(&b.symbol));
            for agent in holders {
                if lanes.len() as u32 >= cap || covered >= needed {
                    break;
                }
                if let Some(Objective::Contract { lane, .. }) = running(agent) {
                    if round.retain(agent) {
                        lanes.insert(*lane);
                        covered += u64::from(agent.capabilities.cargo_capacity);
                    }
                }
            }

            for agent in haulers {
                if lanes.len() as u32 >= cap || covered >= needed {
                    break;
                }
                if round.is_planned(&agent.symbol) {
                    continue;
                }
                let Some(lane) = free_lane(&lanes, cap, |lane| {
                    round.is_free_key(ObjectiveKind::Contract, &contract.contract_id, lane)
                }) else {
                    break;
                };
                let objective = Objective::Contract {
                    contract_id: contract.contract_id.clone(),
                    good: contract.good.clone(),
                    lane,
                };
                if round.assign(agent, objective, AssignmentReason::Contract) {
                    lanes.insert(lane);
                    covered += u64::from(agent.capabilities.cargo_capacity);
                }
            }
        }
    }
}

/// Mutable working state of one `decide` call.
struct Round<'a> {
    snapshot: &'a FleetSnapshot,
    plan: AssignmentPlan,
    reserved: HashSet<ObjectiveKey>,
}

impl<'a> Round<'a> {
    fn is_planned(&self, agent: &AgentSymbol) -> bool {
        self.plan.assignments.contains_key(agent)
    }

    fn is_free_key(&self, kind: ObjectiveKind, target: &str, lane: u32) -> bool {
        !self.reserved.contains(&ObjectiveKey {
            kind,
            target: target.to_string(),
            lane,
        })
    }

    /// Lanes of `(kind, target)` taken by pins, with the pinned agent's cargo.
    fn pinned_lanes(&self, kind: ObjectiveKind, target: &str) -> Vec<(u32, u32)> {
        self.plan
            .assignments
            .iter()
            .filter(|(_, planned)| planned.reason == AssignmentReason::Pinned)
            .filter_map(|(symbol, planned)| {
                let key = planned.objective.key()?;
                if key.kind != kind || key.target != target {
                    return None;
                }
                let cargo = self
                    .snapshot
                    .agents
                    .get(symbol)
                    .map_or(0, |a| a.capabilities.cargo_capacity);
                Some((key.lane, cargo))
            })
            .collect()
    }

    /// Plan `objective` for `agent` unless its identity is already taken.
    fn assign(&mut self, agent: &Agent, objective: Objective, reason: AssignmentReason) -> bool {
        if self.is_planned(&agent.symbol) {
            return false;
        }
        if let Some(key) = objective.key() {
            if !self.reserved.insert(key) {
                return false;
            }
        }
        self.plan.insert(agent.symbol.clone(), objective, reason);
        true
    }

    /// Keep a running agent on its current objective.
    fn retain(&mut self, agent: &Agent) -> bool {
        match running(agent) {
            Some(objective) => {
                let objective = objective.clone();
                self.assign(agent, objective, AssignmentReason::Retained)
            }
            None => false,
        }
    }

    fn apply_pins(&mut self) {
        let snapshot = self.snapshot;
        for (symbol, objective) in &snapshot.pins {
            let Some(agent) = snapshot.agents.get(symbol) else {
                continue;
            };
            if agent.capabilities.category == AgentCategory::Disabled {
                continue;
            }
            if !self.assign(agent, objective.clone(), AssignmentReason::Pinned) {
                // Another pin already claimed this identity.
                self.plan
                    .insert(symbol.clone(), Objective::Idle, AssignmentReason::Pinned);
            }
        }
    }

    fn assign_probes(&mut self, probes: &[&Agent]) {
        let snapshot = self.snapshot;
        let systems: BTreeSet<&str> = snapshot
            .aggregates
            .intel
            .keys()
            .map(String::as_str)
            .chain(snapshot.agents.values().map(|a| a.system.as_str()))
            .collect();

        for agent in probes {
            if let Some(Objective::ResourceScan { system }) = running(agent) {
                if systems.contains(system.as_str()) {
                    self.retain(agent);
                }
            }
        }
        for agent in probes {
            if self.is_planned(&agent.symbol) {
                continue;
            }
            let free = |s: &str| self.is_free_key(ObjectiveKind::ResourceScan, s, 0);
            let home = agent.system.as_str();
            let target = if systems.contains(home) && free(home) {
                Some(home.to_string())
            } else {
                systems.iter().copied().find(|&s| free(s)).map(str::to_string)
            };
            match target {
                Some(system) => {
                    self.assign(agent, Objective::ResourceScan { system }, AssignmentReason::Scan);
                }
                None => {
                    self.plan
                        .insert(agent.symbol.clone(), Objective::Idle, AssignmentReason::NoDemand);
                }
            }
        }
    }

    fn assign_trades(&mut self, haulers: &[&Agent], open_new: bool) {
        let snapshot = self.snapshot;
        let mut routes: Vec<&TradeRoute> = snapshot
            .aggregates
            .routes()
            .filter(|r| r.profit_per_trip > 0)
            .collect();
        routes.sort_by(|a, b| {
            b.profit_per_trip
                .cmp(&a.profit_per_trip)
                .then_with(|| a.id.cmp(&b.id))
        });

        for agent in haulers {
            if let Some(Objective::Trade { route_id, .. }) = running(agent) {
                if routes.iter().any(|r| &r.id == route_id) {
                    self.retain(agent);
                }
            }
        }
        if !open_new {
            return;
        }
        for agent in haulers {
            if self.is_planned(&agent.symbol) {
                continue;
            }
            let best = routes.iter().find(|r| {
                r.system == agent.system && self.is_free_key(ObjectiveKind::Trade, &r.id, 0)
            });
            if let Some(route) = best {
                let objective = Objective::Trade {
                    route_id: route.id.clone(),
                    good: route.good.clone(),
                    source: route.source.clone(),
                    destination: route.destination.clone(),
                };
                self.assign(agent, objective, AssignmentReason::Trade);
            }
        }
    }
}

/// The objective a RUNNING agent currently holds.
fn running(agent: &Agent) -> Option<&Objective> {
    if agent.status == AgentStatus::Running {
        agent.assignment.as_ref()
    } else {
        None
    }
}

/// Smallest lane below `limit` not in `used` that passes `is_free`.
fn free_lane(used: &BTreeSet<u32>, limit: u32, is_free: impl Fn(u32) -> bool) -> Option<u32> {
    (0..limit).find(|lane| !used.contains(lane) && is_free(*lane))
}
