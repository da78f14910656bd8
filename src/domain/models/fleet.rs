//! Fleet snapshot, aggregates and the mutations that move between snapshots.
//!
//! A [`FleetSnapshot`] is an immutable value once published. The fleet state
//! service clones it, applies mutations to the clone, checks invariants and
//! publishes the result; any error leaves the published snapshot untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::agent::{Agent, AgentStatus, AgentSymbol};
use super::objective::{Objective, ObjectiveKey, ObjectiveKind, ObjectiveRequest};
use crate::domain::errors::{DomainError, DomainResult};

/// An accepted contract with outstanding deliverables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDemand {
    /// Remote contract identifier.
    pub contract_id: String,
    pub good: String,
    pub remaining_units: u32,
    /// Only accepted contracts are worked.
    #[serde(default = "default_accepted")]
    pub accepted: bool,
}

const fn default_accepted() -> bool {
    true
}

impl ContractDemand {
    /// Accepted and not yet fulfilled.
    pub fn is_open(&self) -> bool {
        self.accepted && self.remaining_units > 0
    }
}

/// An infrastructure build site still needing materials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDemand {
    /// Waypoint of the construction site.
    pub site: String,
    pub material: String,
    pub remaining_units: u32,
    /// Haulers the site can use at once.
    #[serde(default = "default_required_agents")]
    pub required_agents: u32,
}

const fn default_required_agents() -> u32 {
    1
}

impl BuildDemand {
    pub fn is_unmet(&self) -> bool {
        self.remaining_units > 0
    }
}

/// A known trade opportunity inside one system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRoute {
    pub id: String,
    pub system: String,
    pub good: String,
    pub source: String,
    pub destination: String,
    /// Expected credits per round trip; may be negative.
    pub profit_per_trip: i64,
}

/// Discovered intel for one system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemIntel {
    pub symbol: String,
    #[serde(default)]
    pub routes: BTreeMap<String, TradeRoute>,
    /// A probe has surveyed the system.
    #[serde(default)]
    pub scanned: bool,
}

/// Fleet-wide aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetAggregates {
    /// Treasury balance.
    pub credits: i64,
    /// Keyed by contract id.
    #[serde(default)]
    pub contracts: BTreeMap<String, ContractDemand>,
    /// Keyed by site.
    #[serde(default)]
    pub builds: BTreeMap<String, BuildDemand>,
    /// Keyed by system symbol.
    #[serde(default)]
    pub intel: BTreeMap<String, SystemIntel>,
}

impl FleetAggregates {
    /// All known routes across systems.
    pub fn routes(&self) -> impl Iterator<Item = &TradeRoute> {
        self.intel.values().flat_map(|i| i.routes.values())
    }

    pub fn find_route(&self, route_id: &str) -> Option<&TradeRoute> {
        self.routes().find(|r| r.id == route_id)
    }

    fn apply(&mut self, delta: &AggregateDelta) {
        match delta {
            AggregateDelta::SetCredits(credits) => self.credits = *credits,
            AggregateDelta::AdjustCredits(by) => self.credits = self.credits.saturating_add(*by),
            AggregateDelta::UpsertContract(contract) => {
                self.contracts
                    .insert(contract.contract_id.clone(), contract.clone());
            }
            AggregateDelta::ContractDelivered { contract_id, units } => {
                if let Some(c) = self.contracts.get_mut(contract_id) {
                    c.remaining_units = c.remaining_units.saturating_sub(*units);
                }
            }
            AggregateDelta::UpsertBuild(build) => {
                self.builds.insert(build.site.clone(), build.clone());
            }
            AggregateDelta::BuildDelivered { site, units } => {
                if let Some(b) = self.builds.get_mut(site) {
                    b.remaining_units = b.remaining_units.saturating_sub(*units);
                }
            }
            AggregateDelta::RecordIntel { system, routes } => {
                let intel = self
                    .intel
                    .entry(system.clone())
                    .or_insert_with(|| SystemIntel {
                        symbol: system.clone(),
                        ..SystemIntel::default()
                    });
                intel.scanned = true;
                for route in routes {
                    intel.routes.insert(route.id.clone(), route.clone());
                }
            }
            AggregateDelta::RetireRoute { route_id } => {
                for intel in self.intel.values_mut() {
                    intel.routes.remove(route_id);
                }
            }
        }
    }
}

/// A change to fleet-wide aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AggregateDelta {
    SetCredits(i64),
    AdjustCredits(i64),
    UpsertContract(ContractDemand),
    ContractDelivered { contract_id: String, units: u32 },
    UpsertBuild(BuildDemand),
    BuildDelivered { site: String, units: u32 },
    RecordIntel { system: String, routes: Vec<TradeRoute> },
    RetireRoute { route_id: String },
}

/// A single fleet state mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum FleetMutation {
    /// Add an agent, or replace its record and reset its crash history.
    Register(Agent),
    /// UNASSIGNED -> RUNNING with the given objective.
    Assign(AgentSymbol, Objective),
    /// RUNNING -> STOPPING; the assignment is kept until the task is gone.
    Unassign(AgentSymbol),
    /// RUNNING | STOPPING -> CRASHED; clears the assignment.
    MarkCrashed(AgentSymbol, String),
    /// Any status -> UNASSIGNED. `clean` resets the crash counter.
    MarkIdle { agent: AgentSymbol, clean: bool },
    /// Forget crash history without touching the lifecycle.
    ResetCrashes(AgentSymbol),
    UpdateAggregate(AggregateDelta),
    /// Operator override consulted by the strategy engine.
    Pin(AgentSymbol, Objective),
    ClearPin(AgentSymbol),
}

impl FleetMutation {
    /// Return `agent` to UNASSIGNED keeping its crash history.
    pub fn mark_idle(agent: AgentSymbol) -> Self {
        Self::MarkIdle { agent, clean: false }
    }
}

/// Immutable, internally consistent view of the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    /// Bumped once per successful publish.
    pub version: u64,
    /// When this version was published.
    pub taken_at: DateTime<Utc>,
    pub agents: BTreeMap<AgentSymbol, Agent>,
    pub aggregates: FleetAggregates,
    /// Operator pins; survive until cleared or the agent crashes.
    #[serde(default)]
    pub pins: BTreeMap<AgentSymbol, Objective>,
}

impl Default for FleetSnapshot {
    fn default() -> Self {
        Self::new(Vec::new(), FleetAggregates::default())
    }
}

impl FleetSnapshot {
    /// Version zero with every agent as given and no pins.
    pub fn new(agents: impl IntoIterator<Item = Agent>, aggregates: FleetAggregates) -> Self {
        Self {
            version: 0,
            taken_at: Utc::now(),
            agents: agents.into_iter().map(|a| (a.symbol.clone(), a)).collect(),
            aggregates,
            pins: BTreeMap::new(),
        }
    }

    /// Look up an agent, failing with `AgentNotFound`.
    pub fn agent(&self, symbol: &AgentSymbol) -> DomainResult<&Agent> {
        self.agents
            .get(symbol)
            .ok_or_else(|| DomainError::AgentNotFound(symbol.to_string()))
    }

    fn agent_mut(&mut self, symbol: &AgentSymbol) -> DomainResult<&mut Agent> {
        self.agents
            .get_mut(symbol)
            .ok_or_else(|| DomainError::AgentNotFound(symbol.to_string()))
    }

    /// Who currently holds an objective identity, if anyone.
    pub fn holder_of(&self, key: &ObjectiveKey) -> Option<&AgentSymbol> {
        self.agents
            .values()
            .find(|a| {
                a.status.holds_assignment()
                    && a.assignment.as_ref().and_then(Objective::key).as_ref() == Some(key)
            })
            .map(|a| &a.symbol)
    }

    pub fn count_in(&self, status: AgentStatus) -> usize {
        self.agents.values().filter(|a| a.status == status).count()
    }

    /// Apply one mutation in place. On error `self` may be partially
    /// modified; callers apply to a scratch copy.
    pub fn apply(&mut self, mutation: &FleetMutation) -> DomainResult<()> {
        let now = Utc::now();
        match mutation {
            FleetMutation::Register(agent) => {
                let mut agent = agent.clone();
                if let Some(existing) = self.agents.get(&agent.symbol) {
                    // Keep the lifecycle of a live agent; only its description changes.
                    agent.status = existing.status;
                    agent.assignment = existing.assignment.clone();
                }
                agent.crash_count = 0;
                agent.updated_at = now;
                self.agents.insert(agent.symbol.clone(), agent);
            }
            FleetMutation::Assign(symbol, objective) => {
                let key = objective.key().ok_or_else(|| {
                    DomainError::ValidationFailed(format!("cannot assign idle to {symbol}"))
                })?;
                if let Some(holder) = self.holder_of(&key) {
                    return Err(DomainError::DoubleAssignment {
                        objective: key.to_string(),
                        holder: holder.to_string(),
                    });
                }
                let agent = self.agent_mut(symbol)?;
                transition(agent, &[AgentStatus::Unassigned], AgentStatus::Running)?;
                agent.assignment = Some(objective.clone());
                agent.updated_at = now;
            }
            FleetMutation::Unassign(symbol) => {
                let agent = self.agent_mut(symbol)?;
                transition(agent, &[AgentStatus::Running], AgentStatus::Stopping)?;
                agent.updated_at = now;
            }
            FleetMutation::MarkCrashed(symbol, reason) => {
                let agent = self.agent_mut(symbol)?;
                transition(
                    agent,
                    &[AgentStatus::Running, AgentStatus::Stopping],
                    AgentStatus::Crashed,
                )?;
                agent.assignment = None;
                agent.crash_count = agent.crash_count.saturating_add(1);
                agent.last_error = Some(reason.clone());
                agent.updated_at = now;
                self.pins.remove(symbol);
            }
            FleetMutation::MarkIdle { agent: symbol, clean } => {
                let agent = self.agent_mut(symbol)?;
                agent.status = AgentStatus::Unassigned;
                agent.assignment = None;
                if *clean {
                    agent.crash_count = 0;
                    agent.last_error = None;
                }
                agent.updated_at = now;
            }
            FleetMutation::ResetCrashes(symbol) => {
                let agent = self.agent_mut(symbol)?;
                agent.crash_count = 0;
                agent.last_error = None;
            }
            FleetMutation::UpdateAggregate(delta) => self.aggregates.apply(delta),
            FleetMutation::Pin(symbol, objective) => {
                self.agent(symbol)?;
                self.pins.insert(symbol.clone(), objective.clone());
            }
            FleetMutation::ClearPin(symbol) => {
                self.pins.remove(symbol);
            }
        }
        Ok(())
    }

    /// Check the snapshot-level invariants:
    /// assignment is present iff status is RUNNING or STOPPING, and no two
    /// holding agents share an objective identity.
    pub fn check_invariants(&self) -> DomainResult<()> {
        let mut seen: HashMap<ObjectiveKey, &AgentSymbol> = HashMap::new();
        for agent in self.agents.values() {
            let holds = agent.status.holds_assignment();
            match (&agent.assignment, holds) {
                (Some(_), false) | (None, true) => {
                    return Err(DomainError::InvariantViolation(format!(
                        "agent {} is {} with assignment {:?}",
                        agent.symbol, agent.status, agent.assignment
                    )));
                }
                (Some(Objective::Idle), true) => {
                    return Err(DomainError::InvariantViolation(format!(
                        "agent {} holds an idle assignment",
                        agent.symbol
                    )));
                }
                _ => {}
            }
            if let Some(key) = agent.assignment.as_ref().and_then(Objective::key) {
                if let Some(other) = seen.insert(key.clone(), &agent.symbol) {
                    return Err(DomainError::DoubleAssignment {
                        objective: key.to_string(),
                        holder: other.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolve an operator reference such as `contract:CT-7` into a full
    /// objective using the known aggregates.
    ///
    /// Lane 0 is used; a pin is an explicit single-agent instruction.
    pub fn resolve(&self, request: &ObjectiveRequest) -> DomainResult<Objective> {
        let target = || {
            request.target.clone().ok_or_else(|| {
                DomainError::ValidationFailed(format!("objective '{}' requires a target", request.kind))
            })
        };
        match request.kind {
            ObjectiveKind::Idle => Ok(Objective::Idle),
            ObjectiveKind::ResourceScan => Ok(Objective::ResourceScan { system: target()? }),
            ObjectiveKind::Contract => {
                let id = target()?;
                let contract = self.aggregates.contracts.get(&id).ok_or_else(|| {
                    DomainError::ValidationFailed(format!("unknown contract '{id}'"))
                })?;
                Ok(Objective::Contract {
                    contract_id: id,
                    good: contract.good.clone(),
                    lane: 0,
                })
            }
            ObjectiveKind::InfrastructureBuild => {
                let site = target()?;
                let build = self.aggregates.builds.get(&site).ok_or_else(|| {
                    DomainError::ValidationFailed(format!("unknown build site '{site}'"))
                })?;
                Ok(Objective::InfrastructureBuild {
                    material: build.material.clone(),
                    site,
                    lane: 0,
                })
            }
            ObjectiveKind::Trade => {
                let id = target()?;
                let route = self.aggregates.find_route(&id).ok_or_else(|| {
                    DomainError::ValidationFailed(format!("unknown trade route '{id}'"))
                })?;
                Ok(Objective::Trade {
                    route_id: route.id.clone(),
                    good: route.good.clone(),
                    source: route.source.clone(),
                    destination: route.destination.clone(),
                })
            }
        }
    }
}

fn transition(agent: &mut Agent, from: &[AgentStatus], to: AgentStatus) -> DomainResult<()> {
    if !from.contains(&agent.status) {
        return Err(DomainError::InvalidStateTransition {
            agent: agent.symbol.to_string(),
            from: agent.status.to_string(),
            to: to.to_string(),
        });
    }
    agent.status = to;
    Ok(())
}
