//! Assignment plans produced by the strategy engine, and the instructions
//! derived from diffing a plan against the current fleet state.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::agent::{AgentStatus, AgentSymbol};
use super::event::EventKind;
use super::fleet::FleetSnapshot;
use super::objective::{Objective, ObjectiveKey};
use crate::domain::errors::{DomainError, DomainResult};

/// Why the engine chose an objective for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentReason {
    Pinned,
    Build,
    Contract,
    Trade,
    Scan,
    /// Kept on its current objective.
    Retained,
    CapitalGate,
    Parked,
    CrashLimit,
    NotCommandable,
    NoDemand,
}

impl AssignmentReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pinned => "pinned",
            Self::Build => "build",
            Self::Contract => "contract",
            Self::Trade => "trade",
            Self::Scan => "scan",
            Self::Retained => "retained",
            Self::CapitalGate => "capital_gate",
            Self::Parked => "parked",
            Self::CrashLimit => "crash_limit",
            Self::NotCommandable => "not_commandable",
            Self::NoDemand => "no_demand",
        }
    }
}

impl fmt::Display for AssignmentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One agent's entry in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAssignment {
    pub objective: Objective,
    /// Recorded in the fleet log on plan changes.
    pub reason: AssignmentReason,
}

/// Desired objective per agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentPlan {
    /// Every agent in the snapshot, idle ones included.
    pub assignments: BTreeMap<AgentSymbol, PlannedAssignment>,
    /// Kind of the event that triggered this evaluation, if any.
    #[serde(default)]
    pub trigger: Option<EventKind>,
}

impl AssignmentPlan {
    /// Set the entry for `agent`, replacing any earlier one.
    pub fn insert(&mut self, agent: AgentSymbol, objective: Objective, reason: AssignmentReason) {
        self.assignments
            .insert(agent, PlannedAssignment { objective, reason });
    }

    pub fn get(&self, agent: &AgentSymbol) -> Option<&PlannedAssignment> {
        self.assignments.get(agent)
    }

    pub fn objective_for(&self, agent: &AgentSymbol) -> Option<&Objective> {
        self.get(agent).map(|p| &p.objective)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Reject plans that reference unknown agents or give one identity to
    /// two agents.
    pub fn validate(&self, snapshot: &FleetSnapshot) -> DomainResult<()> {
        let mut seen: HashMap<ObjectiveKey, &AgentSymbol> = HashMap::new();
        for (agent, planned) in &self.assignments {
            if !snapshot.agents.contains_key(agent) {
                return Err(DomainError::UnknownAgentInPlan(agent.to_string()));
            }
            if let Some(key) = planned.objective.key() {
                if let Some(other) = seen.insert(key.clone(), agent) {
                    return Err(DomainError::DoubleAssignment {
                        objective: key.to_string(),
                        holder: other.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Instructions needed to move `snapshot` to this plan.
    ///
    /// Agents that are STOPPING or CRASHED are in transition and skipped;
    /// the next cycle sees them settled. An empty result means the plan is
    /// already in effect.
    pub fn diff(&self, snapshot: &FleetSnapshot) -> Vec<Instruction> {
        let mut instructions = Vec::new();
        for (agent, planned) in &self.assignments {
            let Some(current) = snapshot.agents.get(agent) else {
                continue;
            };
            let desired = &planned.objective;
            match current.status {
                AgentStatus::Stopping | AgentStatus::Crashed => {}
                AgentStatus::Unassigned => {
                    if !desired.is_idle() {
                        instructions.push(Instruction::Start {
                            agent: agent.clone(),
                            objective: desired.clone(),
                        });
                    }
                }
                AgentStatus::Running => {
                    let held = current.current_objective();
                    if desired.is_idle() {
                        instructions.push(Instruction::Stop {
                            agent: agent.clone(),
                        });
                    } else if &held != desired {
                        instructions.push(Instruction::Retask {
                            agent: agent.clone(),
                            objective: desired.clone(),
                        });
                    }
                }
            }
        }
        instructions
    }
}

/// A supervisor action derived from a plan diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Instruction {
    Start { agent: AgentSymbol, objective: Objective },
    Stop { agent: AgentSymbol },
    /// Stop followed by start of a different objective.
    Retask { agent: AgentSymbol, objective: Objective },
}

impl Instruction {
    pub fn agent(&self) -> &AgentSymbol {
        match self {
            Self::Start { agent, .. } | Self::Stop { agent } | Self::Retask { agent, .. } => agent,
        }
    }

    /// Objective the agent ends up on, `None` for a plain stop.
    pub fn objective(&self) -> Option<&Objective> {
        match self {
            Self::Start { objective, .. } | Self::Retask { objective, .. } => Some(objective),
            Self::Stop { .. } => None,
        }
    }

    /// The agent's current task has to end before anything else happens.
    pub fn stops_first(&self) -> bool {
        matches!(self, Self::Stop { .. } | Self::Retask { .. })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start { agent, objective } => write!(f, "start {agent} -> {objective}"),
            Self::Stop { agent } => write!(f, "stop {agent}"),
            Self::Retask { agent, objective } => write!(f, "retask {agent} -> {objective}"),
        }
    }
}
