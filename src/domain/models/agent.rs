//! Agent domain model.
//!
//! An agent is one controllable fleet unit. Its lifecycle status and current
//! assignment are owned by the fleet state; running tasks never touch them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::objective::Objective;

/// Unique agent identity (the remote service's ship symbol).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentSymbol(String);

impl AgentSymbol {
    /// Symbols are case-insensitive and stored upper-case.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentSymbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Agent lifecycle status.
///
/// ```text
/// Unassigned -> Running -> Stopping -> Unassigned
///                       -> Crashed  -> Unassigned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Unassigned,
    Running,
    Stopping,
    Crashed,
}

impl AgentStatus {
    /// Whether an agent in this status must hold an assignment.
    pub fn holds_assignment(self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unassigned => "unassigned",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Functional class of an agent, used to route it through the strategy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCategory {
    /// Crewed cargo vessel: builds, contracts, trade.
    Hauler,
    /// Uncrewed scout: resource scans.
    Probe,
    /// Mining drone managed outside the commander.
    Drone,
    /// Known-broken unit that must never be commanded.
    Disabled,
}

impl fmt::Display for AgentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hauler => "hauler",
            Self::Probe => "probe",
            Self::Drone => "drone",
            Self::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Cargo capacity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityClass {
    Low,
    High,
}

/// Capability tags consulted when filtering eligible agents per objective kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub category: AgentCategory,
    pub capacity_class: CapacityClass,
    #[serde(default)]
    pub cargo_capacity: u32,
    #[serde(default = "default_crewed")]
    pub crewed: bool,
    #[serde(default)]
    pub mounts: BTreeSet<String>,
}

const fn default_crewed() -> bool {
    true
}

impl Capabilities {
    /// Crewed hauler with the given hold.
    pub fn hauler(capacity_class: CapacityClass, cargo_capacity: u32) -> Self {
        Self {
            category: AgentCategory::Hauler,
            capacity_class,
            cargo_capacity,
            crewed: true,
            mounts: BTreeSet::new(),
        }
    }

    /// Uncrewed probe with no hold.
    pub fn probe() -> Self {
        Self {
            category: AgentCategory::Probe,
            capacity_class: CapacityClass::Low,
            cargo_capacity: 0,
            crewed: false,
            mounts: BTreeSet::new(),
        }
    }

    pub fn with_category(mut self, category: AgentCategory) -> Self {
        self.category = category;
        self
    }

    /// Eligible for builds, contracts and trade.
    pub fn can_haul(&self) -> bool {
        self.category == AgentCategory::Hauler && self.cargo_capacity > 0
    }
}

/// A fleet unit as recorded in fleet state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub symbol: AgentSymbol,
    /// Home system; trade routes and scans are matched against it.
    pub system: String,
    pub status: AgentStatus,
    /// Present exactly while RUNNING or STOPPING.
    pub assignment: Option<Objective>,
    pub capabilities: Capabilities,
    /// Crashes since the last clean completion.
    pub crash_count: u32,
    /// Reason of the most recent crash.
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// A fresh, unassigned agent.
    pub fn new(symbol: AgentSymbol, system: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            symbol,
            system: system.into(),
            status: AgentStatus::Unassigned,
            assignment: None,
            capabilities,
            crash_count: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// The objective the agent is currently driving, `Idle` when none.
    pub fn current_objective(&self) -> Objective {
        self.assignment.clone().unwrap_or(Objective::Idle)
    }

    pub fn is_free(&self) -> bool {
        self.status == AgentStatus::Unassigned
    }
}
