//! Objective (mission) domain model.
//!
//! An objective is immutable once assigned; retasking is always a stop of the
//! old objective followed by a start of the new one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported objective kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    Trade,
    ResourceScan,
    Contract,
    InfrastructureBuild,
    Idle,
}

impl ObjectiveKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::ResourceScan => "scan",
            Self::Contract => "contract",
            Self::InfrastructureBuild => "build",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for ObjectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectiveKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trade" => Ok(Self::Trade),
            "scan" | "resource_scan" => Ok(Self::ResourceScan),
            "contract" => Ok(Self::Contract),
            "build" | "gate_build" | "infrastructure_build" => Ok(Self::InfrastructureBuild),
            "idle" => Ok(Self::Idle),
            other => Err(format!("unknown objective kind '{other}'")),
        }
    }
}

/// A runnable unit of work with the parameters its mission needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Objective {
    Trade {
        route_id: String,
        good: String,
        source: String,
        destination: String,
    },
    ResourceScan {
        system: String,
    },
    Contract {
        contract_id: String,
        good: String,
        lane: u32,
    },
    InfrastructureBuild {
        site: String,
        material: String,
        lane: u32,
    },
    Idle,
}

impl Objective {
    pub fn kind(&self) -> ObjectiveKind {
        match self {
            Self::Trade { .. } => ObjectiveKind::Trade,
            Self::ResourceScan { .. } => ObjectiveKind::ResourceScan,
            Self::Contract { .. } => ObjectiveKind::Contract,
            Self::InfrastructureBuild { .. } => ObjectiveKind::InfrastructureBuild,
            Self::Idle => ObjectiveKind::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Instance identity; no two active agents may share one.
    ///
    /// Returns `None` for `Idle`, which any number of agents may hold.
    pub fn key(&self) -> Option<ObjectiveKey> {
        let (target, lane) = match self {
            Self::Trade { route_id, .. } => (route_id.clone(), 0),
            Self::ResourceScan { system } => (system.clone(), 0),
            Self::Contract { contract_id, lane, .. } => (contract_id.clone(), *lane),
            Self::InfrastructureBuild { site, lane, .. } => (site.clone(), *lane),
            Self::Idle => return None,
        };
        Some(ObjectiveKey {
            kind: self.kind(),
            target,
            lane,
        })
    }

    /// The contract, site, route or system this objective works on.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Trade { route_id, .. } => Some(route_id),
            Self::ResourceScan { system } => Some(system),
            Self::Contract { contract_id, .. } => Some(contract_id),
            Self::InfrastructureBuild { site, .. } => Some(site),
            Self::Idle => None,
        }
    }

    /// Capital-intensive objectives are withheld below the build floor.
    pub fn is_capital_intensive(&self) -> bool {
        matches!(self, Self::InfrastructureBuild { .. })
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key() {
            Some(key) => write!(f, "{key}"),
            None => f.write_str("idle"),
        }
    }
}

/// Identity of an objective instance: `(kind, target, lane)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectiveKey {
    pub kind: ObjectiveKind,
    pub target: String,
    pub lane: u32,
}

impl fmt::Display for ObjectiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lane == 0 {
            write!(f, "{}:{}", self.kind, self.target)
        } else {
            write!(f, "{}:{}#{}", self.kind, self.target, self.lane)
        }
    }
}

/// Operator-facing objective reference, e.g. `contract:CT-7` or `idle`.
///
/// Resolved against fleet state into a full [`Objective`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveRequest {
    pub kind: ObjectiveKind,
    pub target: Option<String>,
}

impl ObjectiveRequest {
    pub fn idle() -> Self {
        Self {
            kind: ObjectiveKind::Idle,
            target: None,
        }
    }
}

impl FromStr for ObjectiveRequest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, target) = match s.split_once(':') {
            Some((kind, target)) => (kind, Some(target.trim().to_string())),
            None => (s, None),
        };
        let kind: ObjectiveKind = kind.trim().parse()?;
        match (kind, &target) {
            (ObjectiveKind::Idle, _) => Ok(Self::idle()),
            (_, Some(t)) if !t.is_empty() => Ok(Self { kind, target }),
            _ => Err(format!("objective '{kind}' requires a target (e.g. {kind}:ID)")),
        }
    }
}

impl fmt::Display for ObjectiveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(t) => write!(f, "{}:{}", self.kind, t),
            None => write!(f, "{}", self.kind),
        }
    }
}
