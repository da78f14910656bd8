//! Fleet manifest: the local registry of agents plus the initial aggregates
//! the commander starts from.
//!
//! ```yaml
//! credits: 420000
//! agents:
//!   - symbol: HAULER-1
//!     system: X1-AB12
//!     category: hauler
//!     capacity_class: high
//!     cargo_capacity: 120
//! builds:
//!   - site: X1-AB12-GATE
//!     material: FAB_MATS
//!     remaining_units: 1600
//!     required_agents: 2
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use super::agent::{Agent, AgentCategory, AgentSymbol, Capabilities, CapacityClass};
use super::fleet::{BuildDemand, ContractDemand, FleetAggregates, FleetSnapshot, SystemIntel, TradeRoute};

/// One agent entry in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub symbol: String,
    pub system: String,
    pub category: AgentCategory,
    #[serde(default = "default_capacity_class")]
    pub capacity_class: CapacityClass,
    #[serde(default)]
    pub cargo_capacity: u32,
    /// Defaults to true for haulers, false otherwise.
    #[serde(default)]
    pub crewed: Option<bool>,
    #[serde(default)]
    pub mounts: BTreeSet<String>,
}

const fn default_capacity_class() -> CapacityClass {
    CapacityClass::Low
}

impl AgentEntry {
    pub fn to_agent(&self) -> Agent {
        let capabilities = Capabilities {
            category: self.category,
            capacity_class: self.capacity_class,
            cargo_capacity: self.cargo_capacity,
            crewed: self
                .crewed
                .unwrap_or(self.category == AgentCategory::Hauler),
            mounts: self.mounts.clone(),
        };
        Agent::new(AgentSymbol::new(&self.symbol), &self.system, capabilities)
    }
}

/// The fleet manifest file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetManifest {
    #[serde(default)]
    pub credits: i64,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
    #[serde(default)]
    pub contracts: Vec<ContractDemand>,
    #[serde(default)]
    pub builds: Vec<BuildDemand>,
    #[serde(default)]
    pub routes: Vec<TradeRoute>,
    /// Systems known but not yet scanned.
    #[serde(default)]
    pub systems: Vec<String>,
}

impl FleetManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid manifest: {}", path.display()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Self = serde_yaml::from_str(yaml).context("Failed to parse manifest YAML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.agents {
            let symbol = AgentSymbol::new(&entry.symbol);
            if symbol.as_str().is_empty() {
                anyhow::bail!("agent symbol cannot be empty");
            }
            if !seen.insert(symbol.clone()) {
                anyhow::bail!("duplicate agent symbol: {symbol}");
            }
            if entry.category == AgentCategory::Hauler && entry.cargo_capacity == 0 {
                anyhow::bail!("hauler {symbol} has no cargo capacity");
            }
        }
        let mut route_ids = HashSet::new();
        for route in &self.routes {
            if !route_ids.insert(route.id.as_str()) {
                anyhow::bail!("duplicate trade route id: {}", route.id);
            }
        }
        for build in &self.builds {
            if build.required_agents == 0 {
                anyhow::bail!("build {} requires at least one agent", build.site);
            }
        }
        Ok(())
    }

    pub fn agents(&self) -> Vec<Agent> {
        self.agents.iter().map(AgentEntry::to_agent).collect()
    }

    pub fn aggregates(&self) -> FleetAggregates {
        let mut intel: BTreeMap<String, SystemIntel> = self
            .systems
            .iter()
            .map(|s| {
                (
                    s.clone(),
                    SystemIntel {
                        symbol: s.clone(),
                        ..SystemIntel::default()
                    },
                )
            })
            .collect();
        for route in &self.routes {
            let entry = intel
                .entry(route.system.clone())
                .or_insert_with(|| SystemIntel {
                    symbol: route.system.clone(),
                    ..SystemIntel::default()
                });
            entry.scanned = true;
            entry.routes.insert(route.id.clone(), route.clone());
        }
        FleetAggregates {
            credits: self.credits,
            contracts: self
                .contracts
                .iter()
                .map(|c| (c.contract_id.clone(), c.clone()))
                .collect(),
            builds: self
                .builds
                .iter()
                .map(|b| (b.site.clone(), b.clone()))
                .collect(),
            intel,
        }
    }

    /// Initial fleet snapshot described by this manifest.
    pub fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot::new(self.agents(), self.aggregates())
    }
}
