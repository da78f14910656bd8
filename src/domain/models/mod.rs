pub mod agent;
pub mod config;
pub mod event;
pub mod fleet;
pub mod manifest;
pub mod objective;
pub mod plan;

pub use agent::{Agent, AgentCategory, AgentStatus, AgentSymbol, Capabilities, CapacityClass};
pub use config::{
    CommanderConfig, Config, DatabaseConfig, LoggingConfig, RemoteConfig, RetryConfig,
    SchedulerConfig, StrategyConfig, SupervisorConfig,
};
pub use event::{DeliveryTarget, EventKind, EventPayload, FleetEvent};
pub use fleet::{
    AggregateDelta, BuildDemand, ContractDemand, FleetAggregates, FleetMutation, FleetSnapshot,
    SystemIntel, TradeRoute,
};
pub use manifest::{AgentEntry, FleetManifest};
pub use objective::{Objective, ObjectiveKey, ObjectiveKind, ObjectiveRequest};
pub use plan::{AssignmentPlan, AssignmentReason, Instruction, PlannedAssignment};
