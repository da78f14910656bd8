//! Service layer: the scheduling and command machinery of the fleet.
//!
//! Dependencies flow one way: missions call out through the
//! [`ScheduledClient`], report through the [`EventBus`], and the
//! [`FleetCommander`] is the only writer of [`FleetState`].

pub mod event_bus;
pub mod fleet_commander;
pub mod fleet_state;
pub mod mission;
pub mod request_scheduler;
pub mod scheduled_client;
pub mod strategy_engine;
pub mod task_supervisor;

pub use event_bus::{EventBus, EventBusConfig, EventEmitter, EventPublisher, SharedEventBus};
pub use fleet_commander::{CommanderHandle, CycleReport, FleetCommander};
pub use fleet_state::FleetState;
pub use mission::{Mission, MissionContext, MissionOutcome, MissionRegistry};
pub use request_scheduler::{Permit, Priority, RequestScheduler};
pub use scheduled_client::ScheduledClient;
pub use strategy_engine::{CapitalPolicy, StrategyEngine};
pub use task_supervisor::{StopOutcome, TaskSupervisor};
