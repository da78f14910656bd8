//! Flotilla - fleet command and scheduling
//!
//! Flotilla assigns objectives to a fleet of remotely controlled agents,
//! supervises the task driving each agent, and shares one rate-limited
//! remote-call budget between them by priority.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): request scheduler, fleet state, event
//!   bus, strategy engine, task supervisor and the fleet commander
//! - **Adapters** (`adapters`): mission implementations, the HTTP remote
//!   client and the SQLite fleet log
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use flotilla::services::{FleetCommander, FleetState, StrategyEngine};
//!
//! let commander = FleetCommander::new(state, bus, engine, supervisor, config);
//! let handle = commander.handle();
//! tokio::spawn(commander.run(shutdown.clone()));
//! println!("{:?}", handle.snapshot());
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult, MissionError, RemoteError, SchedulerError};
pub use domain::models::{
    Agent, AgentStatus, AgentSymbol, AssignmentPlan, Config, FleetEvent, FleetManifest,
    FleetSnapshot, Objective, ObjectiveKind,
};
pub use domain::ports::{AggregateSource, FleetLog, RemoteClient};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    CommanderHandle, EventBus, FleetCommander, FleetState, Priority, RequestScheduler,
    StrategyEngine, TaskSupervisor,
};
