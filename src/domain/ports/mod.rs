//! Port trait definitions (Hexagonal Architecture)
//!
//! Interfaces the services consume and adapters implement:
//! - RemoteClient: remote fleet service calls
//! - FleetLog: durable plan/outcome log
//! - AggregateSource: external aggregate refresh

pub mod aggregate_source;
pub mod fleet_log;
pub mod null_fleet_log;
pub mod remote_client;

pub use aggregate_source::AggregateSource;
pub use fleet_log::{FleetLog, FleetLogRecord};
pub use null_fleet_log::NullFleetLog;
pub use remote_client::{Endpoint, HttpMethod, RemoteClient};
