//! Adapters for external systems: the remote fleet API, mission
//! implementations and the SQLite fleet log.

pub mod missions;
pub mod remote;
pub mod sqlite;
