//! Domain layer for the flotilla fleet commander
//!
//! Core fleet models, errors and the ports adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult, MissionError, RemoteError, SchedulerError};
