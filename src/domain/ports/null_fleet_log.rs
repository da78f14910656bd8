//! Null fleet log implementation.
//!
//! Used when the durable log is disabled.

use async_trait::async_trait;

use super::fleet_log::{FleetLog, FleetLogRecord};
use crate::domain::errors::DomainResult;

/// A no-op fleet log that stores nothing.
#[derive(Debug, Clone, Default)]
pub struct NullFleetLog;

impl NullFleetLog {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FleetLog for NullFleetLog {
    async fn append(&self, _record: &FleetLogRecord) -> DomainResult<()> {
        Ok(())
    }

    async fn recent(&self, _limit: usize) -> DomainResult<Vec<FleetLogRecord>> {
        Ok(Vec::new())
    }
}
