use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::DomainResult;
use crate::domain::models::AgentSymbol;

/// One append-only durable record, keyed by (timestamp, agent, kind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetLogRecord {
    pub timestamp: DateTime<Utc>,
    pub agent: Option<AgentSymbol>,
    /// `plan_change` or an event kind such as `objective_completed`.
    pub kind: String,
    /// Event payload or plan entry as JSON.
    pub detail: Value,
}

impl FleetLogRecord {
    pub fn new(agent: Option<AgentSymbol>, kind: impl Into<String>, detail: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            agent,
            kind: kind.into(),
            detail,
        }
    }
}

/// Durable log of plan changes and terminal objective outcomes.
#[async_trait]
pub trait FleetLog: Send + Sync {
    async fn append(&self, record: &FleetLogRecord) -> DomainResult<()>;

    /// Most recent records first.
    async fn recent(&self, limit: usize) -> DomainResult<Vec<FleetLogRecord>>;
}
