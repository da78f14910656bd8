//! SQLite implementation of the fleet log.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::parse_datetime;
use crate::domain::errors::DomainResult;
use crate::domain::models::AgentSymbol;
use crate::domain::ports::{FleetLog, FleetLogRecord};

/// [`FleetLog`] backed by the `fleet_log` table.
#[derive(Clone)]
pub struct SqliteFleetLog {
    pool: SqlitePool,
}

impl SqliteFleetLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Records for one agent, oldest first.
    pub async fn for_agent(&self, agent: &AgentSymbol) -> DomainResult<Vec<FleetLogRecord>> {
        let rows: Vec<FleetLogRow> = sqlx::query_as(
            "SELECT timestamp, agent, kind, detail FROM fleet_log WHERE agent = ? ORDER BY id ASC",
        )
        .bind(agent.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(FleetLogRow::into_record).collect()
    }
}

#[derive(sqlx::FromRow)]
struct FleetLogRow {
    timestamp: String,
    agent: Option<String>,
    kind: String,
    detail: String,
}

impl FleetLogRow {
    fn into_record(self) -> DomainResult<FleetLogRecord> {
        Ok(FleetLogRecord {
            timestamp: parse_datetime(&self.timestamp)?,
            agent: self.agent.map(AgentSymbol::new),
            kind: self.kind,
            detail: serde_json::from_str(&self.detail)?,
        })
    }
}

#[async_trait]
impl FleetLog for SqliteFleetLog {
    async fn append(&self, record: &FleetLogRecord) -> DomainResult<()> {
        sqlx::query("INSERT INTO fleet_log (timestamp, agent, kind, detail) VALUES (?, ?, ?, ?)")
            .bind(record.timestamp.to_rfc3339())
            .bind(record.agent.as_ref().map(AgentSymbol::as_str))
            .bind(&record.kind)
            .bind(serde_json::to_string(&record.detail)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> DomainResult<Vec<FleetLogRecord>> {
        let rows: Vec<FleetLogRow> = sqlx::query_as(
            "SELECT timestamp, agent, kind, detail FROM fleet_log ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(FleetLogRow::into_record).collect()
    }
}
