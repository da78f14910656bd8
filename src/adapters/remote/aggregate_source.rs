//! Periodic credit refresh from the remote agent record.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::adapters::missions::field;
use crate::domain::errors::MissionError;
use crate::domain::models::{AgentSymbol, AggregateDelta};
use crate::domain::ports::{AggregateSource, Endpoint};
use crate::services::request_scheduler::Priority;
use crate::services::scheduled_client::ScheduledClient;

/// Reads `my/agent` at background priority.
pub struct RemoteAggregateSource {
    client: ScheduledClient,
    /// Requester identity the scheduler attributes the call to.
    requester: AgentSymbol,
}

impl RemoteAggregateSource {
    /// Read aggregates through `client` at background priority.
    pub fn new(client: ScheduledClient) -> Self {
        Self {
            client,
            requester: AgentSymbol::new("COMMANDER"),
        }
    }
}

#[async_trait]
impl AggregateSource for RemoteAggregateSource {
    async fn refresh(&self) -> Result<Vec<AggregateDelta>, MissionError> {
        let response = self
            .client
            .call(
                &self.requester,
                Priority::Background,
                &Endpoint::get("my/agent"),
                None,
                &CancellationToken::new(),
            )
            .await?;
        let credits = field(&response, "/data/credits")?
            .as_i64()
            .ok_or_else(|| MissionError::Protocol("credits is not an integer".to_string()))?;
        Ok(vec![AggregateDelta::SetCredits(credits)])
    }
}
