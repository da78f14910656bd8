use async_trait::async_trait;

use crate::domain::errors::MissionError;
use crate::domain::models::AggregateDelta;

/// Source of externally changed aggregates, polled on the commander's
/// re-evaluation timer.
#[async_trait]
pub trait AggregateSource: Send + Sync {
    async fn refresh(&self) -> Result<Vec<AggregateDelta>, MissionError>;
}
