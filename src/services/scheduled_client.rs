//! Remote client wrapper that routes every call through the request scheduler.
//!
//! Each attempt, retries included, waits for its own permit. Transient
//! failures (remote 429/5xx, permit timeouts) are retried with exponential
//! backoff; cancellation interrupts permit waits and backoff sleeps but never
//! a call already in flight.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::request_scheduler::{Priority, RequestScheduler};
use crate::domain::errors::{MissionError, SchedulerError};
use crate::domain::models::{AgentSymbol, RetryConfig};
use crate::domain::ports::{Endpoint, RemoteClient};

/// Remote client whose every call first takes a scheduler permit.
#[derive(Clone)]
pub struct ScheduledClient {
    scheduler: RequestScheduler,
    remote: Arc<dyn RemoteClient>,
    retry: RetryConfig,
}

impl ScheduledClient {
    pub fn new(scheduler: RequestScheduler, remote: Arc<dyn RemoteClient>, retry: RetryConfig) -> Self {
        Self {
            scheduler,
            remote,
            retry,
        }
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.retry.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.retry.max_backoff_ms))
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Perform one logical remote call on behalf of `agent`.
    pub async fn call(
        &self,
        agent: &AgentSymbol,
        priority: Priority,
        endpoint: &Endpoint,
        payload: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, MissionError> {
        let mut backoff = self.backoff();
        let mut retries = 0u32;
        loop {
            let error = match self.attempt(agent, priority, endpoint, payload.clone(), cancel).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !is_transient(&error) || retries >= self.retry.max_retries {
                if retries > 0 {
                    warn!(agent = %agent, endpoint = %endpoint, retries, error = %error, "remote call gave up");
                }
                return Err(error);
            }
            let Some(delay) = backoff.next_backoff() else {
                return Err(error);
            };
            retries += 1;
            debug!(agent = %agent, endpoint = %endpoint, retries, ?delay, error = %error, "retrying remote call");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(MissionError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        agent: &AgentSymbol,
        priority: Priority,
        endpoint: &Endpoint,
        payload: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, MissionError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(MissionError::Cancelled),
            permit = self.scheduler.acquire(priority, agent) => { permit?; }
        }
        // In flight: not interrupted by cancellation.
        Ok(self.remote.call(endpoint, payload).await?)
    }
}

fn is_transient(error: &MissionError) -> bool {
    match error {
        MissionError::Remote(err) => err.is_transient(),
        MissionError::Scheduler(SchedulerError::Timeout { .. }) => true,
        _ => false,
    }
}
