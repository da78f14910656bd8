//! Mission adapter contract.
//!
//! A mission is the long-running behavior behind one objective kind. The
//! supervisor runs it with a [`MissionContext`]; every remote call goes
//! through the context so it is scheduled, retried and attributed to the
//! agent.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::event_bus::EventEmitter;
use super::request_scheduler::Priority;
use super::scheduled_client::ScheduledClient;
use crate::domain::errors::MissionError;
use crate::domain::models::{Agent, AgentSymbol, EventPayload, Objective, ObjectiveKind};
use crate::domain::ports::Endpoint;

/// How a mission ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissionOutcome {
    Completed,
    Failed(String),
    /// Stopped on request; produces no event.
    Cancelled,
}

impl From<MissionError> for MissionOutcome {
    fn from(err: MissionError) -> Self {
        match err {
            MissionError::Cancelled => Self::Cancelled,
            other => Self::Failed(other.to_string()),
        }
    }
}

impl<T> From<Result<T, MissionError>> for MissionOutcome {
    fn from(result: Result<T, MissionError>) -> Self {
        match result {
            Ok(_) => Self::Completed,
            Err(err) => err.into(),
        }
    }
}

/// Everything a running mission may touch.
#[derive(Clone)]
pub struct MissionContext {
    /// Agent record as of task start.
    pub agent: Agent,
    pub objective: Objective,
    /// Scheduled access to the shared remote budget.
    pub client: ScheduledClient,
    pub events: EventEmitter,
    /// Fires when the supervisor asks the task to stop.
    pub cancel: CancellationToken,
}

impl MissionContext {
    pub fn symbol(&self) -> &AgentSymbol {
        &self.agent.symbol
    }

    /// One scheduled remote call on behalf of this agent.
    pub async fn call(
        &self,
        priority: Priority,
        endpoint: Endpoint,
        payload: Option<Value>,
    ) -> Result<Value, MissionError> {
        self.client
            .call(&self.agent.symbol, priority, &endpoint, payload, &self.cancel)
            .await
    }

    /// Publish a milestone; dropped if a stop is requested while the bus
    /// is full.
    pub async fn emit(&self, payload: EventPayload) {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {}
            _ = self.events.emit(payload) => {}
        }
    }

    /// Fails with `Cancelled` once a stop has been requested.
    pub fn checkpoint(&self) -> Result<(), MissionError> {
        if self.cancel.is_cancelled() {
            Err(MissionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep unless cancelled first.
    pub async fn pause(&self, duration: Duration) -> Result<(), MissionError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(MissionError::Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Behavior that carries out one kind of objective.
#[async_trait]
pub trait Mission: Send + Sync {
    /// Objective kind this mission handles.
    fn kind(&self) -> ObjectiveKind;

    /// Work the objective until it ends or `ctx.cancel` fires.
    async fn run(&self, ctx: MissionContext) -> MissionOutcome;
}

/// Missions by objective kind.
#[derive(Clone, Default)]
pub struct MissionRegistry {
    missions: HashMap<ObjectiveKind, Arc<dyn Mission>>,
}

impl MissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mission, replacing any previous one of the same kind.
    pub fn register(&mut self, mission: Arc<dyn Mission>) {
        self.missions.insert(mission.kind(), mission);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, mission: Arc<dyn Mission>) -> Self {
        self.register(mission);
        self
    }

    pub fn get(&self, kind: ObjectiveKind) -> Option<Arc<dyn Mission>> {
        self.missions.get(&kind).cloned()
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<ObjectiveKind> {
        let mut kinds: Vec<_> = self.missions.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl fmt::Debug for MissionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MissionRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
