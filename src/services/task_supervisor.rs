//! Agent task supervisor.
//!
//! Owns one tokio task per running agent. A task that ends on its own
//! (completion, failure, panic) publishes exactly one terminal event and
//! marks itself finished; the commander then reaps it. A task stopped on
//! request publishes nothing; [`TaskSupervisor::stop`] reports how it ended.

use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use super::event_bus::{EventEmitter, EventPublisher};
use super::mission::{Mission, MissionContext, MissionOutcome, MissionRegistry};
use super::scheduled_client::ScheduledClient;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Agent, AgentSymbol, EventPayload, Objective, SupervisorConfig};

/// How a task run ended, as seen by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TaskExit {
    Completed,
    Failed(String),
    Cancelled,
    Panicked(String),
}

/// Result of a requested stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The task honored cancellation (or had already finished).
    Stopped,
    /// No task was registered for the agent.
    NotRunning,
    /// The task panicked while stopping.
    Crashed(String),
    /// The task did not yield within the stop timeout and was aborted.
    Forced,
}

impl StopOutcome {
    pub fn is_crash(&self) -> bool {
        matches!(self, Self::Crashed(_) | Self::Forced)
    }

    /// Reason to report for a crash outcome.
    pub fn crash_reason(&self) -> Option<String> {
        match self {
            Self::Crashed(reason) => Some(reason.clone()),
            Self::Forced => Some("task did not stop within timeout".to_string()),
            Self::Stopped | Self::NotRunning => None,
        }
    }
}

struct RunningTask {
    objective: Objective,
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
    handle: JoinHandle<TaskExit>,
}

/// Owns one task per running agent and reports how each one ended.
pub struct TaskSupervisor {
    registry: MissionRegistry,
    client: ScheduledClient,
    publisher: EventPublisher,
    stop_timeout: Duration,
    tasks: Mutex<HashMap<AgentSymbol, RunningTask>>,
}

impl TaskSupervisor {
    pub fn new(
        registry: MissionRegistry,
        client: ScheduledClient,
        publisher: EventPublisher,
        config: &SupervisorConfig,
    ) -> Self {
        Self {
            registry,
            client,
            publisher,
            stop_timeout: config.stop_timeout(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<AgentSymbol, RunningTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registry(&self) -> &MissionRegistry {
        &self.registry
    }

    /// Check that `objective` could be started, without starting it.
    pub fn ensure_supported(&self, objective: &Objective) -> DomainResult<()> {
        if self.registry.get(objective.kind()).is_some() {
            Ok(())
        } else {
            Err(DomainError::MissionNotRegistered(objective.kind().to_string()))
        }
    }

    /// Spawn the mission for `objective` on `agent`.
    pub fn start(&self, agent: &Agent, objective: Objective) -> DomainResult<()> {
        let mission = self
            .registry
            .get(objective.kind())
            .ok_or_else(|| DomainError::MissionNotRegistered(objective.kind().to_string()))?;

        let mut tasks = self.tasks();
        if tasks.contains_key(&agent.symbol) {
            return Err(DomainError::AlreadyRunning(agent.symbol.to_string()));
        }

        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        let ctx = MissionContext {
            agent: agent.clone(),
            objective: objective.clone(),
            client: self.client.clone(),
            events: EventEmitter::new(agent.symbol.clone(), self.publisher.clone()),
            cancel: cancel.clone(),
        };

        let span = tracing::info_span!("mission", agent = %agent.symbol, objective = %objective);
        let handle = tokio::spawn(
            supervise(mission, ctx, Arc::clone(&finished)).instrument(span),
        );

        info!(agent = %agent.symbol, objective = %objective, "task started");
        tasks.insert(
            agent.symbol.clone(),
            RunningTask {
                objective,
                cancel,
                finished,
                handle,
            },
        );
        Ok(())
    }

    /// Request cooperative cancellation and wait, bounded, for the task.
    pub async fn stop(&self, agent: &AgentSymbol) -> StopOutcome {
        let Some(task) = self.tasks().remove(agent) else {
            return StopOutcome::NotRunning;
        };
        task.cancel.cancel();
        let mut handle = task.handle;
        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(TaskExit::Panicked(reason))) => {
                error!(agent = %agent, reason = %reason, "task panicked while stopping");
                StopOutcome::Crashed(reason)
            }
            Ok(Ok(exit)) => {
                debug!(agent = %agent, objective = %task.objective, ?exit, "task stopped");
                StopOutcome::Stopped
            }
            Ok(Err(join_err)) => StopOutcome::Crashed(join_err.to_string()),
            Err(_) => {
                handle.abort();
                warn!(
                    agent = %agent,
                    objective = %task.objective,
                    timeout = ?self.stop_timeout,
                    "task ignored cancellation, aborted"
                );
                StopOutcome::Forced
            }
        }
    }

    /// Remove a task that ended on its own.
    ///
    /// Returns `false` when the agent has no finished task, which makes a
    /// terminal event stale (its run was already stopped or replaced).
    pub async fn reap(&self, agent: &AgentSymbol) -> bool {
        let task = {
            let mut tasks = self.tasks();
            match tasks.get(agent) {
                Some(task) if task.finished.load(Ordering::SeqCst) => tasks.remove(agent),
                _ => None,
            }
        };
        let Some(task) = task else {
            return false;
        };
        // The task only has to return after publishing its event.
        let mut handle = task.handle;
        if tokio::time::timeout(self.stop_timeout, &mut handle).await.is_err() {
            handle.abort();
        }
        true
    }

    pub fn is_running(&self, agent: &AgentSymbol) -> bool {
        self.tasks().contains_key(agent)
    }

    /// Objective of the live task for `agent`.
    pub fn objective_of(&self, agent: &AgentSymbol) -> Option<Objective> {
        self.tasks().get(agent).map(|t| t.objective.clone())
    }

    /// Agents with a live task.
    pub fn running(&self) -> Vec<AgentSymbol> {
        let mut agents: Vec<_> = self.tasks().keys().cloned().collect();
        agents.sort();
        agents
    }

    /// Stop every task, returning each agent's outcome.
    pub async fn shutdown(&self) -> Vec<(AgentSymbol, StopOutcome)> {
        let agents = self.running();
        let stops = agents.iter().map(|agent| self.stop(agent));
        let outcomes = futures::future::join_all(stops).await;
        agents.into_iter().zip(outcomes).collect()
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        for (_, task) in self.tasks().drain() {
            task.cancel.cancel();
            task.handle.abort();
        }
    }
}

async fn supervise(
    mission: Arc<dyn Mission>,
    ctx: MissionContext,
    finished: Arc<AtomicBool>,
) -> TaskExit {
    let objective = ctx.objective.clone();
    let events = ctx.events.clone();
    let cancel = ctx.cancel.clone();

    let exit = match AssertUnwindSafe(mission.run(ctx)).catch_unwind().await {
        Ok(MissionOutcome::Completed) => TaskExit::Completed,
        Ok(MissionOutcome::Failed(reason)) => TaskExit::Failed(reason),
        Ok(MissionOutcome::Cancelled) => TaskExit::Cancelled,
        Err(panic) => TaskExit::Panicked(panic_message(panic.as_ref())),
    };
    finished.store(true, Ordering::SeqCst);

    // A requested stop is reported by `stop`, not by an event.
    if cancel.is_cancelled() {
        return exit;
    }
    let payload = match &exit {
        TaskExit::Completed => EventPayload::ObjectiveCompleted { objective },
        TaskExit::Failed(reason) => EventPayload::ObjectiveFailed {
            objective,
            reason: reason.clone(),
        },
        TaskExit::Cancelled => EventPayload::ObjectiveFailed {
            objective,
            reason: "mission cancelled without a stop request".to_string(),
        },
        TaskExit::Panicked(reason) => {
            error!(reason = %reason, "mission panicked");
            EventPayload::AgentCrashed {
                objective: Some(objective),
                reason: reason.clone(),
            }
        }
    };
    tokio::select! {
        biased;
        () = cancel.cancelled() => {}
        _ = events.emit(payload) => {}
    }
    exit
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::RemoteError;
    use crate::domain::models::{
        Capabilities, CapacityClass, EventKind, ObjectiveKind, RetryConfig, SchedulerConfig,
    };
    use crate::domain::ports::{Endpoint, RemoteClient};
    use crate::services::event_bus::EventBus;
    use crate::services::request_scheduler::RequestScheduler;
    use async_trait::async_trait;
    use serde_json::Value;

    struct NoRemote;

    #[async_trait]
    impl RemoteClient for NoRemote {
        async fn call(&self, _endpoint: &Endpoint, _payload: Option<Value>) -> Result<Value, RemoteError> {
            Err(RemoteError::Permanent {
                status: 404,
                message: "unused".to_string(),
            })
        }
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Complete,
        Fail,
        Panic,
        WaitForCancel,
        IgnoreCancel,
    }

    struct Scripted(ObjectiveKind, Behavior);

    #[async_trait]
    impl Mission for Scripted {
        fn kind(&self) -> ObjectiveKind {
            self.0
        }

        async fn run(&self, ctx: MissionContext) -> MissionOutcome {
            match self.1 {
                Behavior::Complete => MissionOutcome::Completed,
                Behavior::Fail => MissionOutcome::Failed("no market".to_string()),
                Behavior::Panic => panic!("hull breach"),
                Behavior::WaitForCancel => {
                    ctx.cancel.cancelled().await;
                    MissionOutcome::Cancelled
                }
                Behavior::IgnoreCancel => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    MissionOutcome::Completed
                }
            }
        }
    }

    fn supervisor(behavior: Behavior, bus: &EventBus) -> TaskSupervisor {
        let registry = MissionRegistry::new().with(Arc::new(Scripted(ObjectiveKind::ResourceScan, behavior)));
        let client = ScheduledClient::new(
            RequestScheduler::new(&SchedulerConfig::default()),
            Arc::new(NoRemote),
            RetryConfig::default(),
        );
        TaskSupervisor::new(
            registry,
            client,
            bus.publisher(),
            &SupervisorConfig { stop_timeout_ms: 50 },
        )
    }

    fn probe() -> Agent {
        Agent::new(AgentSymbol::new("P-1"), "X1", Capabilities::probe())
    }

    fn scan() -> Objective {
        Objective::ResourceScan {
            system: "X1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_completion_publishes_one_event_and_reaps() {
        let bus = EventBus::default();
        let sup = supervisor(Behavior::Complete, &bus);
        sup.start(&probe(), scan()).unwrap();

        let batch = bus.next_batch().await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind(), EventKind::ObjectiveCompleted);
        assert!(sup.reap(&AgentSymbol::new("P-1")).await);
        assert!(!sup.is_running(&AgentSymbol::new("P-1")));
        assert!(!sup.reap(&AgentSymbol::new("P-1")).await, "second reap is stale");
    }

    #[tokio::test]
    async fn test_failure_and_panic_events() {
        let bus = EventBus::default();
        let sup = supervisor(Behavior::Fail, &bus);
        sup.start(&probe(), scan()).unwrap();
        let batch = bus.next_batch().await;
        assert!(matches!(
            &batch[0].payload,
            EventPayload::ObjectiveFailed { reason, .. } if reason == "no market"
        ));

        let bus = EventBus::default();
        let sup = supervisor(Behavior::Panic, &bus);
        sup.start(&probe(), scan()).unwrap();
        let batch = bus.next_batch().await;
        assert_eq!(batch.len(), 1);
        assert!(matches!(
            &batch[0].payload,
            EventPayload::AgentCrashed { reason, objective: Some(_) } if reason.contains("hull breach")
        ));
    }

    #[tokio::test]
    async fn test_start_rejects_running_agent_and_unknown_kind() {
        let bus = EventBus::default();
        let sup = supervisor(Behavior::WaitForCancel, &bus);
        sup.start(&probe(), scan()).unwrap();
        assert!(matches!(
            sup.start(&probe(), scan()),
            Err(DomainError::AlreadyRunning(_))
        ));
        let trade = Objective::Trade {
            route_id: "R-1".to_string(),
            good: "IRON".to_string(),
            source: "X1-A".to_string(),
            destination: "X1-B".to_string(),
        };
        let hauler = Agent::new(
            AgentSymbol::new("H-1"),
            "X1",
            Capabilities::hauler(CapacityClass::Low, 40),
        );
        assert!(matches!(
            sup.start(&hauler, trade),
            Err(DomainError::MissionNotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_cooperative_stop_is_silent() {
        let bus = EventBus::default();
        let sup = supervisor(Behavior::WaitForCancel, &bus);
        sup.start(&probe(), scan()).unwrap();
        assert_eq!(sup.stop(&AgentSymbol::new("P-1")).await, StopOutcome::Stopped);
        assert!(bus.drain().await.is_empty());
        assert_eq!(sup.stop(&AgentSymbol::new("P-1")).await, StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_stuck_task_is_forced() {
        let bus = EventBus::default();
        let sup = supervisor(Behavior::IgnoreCancel, &bus);
        sup.start(&probe(), scan()).unwrap();
        let outcome = sup.stop(&AgentSymbol::new("P-1")).await;
        assert_eq!(outcome, StopOutcome::Forced);
        assert!(outcome.is_crash());
        assert!(!sup.is_running(&AgentSymbol::new("P-1")));
        assert!(bus.drain().await.is_empty(), "the commander reports forced stops");
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let bus = EventBus::default();
        let sup = supervisor(Behavior::WaitForCancel, &bus);
        sup.start(&probe(), scan()).unwrap();
        let outcomes = sup.shutdown().await;
        assert_eq!(outcomes, vec![(AgentSymbol::new("P-1"), StopOutcome::Stopped)]);
        assert!(sup.running().is_empty());
    }
}
