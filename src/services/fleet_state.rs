//! Single-writer fleet state.
//!
//! Readers get an `Arc` of the last published snapshot and never block on
//! the writer beyond the pointer swap. Mutations are applied to a private
//! copy inside the writer section; the copy is published only when every
//! mutation succeeded and the invariants hold.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{FleetMutation, FleetSnapshot};

/// Single-writer fleet state.
///
/// Readers get immutable snapshots; writers serialize on an internal lock and
/// publish a new snapshot per successful batch.
pub struct FleetState {
    tx: watch::Sender<Arc<FleetSnapshot>>,
    writer: Mutex<()>,
}

impl FleetState {
    /// Start from `initial`.
    pub fn new(initial: FleetSnapshot) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self {
            tx,
            writer: Mutex::new(()),
        }
    }

    /// The current immutable snapshot.
    pub fn read(&self) -> Arc<FleetSnapshot> {
        self.tx.borrow().clone()
    }

    /// Observe every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<FleetSnapshot>> {
        self.tx.subscribe()
    }

    /// Apply one mutation and return the published snapshot.
    pub fn apply(&self, mutation: FleetMutation) -> DomainResult<Arc<FleetSnapshot>> {
        self.apply_all(std::slice::from_ref(&mutation))
    }

    /// Apply a batch atomically: either all mutations are published together
    /// or the snapshot is left unchanged.
    pub fn apply_all(&self, mutations: &[FleetMutation]) -> DomainResult<Arc<FleetSnapshot>> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.read();
        let next = match Self::stage(&current, mutations) {
            Ok(next) => Arc::new(next),
            Err(err) => {
                warn!(error = %err, mutations = mutations.len(), "fleet mutation rejected");
                return Err(err);
            }
        };
        debug!(version = next.version, mutations = mutations.len(), "fleet state published");
        self.tx.send_replace(Arc::clone(&next));
        Ok(next)
    }

    /// Dry-run a batch against the current snapshot without publishing.
    pub fn validate(&self, mutations: &[FleetMutation]) -> DomainResult<FleetSnapshot> {
        Self::stage(&self.read(), mutations)
    }

    fn stage(current: &FleetSnapshot, mutations: &[FleetMutation]) -> DomainResult<FleetSnapshot> {
        let mut next = current.clone();
        for mutation in mutations {
            next.apply(mutation)?;
        }
        next.check_invariants()?;
        next.version = current.version + 1;
        next.taken_at = chrono::Utc::now();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;
    use crate::domain::models::{
        Agent, AgentStatus, AgentSymbol, Capabilities, CapacityClass, FleetAggregates, Objective,
    };

    fn state() -> FleetState {
        let agents = ["A-1", "A-2"].into_iter().map(|s| {
            Agent::new(AgentSymbol::new(s), "X1", Capabilities::hauler(CapacityClass::High, 60))
        });
        FleetState::new(FleetSnapshot::new(agents, FleetAggregates::default()))
    }

    fn scan(system: &str) -> Objective {
        Objective::ResourceScan {
            system: system.to_string(),
        }
    }

    #[test]
    fn test_apply_publishes_new_version() {
        let state = state();
        let before = state.read();
        let after = state
            .apply(FleetMutation::Assign(AgentSymbol::new("A-1"), scan("X1")))
            .unwrap();
        assert_eq!(after.version, before.version + 1);
        assert_eq!(before.agents[&AgentSymbol::new("A-1")].status, AgentStatus::Unassigned);
        assert_eq!(
            state.read().agents[&AgentSymbol::new("A-1")].status,
            AgentStatus::Running
        );
    }

    #[test]
    fn test_failed_batch_leaves_snapshot_unchanged() {
        let state = state();
        let before = state.read();
        let err = state
            .apply_all(&[
                FleetMutation::Assign(AgentSymbol::new("A-1"), scan("X1")),
                FleetMutation::Assign(AgentSymbol::new("A-2"), scan("X1")),
            ])
            .unwrap_err();
        assert!(matches!(err, DomainError::DoubleAssignment { .. }));
        assert_eq!(*state.read(), *before);
    }

    #[test]
    fn test_validate_does_not_publish() {
        let state = state();
        let staged = state
            .validate(&[FleetMutation::Assign(AgentSymbol::new("A-1"), scan("X1"))])
            .unwrap();
        assert_eq!(staged.count_in(AgentStatus::Running), 1);
        assert_eq!(state.read().count_in(AgentStatus::Running), 0);
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let state = state();
        let mut rx = state.subscribe();
        state
            .apply(FleetMutation::Assign(AgentSymbol::new("A-2"), scan("X2")))
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().count_in(AgentStatus::Running), 1);
    }

    #[test]
    fn test_concurrent_writers_never_double_assign() {
        let state = Arc::new(state());
        let handles: Vec<_> = ["A-1", "A-2"]
            .into_iter()
            .map(|agent| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    state
                        .apply(FleetMutation::Assign(AgentSymbol::new(agent), scan("X1")))
                        .is_ok()
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
        assert_eq!(state.read().count_in(AgentStatus::Running), 1);
    }
}
