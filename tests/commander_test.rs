//! End-to-end commander cycles against scripted missions.

mod common;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use common::{
    fleet_event, holding_registry, registry_with, symbol, wait_for, Behavior, Fleet, ScriptedMission,
    BUILD_FLEET, MIXED_FLEET,
};
use flotilla::domain::errors::{DomainError, MissionError};
use flotilla::domain::models::{
    AgentStatus, AggregateDelta, CommanderConfig, EventKind, EventPayload, FleetEvent, Objective,
    ObjectiveKind, ObjectiveRequest,
};
use flotilla::domain::ports::AggregateSource;

/// Reports the treasury at a fixed balance on every refresh.
struct FixedCredits {
    credits: i64,
    calls: AtomicUsize,
}

#[async_trait]
impl AggregateSource for FixedCredits {
    async fn refresh(&self) -> Result<Vec<AggregateDelta>, MissionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![AggregateDelta::SetCredits(self.credits)])
    }
}

/// A remote that accepts the refresh and never answers.
struct StalledRemote {
    entered: Arc<Notify>,
}

#[async_trait]
impl AggregateSource for StalledRemote {
    async fn refresh(&self) -> Result<Vec<AggregateDelta>, MissionError> {
        self.entered.notify_one();
        std::future::pending::<()>().await;
        Ok(Vec::new())
    }
}

fn fast_timer() -> CommanderConfig {
    CommanderConfig {
        reevaluate_interval_secs: 1,
        refresh_aggregates: true,
        ..CommanderConfig::default()
    }
}

fn kind_of(fleet: &Fleet, agent: &str) -> Option<ObjectiveKind> {
    fleet
        .state
        .read()
        .agent(&symbol(agent))
        .ok()
        .and_then(|a| a.assignment.as_ref().map(Objective::kind))
}

fn contract_lane_zero() -> Objective {
    Objective::Contract {
        contract_id: "CT-1".to_string(),
        good: "COPPER".to_string(),
        lane: 0,
    }
}

#[tokio::test]
async fn test_initial_cycle_starts_every_agent_and_then_settles() {
    let mut fleet = Fleet::new(MIXED_FLEET, holding_registry());

    let report = fleet.commander.run_cycle(Vec::new()).await;
    assert_eq!(report.started, 3);
    assert_eq!(report.stopped, 0);
    assert_eq!(kind_of(&fleet, "H-1"), Some(ObjectiveKind::Contract));
    assert_eq!(kind_of(&fleet, "H-2"), Some(ObjectiveKind::Trade));
    assert_eq!(kind_of(&fleet, "P-1"), Some(ObjectiveKind::ResourceScan));
    assert_eq!(fleet.supervisor.running().len(), 3);

    let again = fleet.commander.run_cycle(Vec::new()).await;
    assert!(again.is_noop(), "an enacted plan produces no instructions");
    assert_eq!(again.started, 0);
}

#[tokio::test]
async fn test_panic_is_reported_once_and_agent_is_replanned() {
    let mut fleet = Fleet::new(
        MIXED_FLEET,
        registry_with(vec![ScriptedMission::new(ObjectiveKind::Contract, Behavior::Panic)]),
    );
    fleet.commander.run_cycle(Vec::new()).await;

    let report = fleet.cycle_next_batch().await;
    assert_eq!(report.events, 1);
    assert_eq!(report.stale_events, 0);
    assert_eq!(report.started, 1, "crashed agent is placed again in the same cycle");
    assert_eq!(fleet.history_count("H-1", EventKind::AgentCrashed), 1);

    let snapshot = fleet.state.read();
    let h1 = snapshot.agent(&symbol("H-1")).unwrap();
    assert_eq!(h1.crash_count, 1);
    assert!(h1.last_error.as_deref().unwrap_or_default().contains("reactor breach"));
    assert_eq!(h1.status, AgentStatus::Running);
}

#[tokio::test]
async fn test_crash_limit_parks_agent_until_pinned() {
    let mut fleet = Fleet::new(
        MIXED_FLEET,
        registry_with(vec![ScriptedMission::new(ObjectiveKind::Contract, Behavior::Panic)]),
    );
    fleet.commander.run_cycle(Vec::new()).await;

    for crash in 1..=5 {
        let report = fleet.cycle_next_batch().await;
        let expected_starts = usize::from(crash < 5);
        assert_eq!(report.started, expected_starts, "after crash {crash}");
    }

    assert_eq!(fleet.history_count("H-1", EventKind::AgentCrashed), 5);
    let snapshot = fleet.state.read();
    let h1 = snapshot.agent(&symbol("H-1")).unwrap();
    assert_eq!(h1.crash_count, 5);
    assert_eq!(h1.status, AgentStatus::Unassigned);
    assert!(!fleet.supervisor.is_running(&symbol("H-1")));

    // Pinning clears the crash history and overrides the limit.
    let request: ObjectiveRequest = "contract:CT-1".parse().unwrap();
    fleet.handle.force_assign_request(&symbol("H-1"), &request).unwrap();
    assert_eq!(fleet.state.read().agent(&symbol("H-1")).unwrap().crash_count, 0);

    let report = fleet.commander.run_cycle(Vec::new()).await;
    assert_eq!(report.started, 1);
    assert_eq!(kind_of(&fleet, "H-1"), Some(ObjectiveKind::Contract));
}

#[tokio::test]
async fn test_completion_and_failure_free_the_agent() {
    let mut fleet = Fleet::new(
        MIXED_FLEET,
        registry_with(vec![
            ScriptedMission::new(ObjectiveKind::ResourceScan, Behavior::Complete),
            ScriptedMission::new(ObjectiveKind::Contract, Behavior::Hold).with("H-1", Behavior::Fail),
        ]),
    );
    fleet.commander.run_cycle(Vec::new()).await;

    let mut completed = 0;
    let mut failed = 0;
    while completed == 0 || failed == 0 {
        let report = fleet.cycle_next_batch().await;
        assert_eq!(report.stale_events, 0);
        completed = fleet.history_count("P-1", EventKind::ObjectiveCompleted);
        failed = fleet.history_count("H-1", EventKind::ObjectiveFailed);
    }

    let snapshot = fleet.state.read();
    // Clean terminal outcomes never count as crashes.
    assert_eq!(snapshot.agent(&symbol("H-1")).unwrap().crash_count, 0);
    assert_eq!(snapshot.agent(&symbol("P-1")).unwrap().crash_count, 0);
    assert_eq!(fleet.history_count("H-1", EventKind::AgentCrashed), 0);
}

#[tokio::test]
async fn test_stuck_task_is_forced_and_reported_once() {
    let mut fleet = Fleet::new(
        MIXED_FLEET,
        registry_with(vec![ScriptedMission::new(ObjectiveKind::Trade, Behavior::Stuck)]),
    );
    fleet.commander.run_cycle(Vec::new()).await;
    assert!(fleet.supervisor.is_running(&symbol("H-2")));

    fleet
        .bus
        .publish(fleet_event(
            "H-2",
            EventPayload::RouteExhausted {
                route_id: "R-1".to_string(),
            },
        ))
        .await;
    let report = fleet.cycle_next_batch().await;

    assert_eq!(report.stopped, 1);
    assert_eq!(report.crashed, 1);
    assert_eq!(fleet.history_count("H-2", EventKind::AgentCrashed), 1);
    assert!(!fleet.supervisor.is_running(&symbol("H-2")));

    let snapshot = fleet.state.read();
    let h2 = snapshot.agent(&symbol("H-2")).unwrap();
    assert_eq!(h2.status, AgentStatus::Unassigned);
    assert_eq!(h2.crash_count, 1);
    assert!(h2.assignment.is_none());

    // The aborted task never reports anything afterwards.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let late = fleet.bus.drain().await;
    assert!(late.iter().all(|e| e.kind() != EventKind::AgentCrashed));
}

#[tokio::test]
async fn test_stale_terminal_event_is_ignored() {
    let mut fleet = Fleet::new(MIXED_FLEET, holding_registry());
    fleet.commander.run_cycle(Vec::new()).await;

    let forged = fleet_event(
        "H-1",
        EventPayload::ObjectiveCompleted {
            objective: contract_lane_zero(),
        },
    );
    let report = fleet.commander.run_cycle(vec![forged]).await;

    assert_eq!(report.stale_events, 1);
    assert!(report.is_noop());
    assert!(fleet.supervisor.is_running(&symbol("H-1")));
    assert_eq!(
        fleet.state.read().agent(&symbol("H-1")).unwrap().status,
        AgentStatus::Running
    );
}

#[tokio::test]
async fn test_freed_builder_is_not_sent_back_below_build_floor() {
    let gate = Arc::new(Notify::new());
    let mut fleet = Fleet::new(
        BUILD_FLEET,
        registry_with(vec![ScriptedMission::new(ObjectiveKind::InfrastructureBuild, Behavior::Hold)
            .with("H-2", Behavior::CompleteWhen(Arc::clone(&gate)))]),
    );
    let report = fleet.commander.run_cycle(Vec::new()).await;
    assert_eq!(report.started, 2);
    assert_eq!(kind_of(&fleet, "H-1"), Some(ObjectiveKind::InfrastructureBuild));
    assert_eq!(kind_of(&fleet, "H-2"), Some(ObjectiveKind::InfrastructureBuild));

    // A loss drops credits under the build floor; running builders keep going.
    fleet
        .bus
        .publish(FleetEvent::fleet_wide(EventPayload::TradeExecuted {
            route_id: "R-1".to_string(),
            profit: -100_000,
        }))
        .await;
    let report = fleet.cycle_next_batch().await;
    assert!(report.is_noop());
    assert_eq!(fleet.state.read().aggregates.credits, 250_000);
    let crossed: Vec<_> = fleet
        .bus
        .history(usize::MAX)
        .into_iter()
        .filter(|e| e.kind() == EventKind::ResourceThresholdCrossed)
        .collect();
    assert_eq!(crossed.len(), 1);
    assert!(matches!(
        crossed[0].payload,
        EventPayload::ResourceThresholdCrossed { floor: 300_000, above: false, .. }
    ));

    // H-2 finishes; its vacated lane stays open and it trades instead.
    gate.notify_one();
    let report = fleet.cycle_next_batch().await;
    assert_eq!(report.started, 1);
    assert_eq!(kind_of(&fleet, "H-1"), Some(ObjectiveKind::InfrastructureBuild));
    assert_eq!(kind_of(&fleet, "H-2"), Some(ObjectiveKind::Trade));
}

#[tokio::test]
async fn test_operator_pin_and_clear() {
    let mut fleet = Fleet::new(MIXED_FLEET, holding_registry());
    fleet.commander.run_cycle(Vec::new()).await;

    fleet.handle.force_idle(&symbol("H-2")).unwrap();
    let report = fleet.commander.run_cycle(Vec::new()).await;
    assert_eq!(report.stopped, 1);
    assert_eq!(report.crashed, 0);
    assert_eq!(report.started, 0);
    assert_eq!(kind_of(&fleet, "H-2"), None);
    assert!(!fleet.supervisor.is_running(&symbol("H-2")));

    fleet.handle.clear_override(&symbol("H-2")).unwrap();
    let report = fleet.commander.run_cycle(Vec::new()).await;
    assert_eq!(report.started, 1);
    assert_eq!(kind_of(&fleet, "H-2"), Some(ObjectiveKind::Trade));
}

#[tokio::test]
async fn test_conflicting_pins_are_rejected() {
    let fleet = Fleet::new(MIXED_FLEET, holding_registry());

    fleet.handle.force_assign(&symbol("H-1"), contract_lane_zero()).unwrap();
    let err = fleet
        .handle
        .force_assign(&symbol("H-2"), contract_lane_zero())
        .unwrap_err();
    assert!(matches!(err, DomainError::DoubleAssignment { ref holder, .. } if holder == "H-1"));

    // Re-pinning the holder itself is fine.
    fleet.handle.force_assign(&symbol("H-1"), contract_lane_zero()).unwrap();

    let unknown: ObjectiveRequest = "contract:CT-404".parse().unwrap();
    assert!(fleet.handle.force_assign_request(&symbol("H-2"), &unknown).is_err());
}

#[tokio::test]
async fn test_run_loop_reacts_to_pins_and_stands_down() {
    let Fleet {
        commander,
        handle,
        supervisor,
        ..
    } = Fleet::new(MIXED_FLEET, holding_registry());
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(commander.run(shutdown.clone()));

    assert!(wait_for(|| supervisor.running().len() == 3, 2_000).await);

    // A pin wakes the loop without any event arriving.
    handle.force_idle(&symbol("P-1")).unwrap();
    assert!(
        wait_for(
            || !supervisor.is_running(&symbol("P-1"))
                && handle.snapshot().agent(&symbol("P-1")).map_or(false, |a| a.is_free()),
            2_000
        )
        .await
    );

    shutdown.cancel();
    task.await.unwrap().unwrap();

    assert!(supervisor.running().is_empty());
    assert!(handle.snapshot().agents.values().all(|a| a.is_free()));
}

#[tokio::test]
async fn test_timer_refresh_parks_haulers_when_credits_drop() {
    let Fleet {
        commander,
        handle,
        supervisor,
        ..
    } = Fleet::with_config(MIXED_FLEET, holding_registry(), fast_timer());
    let source = Arc::new(FixedCredits {
        credits: 20_000,
        calls: AtomicUsize::new(0),
    });
    let commander = commander.with_aggregate_source(source.clone());
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(commander.run(shutdown.clone()));

    assert!(wait_for(|| supervisor.running().len() == 3, 2_000).await);
    assert_eq!(source.calls.load(Ordering::SeqCst), 0, "first refresh waits for the timer");

    // No event arrives; only the timer can notice the treasury change.
    assert!(
        wait_for(
            || {
                let snapshot = handle.snapshot();
                snapshot.aggregates.credits == 20_000
                    && !supervisor.is_running(&symbol("H-1"))
                    && !supervisor.is_running(&symbol("H-2"))
                    && snapshot.agent(&symbol("H-1")).map_or(false, |a| a.is_free())
            },
            4_000
        )
        .await
    );
    assert!(supervisor.is_running(&symbol("P-1")), "probes keep scanning");
    let crossings = handle
        .event_history(usize::MAX)
        .iter()
        .filter(|e| e.kind() == EventKind::ResourceThresholdCrossed)
        .count();
    assert!(crossings >= 1);

    shutdown.cancel();
    task.await.unwrap().unwrap();
    assert!(source.calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_stalled_refresh_leaves_loop_responsive() {
    let Fleet {
        commander,
        handle,
        supervisor,
        ..
    } = Fleet::with_config(MIXED_FLEET, holding_registry(), fast_timer());
    let entered = Arc::new(Notify::new());
    let commander = commander.with_aggregate_source(Arc::new(StalledRemote {
        entered: Arc::clone(&entered),
    }));
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(commander.run(shutdown.clone()));

    assert!(wait_for(|| supervisor.running().len() == 3, 2_000).await);
    tokio::time::timeout(Duration::from_secs(3), entered.notified())
        .await
        .expect("refresh started");

    handle.force_idle(&symbol("P-1")).unwrap();
    assert!(
        wait_for(
            || !supervisor.is_running(&symbol("P-1"))
                && handle.snapshot().agent(&symbol("P-1")).map_or(false, |a| a.is_free()),
            2_000
        )
        .await,
        "pin applied while the refresh is outstanding"
    );

    let started = Instant::now();
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("shutdown does not wait on the refresh")
        .unwrap()
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(supervisor.running().is_empty());
}
