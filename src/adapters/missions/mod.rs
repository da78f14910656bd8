//! Built-in mission adapters.
//!
//! Thin wrappers over the remote fleet API. Each adapter translates its
//! milestones into fleet events and never calls the remote service except
//! through [`MissionContext::call`].

pub mod build;
pub mod contract;
pub mod market;
pub mod scan;
pub mod trade;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::MissionError;
use crate::services::mission::{MissionContext, MissionRegistry};
use crate::services::request_scheduler::Priority;
use crate::domain::ports::Endpoint;

pub use build::BuildMission;
pub use contract::ContractMission;
pub use scan::ScanMission;
pub use trade::TradeMission;

/// Registry with every built-in mission.
pub fn default_registry() -> MissionRegistry {
    MissionRegistry::new()
        .with(Arc::new(TradeMission::default()))
        .with(Arc::new(ContractMission::default()))
        .with(Arc::new(BuildMission::default()))
        .with(Arc::new(ScanMission::default()))
}

/// Read a field from a response by JSON pointer.
pub(crate) fn field<'a>(value: &'a Value, pointer: &str) -> Result<&'a Value, MissionError> {
    value
        .pointer(pointer)
        .ok_or_else(|| MissionError::Protocol(format!("response missing {pointer}")))
}

pub(crate) fn field_i64(value: &Value, pointer: &str) -> Result<i64, MissionError> {
    field(value, pointer)?
        .as_i64()
        .ok_or_else(|| MissionError::Protocol(format!("{pointer} is not an integer")))
}

pub(crate) fn field_str<'a>(value: &'a Value, pointer: &str) -> Result<&'a str, MissionError> {
    field(value, pointer)?
        .as_str()
        .ok_or_else(|| MissionError::Protocol(format!("{pointer} is not a string")))
}

/// `X1-AB12-C3` lies in system `X1-AB12`.
pub(crate) fn system_of(waypoint: &str) -> &str {
    match waypoint.match_indices('-').nth(1) {
        Some((idx, _)) => &waypoint[..idx],
        None => waypoint,
    }
}

fn ship_path(ctx: &MissionContext, action: &str) -> String {
    format!("my/ships/{}/{action}", ctx.symbol())
}

/// Fly to `waypoint` and wait for arrival, then dock.
pub(crate) async fn travel_and_dock(ctx: &MissionContext, waypoint: &str) -> Result<(), MissionError> {
    ctx.call(Priority::Normal, Endpoint::post(ship_path(ctx, "orbit")), None)
        .await?;
    let nav = ctx
        .call(
            Priority::Normal,
            Endpoint::post(ship_path(ctx, "navigate")),
            Some(json!({ "waypointSymbol": waypoint })),
        )
        .await?;
    if let Some(arrival) = nav
        .pointer("/data/nav/route/arrival")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    {
        let remaining = arrival.with_timezone(&Utc) - Utc::now();
        if let Ok(wait) = remaining.to_std() {
            ctx.pause(wait.min(Duration::from_secs(3600))).await?;
        }
    }
    ctx.call(Priority::Normal, Endpoint::post(ship_path(ctx, "dock")), None)
        .await?;
    Ok(())
}

/// Buy `units` of `good` where the ship is docked; returns the total price.
pub(crate) async fn purchase(ctx: &MissionContext, good: &str, units: u32) -> Result<i64, MissionError> {
    let response = ctx
        .call(
            Priority::High,
            Endpoint::post(ship_path(ctx, "purchase")),
            Some(json!({ "symbol": good, "units": units })),
        )
        .await?;
    field_i64(&response, "/data/transaction/totalPrice")
}

/// Sell `units` of `good` where the ship is docked; returns the total price.
pub(crate) async fn sell(ctx: &MissionContext, good: &str, units: u32) -> Result<i64, MissionError> {
    let response = ctx
        .call(
            Priority::High,
            Endpoint::post(ship_path(ctx, "sell")),
            Some(json!({ "symbol": good, "units": units })),
        )
        .await?;
    field_i64(&response, "/data/transaction/totalPrice")
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted remote client for mission tests.

    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use crate::domain::errors::RemoteError;
    use crate::domain::models::{
        Agent, AgentSymbol, Capabilities, CapacityClass, Objective, RetryConfig, SchedulerConfig,
    };
    use crate::domain::ports::{Endpoint, RemoteClient};
    use crate::services::event_bus::EventBus;
    use crate::services::mission::MissionContext;
    use crate::services::request_scheduler::RequestScheduler;
    use crate::services::scheduled_client::ScheduledClient;
    use tokio_util::sync::CancellationToken;

    /// Answers calls from a list of `(path suffix, response)` rules; the
    /// first rule whose suffix matches is consumed unless it is the last
    /// one for that suffix.
    #[derive(Default)]
    pub struct ScriptedRemote {
        rules: Mutex<Vec<(String, VecDeque<Value>)>>,
        pub calls: Mutex<Vec<(Endpoint, Option<Value>)>>,
    }

    impl ScriptedRemote {
        pub fn on(self, suffix: &str, response: Value) -> Self {
            {
                let mut rules = self.rules.lock().unwrap();
                match rules.iter_mut().find(|(s, _)| s == suffix) {
                    Some((_, queue)) => queue.push_back(response),
                    None => rules.push((suffix.to_string(), VecDeque::from([response]))),
                }
            }
            self
        }

        pub fn paths(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(e, _)| e.path.clone())
                .collect()
        }
    }

    #[async_trait]
    impl RemoteClient for ScriptedRemote {
        async fn call(&self, endpoint: &Endpoint, payload: Option<Value>) -> Result<Value, RemoteError> {
            self.calls.lock().unwrap().push((endpoint.clone(), payload));
            let mut rules = self.rules.lock().unwrap();
            let path = endpoint.path.split('?').next().unwrap_or_default();
            let Some((_, queue)) = rules.iter_mut().find(|(s, _)| path.ends_with(s.as_str())) else {
                // Unscripted calls (orbit, dock) succeed with an empty body.
                return Ok(serde_json::json!({ "data": {} }));
            };
            if queue.len() > 1 {
                Ok(queue.pop_front().unwrap())
            } else {
                Ok(queue.front().cloned().unwrap())
            }
        }
    }

    pub fn hauler() -> Agent {
        Agent::new(
            AgentSymbol::new("H-1"),
            "X1-AB12",
            Capabilities::hauler(CapacityClass::High, 40),
        )
    }

    pub fn context(
        agent: Agent,
        objective: Objective,
        remote: Arc<ScriptedRemote>,
        bus: &EventBus,
    ) -> MissionContext {
        let scheduler = RequestScheduler::spawn(&SchedulerConfig {
            requests_per_second: 1000.0,
            burst_size: 50,
            ..SchedulerConfig::default()
        });
        MissionContext {
            events: bus.emitter(agent.symbol.clone()),
            agent,
            objective,
            client: ScheduledClient::new(scheduler, remote, RetryConfig::default()),
            cancel: CancellationToken::new(),
        }
    }
}
