//! Resource scan: survey a system's markets and report trade routes.

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use super::market;
use crate::domain::errors::MissionError;
use crate::domain::models::{EventPayload, Objective, ObjectiveKind};
use crate::services::mission::{Mission, MissionContext, MissionOutcome};
use crate::services::request_scheduler::Priority;

#[derive(Debug, Clone)]
pub struct ScanMission {
    /// Time spent on station after reporting, before the scan completes.
    pub dwell: Duration,
}

impl Default for ScanMission {
    fn default() -> Self {
        Self {
            dwell: Duration::from_secs(300),
        }
    }
}

impl ScanMission {
    async fn scan(&self, ctx: &MissionContext, system: &str) -> Result<(), MissionError> {
        let quotes = market::survey(ctx, system, Priority::Background).await?;
        let routes = market::routes(system, &quotes);
        info!(system, markets = quotes.len(), routes = routes.len(), "system scanned");
        ctx.emit(EventPayload::IntelDiscovered {
            system: system.to_string(),
            routes,
        })
        .await;
        ctx.pause(self.dwell).await
    }
}

#[async_trait]
impl Mission for ScanMission {
    fn kind(&self) -> ObjectiveKind {
        ObjectiveKind::ResourceScan
    }

    async fn run(&self, ctx: MissionContext) -> MissionOutcome {
        let Objective::ResourceScan { system } = &ctx.objective else {
            return MissionOutcome::Failed(format!("scan cannot run {}", ctx.objective));
        };
        self.scan(&ctx, system).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::missions::testing::{context, ScriptedRemote};
    use crate::domain::models::{Agent, AgentSymbol, Capabilities};
    use crate::services::event_bus::EventBus;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_scan_reports_routes() {
        let remote = Arc::new(
            ScriptedRemote::default()
                .on(
                    "waypoints",
                    json!({ "data": [{ "symbol": "X1-AB12-B2" }, { "symbol": "X1-AB12-A1" }] }),
                )
                .on(
                    "market",
                    json!({ "data": { "tradeGoods": [
                        { "symbol": "IRON", "purchasePrice": 10, "sellPrice": 9, "tradeVolume": 20 }
                    ] } }),
                )
                .on(
                    "market",
                    json!({ "data": { "tradeGoods": [
                        { "symbol": "IRON", "purchasePrice": 40, "sellPrice": 35, "tradeVolume": 20 }
                    ] } }),
                ),
        );
        let bus = EventBus::default();
        let probe = Agent::new(AgentSymbol::new("P-1"), "X1-AB12", Capabilities::probe());
        let objective = Objective::ResourceScan {
            system: "X1-AB12".to_string(),
        };
        let mission = ScanMission {
            dwell: Duration::ZERO,
        };
        let outcome = mission.run(context(probe, objective, remote.clone(), &bus)).await;
        assert_eq!(outcome, MissionOutcome::Completed);

        let events = bus.drain().await;
        assert_eq!(events.len(), 1);
        let EventPayload::IntelDiscovered { system, routes } = &events[0].payload else {
            panic!("unexpected {:?}", events[0].payload);
        };
        assert_eq!(system, "X1-AB12");
        assert_eq!(routes.len(), 1);
        // Markets are visited in ascending order.
        assert_eq!(routes[0].source, "X1-AB12-A1");
        assert_eq!(
            remote.paths()[1],
            "systems/X1-AB12/waypoints/X1-AB12-A1/market"
        );
    }
}
