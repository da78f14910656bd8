//! Trade: buy at the route's source, sell at its destination, repeat.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{purchase, sell, travel_and_dock};
use crate::domain::errors::MissionError;
use crate::domain::models::{EventPayload, Objective, ObjectiveKind};
use crate::services::mission::{Mission, MissionContext, MissionOutcome};

#[derive(Debug, Clone)]
pub struct TradeMission {
    /// Round trips before the objective completes and is re-evaluated.
    pub max_trips: u32,
}

impl Default for TradeMission {
    fn default() -> Self {
        Self { max_trips: 5 }
    }
}

struct Route<'a> {
    id: &'a str,
    good: &'a str,
    source: &'a str,
    destination: &'a str,
}

impl TradeMission {
    async fn trade(&self, ctx: &MissionContext, route: Route<'_>) -> Result<(), MissionError> {
        let units = ctx.agent.capabilities.cargo_capacity;
        if units == 0 {
            return Err(MissionError::Protocol(format!("{} has no cargo hold", ctx.symbol())));
        }

        for trip in 1..=self.max_trips {
            ctx.checkpoint()?;
            travel_and_dock(ctx, route.source).await?;
            let cost = purchase(ctx, route.good, units).await?;
            travel_and_dock(ctx, route.destination).await?;
            let revenue = sell(ctx, route.good, units).await?;

            let profit = revenue - cost;
            info!(route = route.id, trip, cost, revenue, profit, "trade executed");
            ctx.emit(EventPayload::TradeExecuted {
                route_id: route.id.to_string(),
                profit,
            })
            .await;

            if profit <= 0 {
                warn!(route = route.id, profit, "route no longer profitable");
                ctx.emit(EventPayload::RouteExhausted {
                    route_id: route.id.to_string(),
                })
                .await;
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Mission for TradeMission {
    fn kind(&self) -> ObjectiveKind {
        ObjectiveKind::Trade
    }

    async fn run(&self, ctx: MissionContext) -> MissionOutcome {
        let Objective::Trade {
            route_id,
            good,
            source,
            destination,
        } = &ctx.objective
        else {
            return MissionOutcome::Failed(format!("trade cannot run {}", ctx.objective));
        };
        let route = Route {
            id: route_id,
            good,
            source,
            destination,
        };
        self.trade(&ctx, route).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::missions::testing::{context, hauler, ScriptedRemote};
    use crate::domain::models::EventKind;
    use crate::services::event_bus::EventBus;
    use serde_json::json;
    use std::sync::Arc;

    fn objective() -> Objective {
        Objective::Trade {
            route_id: "R-1".to_string(),
            good: "IRON".to_string(),
            source: "X1-AB12-A1".to_string(),
            destination: "X1-AB12-B2".to_string(),
        }
    }

    #[tokio::test]
    async fn test_trade_until_route_exhausted() {
        let remote = Arc::new(
            ScriptedRemote::default()
                .on("purchase", json!({ "data": { "transaction": { "totalPrice": 400 } } }))
                .on("sell", json!({ "data": { "transaction": { "totalPrice": 1000 } } }))
                .on("sell", json!({ "data": { "transaction": { "totalPrice": 380 } } })),
        );
        let bus = EventBus::default();
        let outcome = TradeMission { max_trips: 5 }
            .run(context(hauler(), objective(), remote.clone(), &bus))
            .await;
        assert_eq!(outcome, MissionOutcome::Completed);

        let kinds: Vec<_> = bus.drain().await.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::TradeExecuted,
                EventKind::TradeExecuted,
                EventKind::RouteExhausted
            ]
        );
        let paths = remote.paths();
        assert_eq!(paths[0], "my/ships/H-1/orbit");
        assert_eq!(paths[1], "my/ships/H-1/navigate");
        assert_eq!(paths[2], "my/ships/H-1/dock");
        assert_eq!(paths[3], "my/ships/H-1/purchase");
    }

    #[tokio::test]
    async fn test_malformed_response_fails() {
        let remote = Arc::new(ScriptedRemote::default().on("purchase", json!({ "data": {} })));
        let bus = EventBus::default();
        let outcome = TradeMission::default()
            .run(context(hauler(), objective(), remote, &bus))
            .await;
        assert!(matches!(outcome, MissionOutcome::Failed(reason) if reason.contains("totalPrice")));
    }
}
