//! Infrastructure build: haul construction material to the site.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{field, market, purchase, system_of, travel_and_dock};
use crate::domain::errors::MissionError;
use crate::domain::models::{DeliveryTarget, EventPayload, Objective, ObjectiveKind};
use crate::domain::ports::Endpoint;
use crate::services::mission::{Mission, MissionContext, MissionOutcome};
use crate::services::request_scheduler::Priority;

#[derive(Debug, Clone)]
pub struct BuildMission {
    pub max_deliveries: u32,
}

impl Default for BuildMission {
    fn default() -> Self {
        Self { max_deliveries: 10 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Construction {
    is_complete: bool,
    #[serde(default)]
    materials: Vec<Material>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Material {
    trade_symbol: String,
    required: u32,
    fulfilled: u32,
}

impl BuildMission {
    async fn outstanding(&self, ctx: &MissionContext, site: &str, material: &str) -> Result<u32, MissionError> {
        let response = ctx
            .call(
                Priority::Low,
                Endpoint::get(format!("systems/{}/waypoints/{site}/construction", system_of(site))),
                None,
            )
            .await?;
        let construction: Construction = serde_json::from_value(field(&response, "/data")?.clone())
            .map_err(|e| MissionError::Protocol(format!("construction: {e}")))?;
        if construction.is_complete {
            return Ok(0);
        }
        Ok(construction
            .materials
            .iter()
            .find(|m| m.trade_symbol == material)
            .map_or(0, |m| m.required.saturating_sub(m.fulfilled)))
    }

    async fn supply(&self, ctx: &MissionContext, site: &str, material: &str) -> Result<(), MissionError> {
        let capacity = ctx.agent.capabilities.cargo_capacity;
        for _ in 0..self.max_deliveries {
            ctx.checkpoint()?;
            let outstanding = self.outstanding(ctx, site, material).await?;
            if outstanding == 0 {
                info!(site, material, "construction material satisfied");
                return Ok(());
            }
            let units = outstanding.min(capacity);
            if units == 0 {
                return Err(MissionError::Protocol(format!("{} has no cargo hold", ctx.symbol())));
            }

            let quotes = market::survey(ctx, system_of(site), Priority::Low).await?;
            let (source, _) = market::cheapest_source(&quotes, material)
                .ok_or_else(|| MissionError::Protocol(format!("no market sells {material}")))?;
            travel_and_dock(ctx, source).await?;
            purchase(ctx, material, units).await?;
            travel_and_dock(ctx, site).await?;
            ctx.call(
                Priority::High,
                Endpoint::post(format!(
                    "systems/{}/waypoints/{site}/construction/supply",
                    system_of(site)
                )),
                Some(json!({
                    "shipSymbol": ctx.symbol().as_str(),
                    "tradeSymbol": material,
                    "units": units,
                })),
            )
            .await?;
            info!(site, material, units, "construction supplied");
            ctx.emit(EventPayload::DeliveryMade {
                target: DeliveryTarget::Build(site.to_string()),
                units,
            })
            .await;
        }
        Ok(())
    }
}

#[async_trait]
impl Mission for BuildMission {
    fn kind(&self) -> ObjectiveKind {
        ObjectiveKind::InfrastructureBuild
    }

    async fn run(&self, ctx: MissionContext) -> MissionOutcome {
        let Objective::InfrastructureBuild { site, material, .. } = &ctx.objective else {
            return MissionOutcome::Failed(format!("build cannot run {}", ctx.objective));
        };
        self.supply(&ctx, site, material).await.into()
    }
}
