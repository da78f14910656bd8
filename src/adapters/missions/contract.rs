//! Contract delivery: source the good, deliver it, fulfill when done.

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
pub struct ContractMission {
    /// Deliveries before the objective completes and is re-evaluated.
    pub max_deliveries: u32,
}

impl Default for ContractMission {
    fn default() -> Self {
        Self { max_deliveries: 10 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliverTerm {
    trade_symbol: String,
    destination_symbol: String,
    units_required: u32,
    units_fulfilled: u32,
}

impl DeliverTerm {
    fn remaining(&self) -> u32 {
        self.units_required.saturating_sub(self.units_fulfilled)
    }
}

impl ContractMission {
    async fn term(&self, ctx: &MissionContext, contract_id: &str, good: &str) -> Result<DeliverTerm, MissionError> {
        let response = ctx
            .call(Priority::Low, Endpoint::get(format!("my/contracts/{contract_id}")), None)
            .await?;
        let terms: Vec<DeliverTerm> = serde_json::from_value(field(&response, "/data/terms/deliver")?.clone())
            .map_err(|e| MissionError::Protocol(format!("contract terms: {e}")))?;
        terms
            .into_iter()
            .find(|t| t.trade_symbol == good)
            .ok_or_else(|| MissionError::Protocol(format!("contract {contract_id} does not want {good}")))
    }

    async fn deliver(&self, ctx: &MissionContext, contract_id: &str, good: &str) -> Result<(), MissionError> {
        let capacity = ctx.agent.capabilities.cargo_capacity;
        for _ in 0..self.max_deliveries {
            ctx.checkpoint()?;
            let term = self.term(ctx, contract_id, good).await?;
            if term.remaining() == 0 {
                ctx.call(
                    Priority::High,
                    Endpoint::post(format!("my/contracts/{contract_id}/fulfill")),
                    None,
                )
                .await?;
                info!(contract = contract_id, "contract fulfilled");
                return Ok(());
            }

            let units = term.remaining().min(capacity);
            if units == 0 {
                return Err(MissionError::Protocol(format!("{} has no cargo hold", ctx.symbol())));
            }
            let quotes = market::survey(ctx, system_of(&term.destination_symbol), Priority::Low).await?;
            let (source, _) = market::cheapest_source(&quotes, good)
                .ok_or_else(|| MissionError::Protocol(format!("no market sells {good}")))?;
            travel_and_dock(ctx, source).await?;
            purchase(ctx, good, units).await?;
            travel_and_dock(ctx, &term.destination_symbol).await?;
            ctx.call(
                Priority::High,
                Endpoint::post(format!("my/contracts/{contract_id}/deliver")),
                Some(json!({
                    "shipSymbol": ctx.symbol().as_str(),
                    "tradeSymbol": good,
                    "units": units,
                })),
            )
            .await?;
            info!(contract = contract_id, units, "contract delivery made");
            ctx.emit(EventPayload::DeliveryMade {
                target: DeliveryTarget::Contract(contract_id.to_string()),
                units,
            })
            .await;
        }
        Ok(())
    }
}

#[async_trait]
impl Mission for ContractMission {
    fn kind(&self) -> ObjectiveKind {
        ObjectiveKind::Contract
    }

    async fn run(&self, ctx: MissionContext) -> MissionOutcome {
        let Objective::Contract { contract_id, good, .. } = &ctx.objective else {
            return MissionOutcome::Failed(format!("contract cannot run {}", ctx.objective));
        };
        self.deliver(&ctx, contract_id, good).await.into()
    }
}
