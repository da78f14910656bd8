//! Market lookups shared by the scan, contract and build missions.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{field, system_of};
use crate::domain::errors::MissionError;
use crate::domain::models::TradeRoute;
use crate::domain::ports::Endpoint;
use crate::services::mission::MissionContext;
use crate::services::request_scheduler::Priority;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeGood {
    pub symbol: String,
    pub purchase_price: i64,
    pub sell_price: i64,
    #[serde(default = "default_trade_volume")]
    pub trade_volume: u32,
}

fn default_trade_volume() -> u32 {
    1
}

/// Prices observed at one marketplace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketQuote {
    pub waypoint: String,
    pub goods: Vec<TradeGood>,
}

impl MarketQuote {
    pub fn good(&self, symbol: &str) -> Option<&TradeGood> {
        self.goods.iter().find(|g| g.symbol == symbol)
    }
}

#[derive(Deserialize)]
struct WaypointRef {
    symbol: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketData {
    #[serde(default)]
    trade_goods: Vec<TradeGood>,
}

fn decode<T: serde::de::DeserializeOwned>(value: &Value, pointer: &str) -> Result<T, MissionError> {
    serde_json::from_value(field(value, pointer)?.clone())
        .map_err(|e| MissionError::Protocol(format!("{pointer}: {e}")))
}

/// Marketplace waypoints in `system`, ascending.
pub async fn marketplaces(
    ctx: &MissionContext,
    system: &str,
    priority: Priority,
) -> Result<Vec<String>, MissionError> {
    let response = ctx
        .call(
            priority,
            Endpoint::get(format!("systems/{system}/waypoints?traits=MARKETPLACE")),
            None,
        )
        .await?;
    let waypoints: Vec<WaypointRef> = decode(&response, "/data")?;
    let mut symbols: Vec<_> = waypoints.into_iter().map(|w| w.symbol).collect();
    symbols.sort();
    Ok(symbols)
}

/// Current prices at `waypoint`; empty when nobody is there to see them.
pub async fn quote(
    ctx: &MissionContext,
    waypoint: &str,
    priority: Priority,
) -> Result<MarketQuote, MissionError> {
    let system = system_of(waypoint);
    let response = ctx
        .call(
            priority,
            Endpoint::get(format!("systems/{system}/waypoints/{waypoint}/market")),
            None,
        )
        .await?;
    let data: MarketData = decode(&response, "/data")?;
    Ok(MarketQuote {
        waypoint: waypoint.to_string(),
        goods: data.trade_goods,
    })
}

/// Quote every marketplace in `system`.
pub async fn survey(
    ctx: &MissionContext,
    system: &str,
    priority: Priority,
) -> Result<Vec<MarketQuote>, MissionError> {
    let mut quotes = Vec::new();
    for waypoint in marketplaces(ctx, system, priority).await? {
        ctx.checkpoint()?;
        quotes.push(quote(ctx, &waypoint, priority).await?);
    }
    Ok(quotes)
}

/// Where `good` is cheapest to buy; ties go to the first waypoint.
pub fn cheapest_source<'a>(quotes: &'a [MarketQuote], good: &str) -> Option<(&'a str, &'a TradeGood)> {
    quotes
        .iter()
        .filter_map(|q| q.good(good).map(|g| (q.waypoint.as_str(), g)))
        .min_by_key(|(_, g)| g.purchase_price)
}

/// Best buy/sell pair per good with a positive spread.
pub fn routes(system: &str, quotes: &[MarketQuote]) -> Vec<TradeRoute> {
    let mut goods: BTreeMap<&str, ()> = BTreeMap::new();
    for quote in quotes {
        for good in &quote.goods {
            goods.insert(&good.symbol, ());
        }
    }

    let mut routes = Vec::new();
    for good in goods.keys() {
        let Some((source, buy)) = cheapest_source(quotes, good) else {
            continue;
        };
        let best_sale = quotes
            .iter()
            .filter(|q| q.waypoint != source)
            .filter_map(|q| q.good(good).map(|g| (q.waypoint.as_str(), g)))
            .max_by_key(|(_, g)| g.sell_price);
        let Some((destination, sale)) = best_sale else {
            continue;
        };
        let spread = sale.sell_price - buy.purchase_price;
        if spread <= 0 {
            continue;
        }
        let lot = i64::from(buy.trade_volume.min(sale.trade_volume).max(1));
        routes.push(TradeRoute {
            id: format!("{good}:{source}>{destination}"),
            system: system.to_string(),
            good: (*good).to_string(),
            source: source.to_string(),
            destination: destination.to_string(),
            profit_per_trip: spread * lot,
        });
    }
    routes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good(symbol: &str, buy: i64, sell: i64) -> TradeGood {
        TradeGood {
            symbol: symbol.to_string(),
            purchase_price: buy,
            sell_price: sell,
            trade_volume: 10,
        }
    }

    fn quotes() -> Vec<MarketQuote> {
        vec![
            MarketQuote {
                waypoint: "X1-AB12-A1".to_string(),
                goods: vec![good("IRON", 10, 8), good("FUEL", 50, 45)],
            },
            MarketQuote {
                waypoint: "X1-AB12-B2".to_string(),
                goods: vec![good("IRON", 30, 25), good("FUEL", 52, 48)],
            },
        ]
    }

    #[test]
    fn test_routes_pick_best_spread() {
        let routes = routes("X1-AB12", &quotes());
        assert_eq!(routes.len(), 1, "FUEL has no positive spread");
        let iron = &routes[0];
        assert_eq!(iron.source, "X1-AB12-A1");
        assert_eq!(iron.destination, "X1-AB12-B2");
        assert_eq!(iron.profit_per_trip, 15 * 10);
        assert_eq!(iron.id, "IRON:X1-AB12-A1>X1-AB12-B2");
    }

    #[test]
    fn test_cheapest_source() {
        let quotes = quotes();
        let (waypoint, g) = cheapest_source(&quotes, "FUEL").unwrap();
        assert_eq!(waypoint, "X1-AB12-A1");
        assert_eq!(g.purchase_price, 50);
        assert!(cheapest_source(&quotes, "GOLD").is_none());
    }
}
