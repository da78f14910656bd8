//! Fleet events.
//!
//! Events are immutable records created by agent tasks or the supervisor and
//! consumed exactly once by the commander.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::agent::AgentSymbol;
use super::fleet::TradeRoute;
use super::objective::Objective;

/// Event kind, used for filtering and the durable log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ObjectiveCompleted,
    ObjectiveFailed,
    AgentCrashed,
    DeliveryMade,
    TradeExecuted,
    RouteExhausted,
    IntelDiscovered,
    ResourceThresholdCrossed,
    AgentIdle,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ObjectiveCompleted => "objective_completed",
            Self::ObjectiveFailed => "objective_failed",
            Self::AgentCrashed => "agent_crashed",
            Self::DeliveryMade => "delivery_made",
            Self::TradeExecuted => "trade_executed",
            Self::RouteExhausted => "route_exhausted",
            Self::IntelDiscovered => "intel_discovered",
            Self::ResourceThresholdCrossed => "resource_threshold_crossed",
            Self::AgentIdle => "agent_idle",
        }
    }

    /// Terminal events end an agent's current objective.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ObjectiveCompleted | Self::ObjectiveFailed | Self::AgentCrashed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a delivery was made against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum DeliveryTarget {
    Contract(String),
    Build(String),
}

/// Kind-specific event data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    ObjectiveCompleted {
        objective: Objective,
    },
    ObjectiveFailed {
        objective: Objective,
        reason: String,
    },
    AgentCrashed {
        objective: Option<Objective>,
        reason: String,
    },
    DeliveryMade {
        target: DeliveryTarget,
        units: u32,
    },
    TradeExecuted {
        route_id: String,
        profit: i64,
    },
    RouteExhausted {
        route_id: String,
    },
    IntelDiscovered {
        system: String,
        routes: Vec<TradeRoute>,
    },
    ResourceThresholdCrossed {
        credits: i64,
        floor: i64,
        above: bool,
    },
    AgentIdle {
        reason: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ObjectiveCompleted { .. } => EventKind::ObjectiveCompleted,
            Self::ObjectiveFailed { .. } => EventKind::ObjectiveFailed,
            Self::AgentCrashed { .. } => EventKind::AgentCrashed,
            Self::DeliveryMade { .. } => EventKind::DeliveryMade,
            Self::TradeExecuted { .. } => EventKind::TradeExecuted,
            Self::RouteExhausted { .. } => EventKind::RouteExhausted,
            Self::IntelDiscovered { .. } => EventKind::IntelDiscovered,
            Self::ResourceThresholdCrossed { .. } => EventKind::ResourceThresholdCrossed,
            Self::AgentIdle { .. } => EventKind::AgentIdle,
        }
    }
}

/// An immutable fleet event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetEvent {
    pub id: Uuid,
    /// Assigned by the event bus when the commander drains the event.
    pub sequence: Option<u64>,
    /// Originating agent; `None` for fleet-wide events.
    pub agent: Option<AgentSymbol>,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl FleetEvent {
    pub fn new(agent: Option<AgentSymbol>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: None,
            agent,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn for_agent(agent: AgentSymbol, payload: EventPayload) -> Self {
        Self::new(Some(agent), payload)
    }

    pub fn fleet_wide(payload: EventPayload) -> Self {
        Self::new(None, payload)
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

impl fmt::Display for FleetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.agent {
            Some(agent) => write!(f, "{}({})", self.kind(), agent),
            None => write!(f, "{}(fleet)", self.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_kinds() {
        assert!(EventKind::ObjectiveCompleted.is_terminal());
        assert!(EventKind::AgentCrashed.is_terminal());
        assert!(!EventKind::DeliveryMade.is_terminal());
    }

    #[test]
    fn test_display_names_agent() {
        let event = FleetEvent::for_agent(
            AgentSymbol::new("A-1"),
            EventPayload::AgentIdle {
                reason: "no routes".to_string(),
            },
        );
        assert_eq!(event.to_string(), "agent_idle(A-1)");
        assert!(event.sequence.is_none());

        let fleet = FleetEvent::fleet_wide(EventPayload::ResourceThresholdCrossed {
            credits: 10,
            floor: 20,
            above: false,
        });
        assert_eq!(fleet.to_string(), "resource_threshold_crossed(fleet)");
    }

    #[test]
    fn test_payload_serializes_with_tag() {
        let payload = EventPayload::DeliveryMade {
            target: DeliveryTarget::Contract("CT-1".to_string()),
            units: 20,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "delivery_made");
        assert_eq!(json["data"]["units"], 20);
        assert_eq!(json["data"]["target"]["id"], "CT-1");
    }
}
