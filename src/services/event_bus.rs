//! Fleet event bus.
//!
//! Fans events from agent tasks and the supervisor into one bounded queue
//! consumed by the commander. A full queue makes publishers wait; events are
//! never dropped while the commander runs. Sequence numbers are assigned when
//! the commander drains, so they reflect consumption order; drained events
//! are also kept in a bounded history ring and re-broadcast to observers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tracing::{trace, warn};

use crate::domain::models::{AgentSymbol, CommanderConfig, EventPayload, FleetEvent};

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Bounded queue depth; publishers wait when it is full.
    pub queue_capacity: usize,
    /// Drained events kept for `history`.
    pub history_capacity: usize,
    /// Per-subscriber lag allowed on the live tail.
    pub tail_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            history_capacity: 500,
            tail_capacity: 256,
        }
    }
}

impl From<&CommanderConfig> for EventBusConfig {
    fn from(config: &CommanderConfig) -> Self {
        Self {
            queue_capacity: config.event_queue_capacity.max(1),
            history_capacity: config.history_capacity.max(1),
            ..Self::default()
        }
    }
}

/// Cloneable publishing side of the bus.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<FleetEvent>,
}

impl EventPublisher {
    /// Enqueue an event, waiting while the queue is full.
    ///
    /// Returns `false` only when the bus has been closed.
    pub async fn publish(&self, event: FleetEvent) -> bool {
        trace!(event = %event, "publishing event");
        match self.tx.send(event).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                warn!(event = %event, "event bus closed, event discarded");
                false
            }
        }
    }
}

/// Publisher bound to one agent; handed to its running mission.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    agent: AgentSymbol,
    publisher: EventPublisher,
}

impl EventEmitter {
    /// Bind `publisher` to `agent`.
    pub fn new(agent: AgentSymbol, publisher: EventPublisher) -> Self {
        Self { agent, publisher }
    }

    pub fn agent(&self) -> &AgentSymbol {
        &self.agent
    }

    /// Publish `payload` about this agent; `false` once the bus is closed.
    pub async fn emit(&self, payload: EventPayload) -> bool {
        self.publisher
            .publish(FleetEvent::for_agent(self.agent.clone(), payload))
            .await
    }
}

/// Single-consumer event queue with a bounded history and a broadcast tail.
///
/// Agents publish through [`EventPublisher`]s; only the commander drains.
pub struct EventBus {
    publisher: EventPublisher,
    rx: AsyncMutex<mpsc::Receiver<FleetEvent>>,
    sequence: AtomicU64,
    history: Mutex<VecDeque<FleetEvent>>,
    history_capacity: usize,
    tail: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (tail, _) = broadcast::channel(config.tail_capacity.max(1));
        Self {
            publisher: EventPublisher { tx },
            rx: AsyncMutex::new(rx),
            sequence: AtomicU64::new(0),
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity)),
            history_capacity: config.history_capacity,
            tail,
        }
    }

    /// A new publishing handle.
    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    /// A publishing handle bound to `agent`.
    pub fn emitter(&self, agent: AgentSymbol) -> EventEmitter {
        EventEmitter::new(agent, self.publisher())
    }

    /// Same as [`EventPublisher::publish`].
    pub async fn publish(&self, event: FleetEvent) -> bool {
        self.publisher.publish(event).await
    }

    /// Take every queued event without waiting.
    pub async fn drain(&self) -> Vec<FleetEvent> {
        let mut rx = self.rx.lock().await;
        let mut batch = Vec::new();
        while let Ok(event) = rx.try_recv() {
            batch.push(event);
        }
        drop(rx);
        self.stamp(batch)
    }

    /// Wait for at least one event, then take everything queued behind it.
    ///
    /// Cancel-safe: dropping the future before the first event arrives loses
    /// nothing. Returns an empty batch only when the bus is closed.
    pub async fn next_batch(&self) -> Vec<FleetEvent> {
        let mut rx = self.rx.lock().await;
        let Some(first) = rx.recv().await else {
            return Vec::new();
        };
        let mut batch = vec![first];
        while let Ok(event) = rx.try_recv() {
            batch.push(event);
        }
        drop(rx);
        self.stamp(batch)
    }

    /// Stamp and record an event raised by the consumer itself.
    ///
    /// Bypasses the queue so the commander never waits on its own input.
    pub fn record(&self, event: FleetEvent) -> FleetEvent {
        let mut stamped = self.stamp(vec![event]);
        stamped.remove(0)
    }

    /// Stop accepting events; already queued events can still be drained.
    pub async fn close(&self) {
        self.rx.lock().await.close();
    }

    fn stamp(&self, mut batch: Vec<FleetEvent>) -> Vec<FleetEvent> {
        if batch.is_empty() {
            return batch;
        }
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        for event in &mut batch {
            event.sequence = Some(self.sequence.fetch_add(1, Ordering::SeqCst));
            if self.history_capacity > 0 {
                if history.len() == self.history_capacity {
                    history.pop_front();
                }
                history.push_back(event.clone());
            }
            // No subscribers is fine.
            let _ = self.tail.send(event.clone());
        }
        batch
    }

    /// Subscribe to drained events.
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tail.subscribe()
    }

    /// The most recent `limit` drained events, oldest first.
    pub fn history(&self, limit: usize) -> Vec<FleetEvent> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Number of events drained so far.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Live tail subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tail.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

/// Shared handle type used across services.
pub type SharedEventBus = Arc<EventBus>;
