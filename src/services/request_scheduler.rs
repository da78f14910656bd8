//! Priority-aware request scheduler.
//!
//! Guards the single shared remote-call budget. The sustained rate and burst
//! are enforced by a `governor` token bucket; ordering among queued callers is
//! strict priority with aging: a waiter passed over by `promotion_after`
//! grants to higher tiers moves up one tier and re-queues behind the waiters
//! already in that tier. Per-agent order is preserved by only ever granting
//! the head of each agent's lane; the head inherits the most urgent tier
//! queued behind it.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::errors::SchedulerError;
use crate::domain::models::{AgentSymbol, SchedulerConfig};

/// Priority classes, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Stranded agents and emergencies.
    Critical,
    /// Revenue-generating market actions.
    High,
    /// Navigation and docking.
    Normal,
    /// Status refreshes.
    Low,
    /// Probe drift and idle polling.
    Background,
}

impl Priority {
    /// One tier more urgent; `Critical` stays put.
    pub fn promoted(self) -> Self {
        match self {
            Self::Critical | Self::High => Self::Critical,
            Self::Normal => Self::High,
            Self::Low => Self::Normal,
            Self::Background => Self::Low,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Background => "background",
        };
        f.write_str(s)
    }
}

/// Authorization to perform exactly one remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permit {
    /// Agent the call is made for.
    pub agent: AgentSymbol,
    /// Priority the caller asked for.
    pub priority: Priority,
    /// Tier the permit was granted at, after any promotion.
    pub granted_at: Priority,
    /// Time spent queued; zero on the fast path.
    pub waited: Duration,
}

struct Waiter {
    agent: AgentSymbol,
    requested: Priority,
    tier: Priority,
    order: u64,
    passed_over: u32,
    enqueued_at: Instant,
    tx: oneshot::Sender<Permit>,
}

/// Queued callers, one FIFO lane per agent.
struct WaitQueue {
    waiters: BTreeMap<u64, Waiter>,
    lanes: HashMap<AgentSymbol, VecDeque<u64>>,
    next_seq: u64,
    next_order: u64,
    promotion_after: u32,
}

impl WaitQueue {
    fn new(promotion_after: u32) -> Self {
        Self {
            waiters: BTreeMap::new(),
            lanes: HashMap::new(),
            next_seq: 0,
            next_order: 0,
            promotion_after: promotion_after.max(1),
        }
    }

    fn len(&self) -> usize {
        self.waiters.len()
    }

    fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    fn push(&mut self, agent: AgentSymbol, priority: Priority, tx: oneshot::Sender<Permit>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let order = self.next_order;
        self.next_order += 1;
        self.lanes.entry(agent.clone()).or_default().push_back(seq);
        self.waiters.insert(
            seq,
            Waiter {
                agent,
                requested: priority,
                tier: priority,
                order,
                passed_over: 0,
                enqueued_at: Instant::now(),
                tx,
            },
        );
        seq
    }

    fn remove(&mut self, seq: u64) -> Option<Waiter> {
        let waiter = self.waiters.remove(&seq)?;
        if let Some(lane) = self.lanes.get_mut(&waiter.agent) {
            lane.retain(|s| *s != seq);
            if lane.is_empty() {
                self.lanes.remove(&waiter.agent);
            }
        }
        Some(waiter)
    }

    /// Remove and return the next waiter to serve, aging everyone it passed.
    fn pop_next(&mut self) -> Option<Waiter> {
        let (tier, _, seq) = self
            .lanes
            .values()
            .filter_map(|lane| {
                let head = self.waiters.get(lane.front()?)?;
                let tier = lane
                    .iter()
                    .filter_map(|s| self.waiters.get(s).map(|w| w.tier))
                    .min()?;
                Some((tier, head.order, *lane.front()?))
            })
            .min()?;
        let waiter = self.remove(seq)?;
        self.age(tier);
        Some(waiter)
    }

    fn age(&mut self, granted: Priority) {
        let next_order = &mut self.next_order;
        for waiter in self.waiters.values_mut() {
            if waiter.tier <= granted {
                continue;
            }
            waiter.passed_over += 1;
            if waiter.passed_over >= self.promotion_after {
                let from = waiter.tier;
                waiter.tier = from.promoted();
                waiter.passed_over = 0;
                waiter.order = *next_order;
                *next_order += 1;
                debug!(
                    agent = %waiter.agent,
                    from = %from,
                    to = %waiter.tier,
                    "promoted waiting request"
                );
            }
        }
    }

    /// Drop every waiter; their receivers observe the scheduler as closed.
    fn clear(&mut self) {
        self.waiters.clear();
        self.lanes.clear();
    }
}

struct SchedulerState {
    queue: WaitQueue,
    started: bool,
    closed: bool,
}

struct Inner {
    limiter: DefaultDirectRateLimiter,
    max_wait: Duration,
    state: Mutex<SchedulerState>,
    notify: Notify,
    dispatching: AtomicBool,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spend one limiter token on the next live waiter.
    ///
    /// A token nobody can take is dropped rather than banked, so grants never
    /// outrun the limiter's own burst.
    fn grant_next(state: &mut SchedulerState) -> bool {
        while let Some(waiter) = state.queue.pop_next() {
            let permit = Permit {
                agent: waiter.agent,
                priority: waiter.requested,
                granted_at: waiter.tier,
                waited: waiter.enqueued_at.elapsed(),
            };
            if waiter.tx.send(permit).is_ok() {
                return true;
            }
        }
        false
    }
}

/// Shared, cloneable handle to the scheduler.
#[derive(Clone)]
pub struct RequestScheduler {
    inner: Arc<Inner>,
}

impl fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScheduler")
            .field("pending", &self.pending())
            .field("max_wait", &self.inner.max_wait)
            .finish()
    }
}

impl RequestScheduler {
    /// Create a scheduler that grants nothing until [`start`](Self::start).
    pub fn new(config: &SchedulerConfig) -> Self {
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN);
        let period = Duration::from_secs_f64(1.0 / config.requests_per_second.max(f64::EPSILON));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst);
        Self {
            inner: Arc::new(Inner {
                limiter: RateLimiter::direct(quota),
                max_wait: config.max_wait(),
                state: Mutex::new(SchedulerState {
                    queue: WaitQueue::new(config.promotion_after_grants),
                    started: false,
                    closed: false,
                }),
                notify: Notify::new(),
                dispatching: AtomicBool::new(false),
            }),
        }
    }

    /// Create and start a scheduler.
    pub fn spawn(config: &SchedulerConfig) -> Self {
        let scheduler = Self::new(config);
        scheduler.start();
        scheduler
    }

    /// Start granting permits. Idempotent.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.inner.dispatching.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.inner.lock().started = true;
        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(dispatch(inner)))
    }

    /// Close the scheduler; every queued and future caller gets `Closed`.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let dropped = state.queue.len();
        state.queue.clear();
        drop(state);
        self.inner.notify.notify_one();
        debug!(dropped, "request scheduler closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of callers currently queued.
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Wait for a permit to make one remote call.
    ///
    /// Dropping the returned future while queued removes the caller without
    /// consuming capacity.
    pub async fn acquire(
        &self,
        priority: Priority,
        agent: &AgentSymbol,
    ) -> Result<Permit, SchedulerError> {
        let mut pending = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(SchedulerError::Closed);
            }
            if state.started && state.queue.is_empty() {
                if self.inner.limiter.check().is_ok() {
                    return Ok(Permit {
                        agent: agent.clone(),
                        priority,
                        granted_at: priority,
                        waited: Duration::ZERO,
                    });
                }
            }
            let (tx, rx) = oneshot::channel();
            let seq = state.queue.push(agent.clone(), priority, tx);
            PendingPermit {
                inner: Arc::clone(&self.inner),
                seq,
                rx,
                settled: false,
            }
        };
        self.inner.notify.notify_one();

        match tokio::time::timeout(self.inner.max_wait, &mut pending.rx).await {
            Ok(Ok(permit)) => {
                pending.settled = true;
                Ok(permit)
            }
            Ok(Err(_)) => {
                pending.settled = true;
                Err(SchedulerError::Closed)
            }
            Err(_) => {
                warn!(agent = %agent, priority = %priority, "permit wait timed out");
                Err(SchedulerError::Timeout {
                    waited: self.inner.max_wait,
                })
            }
        }
    }
}

/// A queued request; removes itself from the queue if abandoned.
struct PendingPermit {
    inner: Arc<Inner>,
    seq: u64,
    rx: oneshot::Receiver<Permit>,
    settled: bool,
}

impl Drop for PendingPermit {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.inner.lock();
        if state.queue.remove(self.seq).is_some() {
            return;
        }
        // Granted between the timeout firing and this drop: pass the token on.
        if self.rx.try_recv().is_ok() && !Inner::grant_next(&mut state) {
            debug!("abandoned permit dropped with no one waiting");
        }
    }
}

async fn dispatch(inner: Arc<Inner>) {
    loop {
        loop {
            let notified = inner.notify.notified();
            {
                let state = inner.lock();
                if state.closed {
                    return;
                }
                if !state.queue.is_empty() {
                    break;
                }
            }
            notified.await;
        }

        inner.limiter.until_ready().await;

        let mut state = inner.lock();
        if state.closed {
            return;
        }
        if !Inner::grant_next(&mut state) {
            debug!("permit token dropped; every waiter left");
        }
    }
}
