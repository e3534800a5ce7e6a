//! Priority-mode limiter: one slot pool, a low and a high FIFO.
//!
//! The high queue always drains first. A low-priority item that is still
//! waiting can be upgraded by submitting the same item again as high priority;
//! it leaves the low queue and joins the back of the high queue.
//!
//! Upgrading only works while the item is pending. An item that has already
//! been handed a slot is in neither queue, so a high-priority resubmission of
//! it is simply a second, independent run of the same callable. That double
//! execution is part of the caller contract, not something the limiter tries
//! to detect.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{Span, debug, info, trace};

use super::item::InstanceId;
use super::{
    Admission, Completion, ItemId, Limit, LimiterStats, Mode, Priority, Release, WorkItem,
};
use crate::telemetry::limiter::start_limiter_span;
use crate::telemetry::metrics::LimiterMetrics;

/// Create a priority-mode limiter and its completion signal.
///
/// Any `limit` that is not a positive integer is treated as 1.
pub fn create_priority_limiter(limit: impl Into<Limit>) -> (PriorityLimiter, Completion) {
    let limiter = PriorityLimiter::new(limit);
    let completion = limiter.completion();
    (limiter, completion)
}

#[derive(Default)]
struct State {
    running: usize,
    low: VecDeque<WorkItem>,
    high: VecDeque<WorkItem>,
}

impl State {
    /// Remove `id` from the low queue if it is still waiting there.
    fn take_low(&mut self, id: ItemId) -> bool {
        match self.low.iter().position(|pending| pending.id() == id) {
            Some(pos) => self.low.remove(pos).is_some(),
            None => false,
        }
    }
}

struct Shared {
    /// Key for the "seen as low priority" mark carried by each item.
    instance: InstanceId,
    limit: Limit,
    state: Mutex<State>,
    metrics: LimiterMetrics,
    span: Span,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Enqueue side of a priority-mode limiter. Clones share one instance.
#[derive(Clone)]
pub struct PriorityLimiter {
    shared: Arc<Shared>,
}

impl PriorityLimiter {
    pub fn new(limit: impl Into<Limit>) -> Self {
        let limit = limit.into();
        Self {
            shared: Arc::new(Shared {
                instance: InstanceId::next(),
                limit,
                state: Mutex::new(State::default()),
                metrics: LimiterMetrics::new(Mode::Priority),
                span: start_limiter_span(Mode::Priority, limit),
            }),
        }
    }

    /// Another handle to this limiter's completion signal.
    pub fn completion(&self) -> Completion {
        Completion::new(self.shared.clone())
    }

    pub fn limit(&self) -> Limit {
        self.shared.limit
    }

    pub fn enqueue_low(&self, item: WorkItem) -> Admission {
        self.enqueue(item, Priority::Low)
    }

    pub fn enqueue_high(&self, item: WorkItem) -> Admission {
        self.enqueue(item, Priority::High)
    }

    /// Submit an item in the given class.
    ///
    /// - `High`: if the item is waiting in the low queue it is pulled out
    ///   first (an upgrade). Either way it is then submitted as high priority.
    /// - `Low`: the first submission marks the item as known to this limiter.
    ///   Any later low submission of the same item is discarded. The mark lives
    ///   on the item, so the limiter holds nothing once the item is dropped.
    ///
    /// A submission that survives classification is invoked on the calling
    /// thread when a slot is free, and queued in its class otherwise.
    pub fn enqueue(&self, item: WorkItem, priority: Priority) -> Admission {
        let shared = &self.shared;
        let id = item.id();
        let mut state = shared.lock();

        match priority {
            Priority::High => {
                if state.take_low(id) {
                    shared.metrics.upgraded();
                    shared
                        .span
                        .in_scope(|| info!(item = %id, "pending item upgraded to high priority"));
                }
            }
            Priority::Low => {
                if !item.mark_known(shared.instance) {
                    drop(state);
                    shared.metrics.discarded();
                    shared
                        .span
                        .in_scope(|| debug!(item = %id, "repeat submission discarded"));
                    return Admission::Discarded;
                }
            }
        }

        if state.running < shared.limit.get() {
            state.running += 1;
            let running = state.running;
            drop(state);

            shared.metrics.started();
            shared.span.in_scope(|| {
                debug!(item = %id, priority = priority.as_str(), running, "item started")
            });
            item.invoke();
            return Admission::Started;
        }

        let queue = match priority {
            Priority::High => &mut state.high,
            Priority::Low => &mut state.low,
        };
        queue.push_back(item);
        let pending = queue.len();
        drop(state);

        shared.metrics.queued(priority);
        shared.span.in_scope(|| {
            debug!(item = %id, priority = priority.as_str(), pending, "item queued")
        });
        Admission::Queued
    }

    pub fn stats(&self) -> LimiterStats {
        let state = self.shared.lock();
        LimiterStats {
            mode: Mode::Priority,
            limit: self.shared.limit.get(),
            running: state.running,
            pending_low: state.low.len(),
            pending_high: state.high.len(),
        }
    }
}

impl Release for Shared {
    fn release(&self) -> Option<WorkItem> {
        let mut state = self.lock();

        let (next, priority) = match state.high.pop_front() {
            Some(item) => (item, Priority::High),
            None => match state.low.pop_front() {
                Some(item) => (item, Priority::Low),
                None => {
                    state.running = state.running.saturating_sub(1);
                    let running = state.running;
                    drop(state);

                    self.metrics.released();
                    self.span.in_scope(|| trace!(running, "slot released"));
                    return None;
                }
            },
        };
        let pending = state.high.len() + state.low.len();
        drop(state);

        self.metrics.started();
        self.span.in_scope(|| {
            debug!(item = %next.id(), priority = priority.as_str(), pending, "item dequeued")
        });
        Some(next)
    }
}

impl std::fmt::Debug for PriorityLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityLimiter")
            .field("stats", &self.stats())
            .finish()
    }
}
