//! Single-mode limiter: a fixed slot pool draining one FIFO queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{Span, debug, trace};

use super::{Admission, Completion, Limit, LimiterStats, Mode, Priority, Release, WorkItem};
use crate::telemetry::limiter::start_limiter_span;
use crate::telemetry::metrics::LimiterMetrics;

/// Create a single-mode limiter and its completion signal.
///
/// Any `limit` that is not a positive integer is treated as 1.
pub fn create_limiter(limit: impl Into<Limit>) -> (Limiter, Completion) {
    let limiter = Limiter::new(limit);
    let completion = limiter.completion();
    (limiter, completion)
}

#[derive(Default)]
struct State {
    running: usize,
    pending: VecDeque<WorkItem>,
}

struct Shared {
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

/// Enqueue side of a single-mode limiter. Clones share one instance.
#[derive(Clone)]
pub struct Limiter {
    shared: Arc<Shared>,
}

impl Limiter {
    pub fn new(limit: impl Into<Limit>) -> Self {
        let limit = limit.into();
        Self {
            shared: Arc::new(Shared {
                limit,
                state: Mutex::new(State::default()),
                metrics: LimiterMetrics::new(Mode::Single),
                span: start_limiter_span(Mode::Single, limit),
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

    /// Submit an item.
    ///
    /// With a free slot the item is invoked on the calling thread before this
    /// returns; otherwise it is appended to the queue.
    pub fn enqueue(&self, item: WorkItem) -> Admission {
        let shared = &self.shared;
        let mut state = shared.lock();

        if state.running < shared.limit.get() {
            state.running += 1;
            let running = state.running;
            drop(state);

            shared.metrics.started();
            shared
                .span
                .in_scope(|| debug!(item = %item.id(), running, "item started"));
            item.invoke();
            Admission::Started
        } else {
            let id = item.id();
            state.pending.push_back(item);
            let pending = state.pending.len();
            drop(state);

            shared.metrics.queued(Priority::Low);
            shared
                .span
                .in_scope(|| debug!(item = %id, pending, "item queued"));
            Admission::Queued
        }
    }

    pub fn stats(&self) -> LimiterStats {
        let state = self.shared.lock();
        LimiterStats {
            mode: Mode::Single,
            limit: self.shared.limit.get(),
            running: state.running,
            pending_low: state.pending.len(),
            pending_high: 0,
        }
    }
}

impl Release for Shared {
    fn release(&self) -> Option<WorkItem> {
        let mut state = self.lock();

        match state.pending.pop_front() {
            // The freed slot passes straight to the next item.
            Some(next) => {
                let pending = state.pending.len();
                drop(state);

                self.metrics.started();
                self.span
                    .in_scope(|| debug!(item = %next.id(), pending, "item dequeued"));
                Some(next)
            }
            None => {
                // Extra signals on an idle limiter are tolerated.
                state.running = state.running.saturating_sub(1);
                let running = state.running;
                drop(state);

                self.metrics.released();
                self.span.in_scope(|| trace!(running, "slot released"));
                None
            }
        }
    }
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("stats", &self.stats())
            .finish()
    }
}
