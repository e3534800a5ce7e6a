//! Slot-based limiters.
//!
//! Both variants hand out the same collaborating pair: an enqueue side
//! ([`Limiter`] or [`PriorityLimiter`]) and a [`Completion`] that running
//! items call exactly once when their own work has finished.
//!
//! Queue state is guarded by one mutex per instance. Items are always invoked
//! after that lock is released, so an item may enqueue more work or signal
//! completion synchronously from inside its own invocation. Such nested
//! signals are deferred to the outermost `done()` on the same thread, which
//! keeps dispatching in a loop; the stack does not grow with the queue.

pub mod item;
pub mod limit;
pub mod priority;
pub mod single;
pub mod task;

pub use item::{ItemId, WorkItem};
pub use limit::Limit;
pub use priority::{PriorityLimiter, create_priority_limiter};
pub use single::{Limiter, create_limiter};

use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::Arc;

/// Which queue discipline a limiter uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Single,
    Priority,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Single => "single",
            Mode::Priority => "priority",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Mode::Single),
            "priority" => Ok(Mode::Priority),
            other => Err(format!("unknown limiter mode: {other}")),
        }
    }
}

/// Priority class of a submission in a [`PriorityLimiter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Low,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::High => "high",
        }
    }
}

impl From<bool> for Priority {
    /// `true` means high priority.
    fn from(is_high: bool) -> Self {
        if is_high { Priority::High } else { Priority::Low }
    }
}

/// What the limiter did with a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// A slot was free; the item has been invoked.
    Started,
    /// All slots are busy; the item waits in its queue.
    Queued,
    /// A repeated low-priority submission of a known item; nothing was done.
    Discarded,
}

/// Point-in-time view of a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterStats {
    pub mode: Mode,
    pub limit: usize,
    pub running: usize,
    pub pending_low: usize,
    pub pending_high: usize,
}

impl LimiterStats {
    pub fn pending(&self) -> usize {
        self.pending_low + self.pending_high
    }
}

/// The dispatch half shared by both limiter variants.
pub(crate) trait Release: Send + Sync {
    /// Free one slot. Returns the item that takes it over, if any was waiting.
    fn release(&self) -> Option<WorkItem>;
}

/// Completion signal for a limiter.
///
/// Call [`Completion::done`] once for every item that was started, after that
/// item's own asynchronous work has finished. A missing signal leaks the slot
/// permanently; there is no timeout.
#[derive(Clone)]
pub struct Completion {
    queue: Arc<dyn Release>,
}

impl Completion {
    pub(crate) fn new(queue: Arc<dyn Release>) -> Self {
        Self { queue }
    }

    /// Signal that one running item has finished.
    ///
    /// The next waiting item, if any, is invoked on the calling thread before
    /// this returns. When called from inside an item that is itself being
    /// dispatched by `done()`, the signal is queued and handled by that outer
    /// call once the current item returns. Calling it with nothing running and
    /// nothing queued is a no-op.
    pub fn done(&self) {
        DEFERRED.with(|deferred| deferred.borrow_mut().push_back(Arc::clone(&self.queue)));
        if DISPATCHING.with(Cell::get) {
            return;
        }

        let _dispatching = DispatchGuard::enter();
        while let Some(queue) = DEFERRED.with(|deferred| deferred.borrow_mut().pop_front()) {
            if let Some(next) = queue.release() {
                next.invoke();
            }
        }
    }
}

thread_local! {
    /// Set while a `done()` loop runs on this thread.
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
    /// Signals raised during that loop, in arrival order.
    static DEFERRED: RefCell<VecDeque<Arc<dyn Release>>> =
        const { RefCell::new(VecDeque::new()) };
}

/// Clears the dispatching flag even if an item panics. Signals still queued
/// at that point are picked up by the next `done()` on this thread.
struct DispatchGuard;

impl DispatchGuard {
    fn enter() -> Self {
        DISPATCHING.with(|flag| flag.set(true));
        DispatchGuard
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|flag| flag.set(false));
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}
