//! Metric instruments for slotq limiters.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a provider the instruments are no-ops.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Meter};

use crate::limiter::{Mode, Priority};

/// Returns the shared meter for slotq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("slotq")
}

/// Counter: items invoked, either on enqueue or on a freed slot.
/// Labels: `mode`.
pub fn items_started() -> Counter<u64> {
    meter()
        .u64_counter("slotq.items.started")
        .with_description("Number of work items handed a slot")
        .build()
}

/// Counter: items that had to wait for a slot.
/// Labels: `mode`, `priority`.
pub fn items_queued() -> Counter<u64> {
    meter()
        .u64_counter("slotq.items.queued")
        .with_description("Number of work items placed in a pending queue")
        .build()
}

/// Counter: low-priority items moved to the high queue.
/// Labels: `mode`.
pub fn items_upgraded() -> Counter<u64> {
    meter()
        .u64_counter("slotq.items.upgraded")
        .with_description("Number of pending low-priority items upgraded")
        .build()
}

/// Counter: repeated low-priority submissions that were dropped.
/// Labels: `mode`.
pub fn items_discarded() -> Counter<u64> {
    meter()
        .u64_counter("slotq.items.discarded")
        .with_description("Number of repeated submissions discarded")
        .build()
}

/// Counter: completion signals that freed a slot with nothing waiting.
/// Labels: `mode`.
pub fn slots_released() -> Counter<u64> {
    meter()
        .u64_counter("slotq.slots.released")
        .with_description("Number of slots returned to the pool")
        .build()
}

/// Instruments bound to one limiter instance.
pub(crate) struct LimiterMetrics {
    started: Counter<u64>,
    queued: Counter<u64>,
    upgraded: Counter<u64>,
    discarded: Counter<u64>,
    released: Counter<u64>,
    mode: KeyValue,
}

impl LimiterMetrics {
    pub(crate) fn new(mode: Mode) -> Self {
        Self {
            started: items_started(),
            queued: items_queued(),
            upgraded: items_upgraded(),
            discarded: items_discarded(),
            released: slots_released(),
            mode: KeyValue::new("mode", mode.as_str()),
        }
    }

    pub(crate) fn started(&self) {
        self.started.add(1, std::slice::from_ref(&self.mode));
    }

    pub(crate) fn queued(&self, priority: Priority) {
        self.queued.add(
            1,
            &[self.mode.clone(), KeyValue::new("priority", priority.as_str())],
        );
    }

    pub(crate) fn upgraded(&self) {
        self.upgraded.add(1, std::slice::from_ref(&self.mode));
    }

    pub(crate) fn discarded(&self) {
        self.discarded.add(1, std::slice::from_ref(&self.mode));
    }

    pub(crate) fn released(&self) {
        self.released.add(1, std::slice::from_ref(&self.mode));
    }
}
