//! # slotq
//!
//! Concurrency limiter for caller-driven asynchronous work.
//!
//! At most `limit` work items run at once. Everything else waits in a FIFO
//! queue, or in the priority variant, in a low and a high FIFO where the high
//! queue always drains first. Running items report back through an explicit
//! completion signal; the limiter never awaits or supervises them.

pub mod config;
pub mod error;
pub mod limiter;
pub mod telemetry;

pub use limiter::{
    Admission, Completion, ItemId, Limit, Limiter, LimiterStats, Mode, Priority, PriorityLimiter,
    WorkItem, create_limiter, create_priority_limiter,
};
