//! Limiter span helpers.
//!
//! Every limiter instance owns one span; its admission and dispatch events
//! are emitted inside it so they can be told apart when several limiters
//! share a process.

use tracing::Span;

use crate::limiter::{Limit, Mode};

/// Start the span that scopes one limiter instance.
pub fn start_limiter_span(mode: Mode, limit: Limit) -> Span {
    tracing::info_span!(
        "limiter",
        "limiter.mode" = mode.as_str(),
        "limiter.limit" = limit.get(),
    )
}

/// Start a span for a run driven by the CLI.
///
/// `run.elapsed_ms` is declared empty and filled by [`record_run_elapsed`].
pub fn start_run_span(command: &str, mode: Mode, limit: Limit) -> Span {
    tracing::info_span!(
        "slotq.run",
        "run.command" = command,
        "limiter.mode" = mode.as_str(),
        "limiter.limit" = limit.get(),
        "run.elapsed_ms" = tracing::field::Empty,
    )
}

pub fn record_run_elapsed(span: &Span, elapsed_ms: u64) {
    span.record("run.elapsed_ms", elapsed_ms);
}
