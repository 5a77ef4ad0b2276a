//! Span helpers for outbound collaborator calls.

use tracing::Span;

/// Start a span covering every attempt of one logical collaborator call.
///
/// `call.attempts` and `call.outcome` are filled by [`record_call_outcome`].
pub fn start_call_span(service: &str, operation: &str) -> Span {
    tracing::info_span!(
        "collaborator.call",
        "call.service" = service,
        "call.operation" = operation,
        "call.attempts" = tracing::field::Empty,
        "call.outcome" = tracing::field::Empty,
    )
}

pub fn record_call_outcome(span: &Span, attempts: u32, outcome: &str) {
    span.record("call.attempts", attempts);
    span.record("call.outcome", outcome);
}
