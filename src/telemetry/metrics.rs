//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"pipeline-orchestrator"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("pipeline-orchestrator")
}

/// Counter: tasks passed to the store for creation.
/// Labels: `workflow`, `result` ("created" | "duplicate").
pub fn tasks_created() -> Counter<u64> {
    meter()
        .u64_counter("orchestrator.tasks.created")
        .with_description("Number of task creation requests")
        .build()
}

/// Counter: task status transitions.
/// Labels: `from`, `to`.
pub fn task_status_transitions() -> Counter<u64> {
    meter()
        .u64_counter("orchestrator.tasks.status_transitions")
        .with_description("Number of task status transitions")
        .build()
}

/// Counter: logical collaborator calls, after retries.
/// Labels: `service`, `outcome` ("success" | error kind).
pub fn collaborator_calls() -> Counter<u64> {
    meter()
        .u64_counter("orchestrator.collaborator.calls")
        .with_description("Number of collaborator calls by final outcome")
        .build()
}

/// Counter: retries scheduled by the resilience wrapper.
/// Labels: `service`, `kind`.
pub fn collaborator_retries() -> Counter<u64> {
    meter()
        .u64_counter("orchestrator.collaborator.retries")
        .with_description("Number of collaborator call retries")
        .build()
}

/// Counter: push deliveries received.
/// Labels: `result` ("accepted" | "duplicate" | "dead_lettered" | "error").
pub fn push_messages() -> Counter<u64> {
    meter()
        .u64_counter("orchestrator.push.messages")
        .with_description("Number of push deliveries received")
        .build()
}

/// Counter: completion messages handed to the result publisher.
/// Labels: `result` ("ok" | "error").
pub fn results_published() -> Counter<u64> {
    meter()
        .u64_counter("orchestrator.results.published")
        .with_description("Number of completion messages published")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("orchestrator.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
