//! Task execution span helpers.
//!
//! Provides span creation and status-transition recording for tasks flowing
//! through a workflow executor.

use tracing::Span;

use crate::model::{TaskId, WorkflowType};

/// Start a span for one executor run.
///
/// The `task.status` field is declared empty and updated by
/// [`record_status_transition`].
pub fn start_task_span(workflow: WorkflowType, task_id: &TaskId) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.workflow" = workflow.as_str(),
        "task.id" = %task_id,
        "task.status" = tracing::field::Empty,
    )
}

/// Record a status transition on the task span.
pub fn record_status_transition(span: &Span, from: &str, to: &str) {
    span.record("task.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "status_transition");
    });
}
