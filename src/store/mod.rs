//! Task persistence.
//!
//! [`TaskStore`] is the only shared mutable resource in the engine. Both
//! implementations enforce the forward-only status invariant themselves:
//! every write is validated against the task's workflow and applied as a
//! compare-and-swap on the status it was validated against.

pub mod memory;

pub use memory::MemoryTaskStore;

use async_trait::async_trait;
use opentelemetry::KeyValue;

use crate::error::{Error, Result};
use crate::model::message::DeadLetter;
use crate::model::{CreateResult, NewTask, StatusUpdate, Task, TaskId, TaskStatus, WorkflowType};
use crate::telemetry::metrics;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a PENDING task. If the builder carries an id that already
    /// exists, the stored task is returned unchanged as
    /// [`CreateResult::Existing`].
    async fn create(&self, new: NewTask) -> Result<CreateResult>;

    /// Move a task to `update.status`, merging `update.output_patch` into
    /// its output without replacing existing keys.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `TaskTerminal` once the task is
    /// COMPLETED or FAILED, `InvalidTransition` for a move its workflow does
    /// not allow, and `Conflict` if another writer got there first.
    async fn update_status(&self, id: &TaskId, update: StatusUpdate) -> Result<Task>;

    async fn get(&self, id: &TaskId) -> Result<Task>;

    /// Newest first, optionally filtered by status.
    async fn list(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>>;

    /// Every task that has not reached a terminal status.
    async fn list_active(&self) -> Result<Vec<Task>>;

    async fn record_dead_letter(&self, letter: DeadLetter) -> Result<()>;

    /// Newest first.
    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>>;
}

/// Validate a write against the task's current status.
pub(crate) fn validate_transition(task: &Task, to: TaskStatus) -> Result<()> {
    if task.is_terminal() {
        return Err(Error::TaskTerminal {
            id: task.id.to_string(),
            status: task.status.to_string(),
        });
    }
    if !task.workflow_type.can_transition(task.status, to) {
        return Err(Error::InvalidTransition {
            from: task.status.to_string(),
            to: to.to_string(),
        });
    }
    Ok(())
}

/// Error message stored alongside a status: only FAILED carries one.
pub(crate) fn error_for(update: &StatusUpdate) -> Option<String> {
    match update.status {
        TaskStatus::Failed => Some(
            update
                .error
                .clone()
                .unwrap_or_else(|| "task failed".to_string()),
        ),
        _ => None,
    }
}

pub(crate) fn record_created(workflow: WorkflowType, created: bool) {
    metrics::tasks_created().add(
        1,
        &[
            KeyValue::new("workflow", workflow.as_str()),
            KeyValue::new("result", if created { "created" } else { "duplicate" }),
        ],
    );
}

pub(crate) fn record_transition(from: TaskStatus, to: TaskStatus) {
    metrics::task_status_transitions().add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
}
