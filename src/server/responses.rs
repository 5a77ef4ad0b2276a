//! Request and response bodies.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::message::DeadLetter;
use crate::model::{JsonMap, Task, TaskId, TaskStatus, WorkflowType};
use crate::workflow::WorkflowDefinition;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub input_data: JsonMap,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// A task as seen by API clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub workflow_type: WorkflowType,
    /// The step running in the current status, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub output_data: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            current_step: task.status.step_name().map(str::to_string),
            task_id: task.id,
            status: task.status,
            workflow_type: task.workflow_type,
            output_data: task.output_data,
            error_message: task.error_message,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskListResponse {
    /// Number of tasks in this response.
    pub total: usize,
    pub tasks: Vec<TaskResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowsResponse {
    pub workflows: BTreeMap<String, WorkflowDefinition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLettersResponse {
    pub total: usize,
    pub dead_letters: Vec<DeadLetter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub active_runs: usize,
    pub workflows: Vec<WorkflowType>,
}
