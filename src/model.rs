//! Core data model.
//!
//! A task is one run of a workflow. It has identity (an id that doubles as the
//! idempotency key for redelivered messages), an immutable workflow type and
//! input, a forward-only status, and an output map that only ever grows.

pub mod message;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Opaque structured payload (`input_data` / `output_data`).
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of work tracked by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// Selects the workflow definition. Never changes after creation.
    pub workflow_type: WorkflowType,

    pub status: TaskStatus,

    /// Supplied at creation; the engine never rewrites it.
    pub input_data: JsonMap,

    /// Accumulated step results. Keys are added, never removed or replaced.
    pub output_data: JsonMap,

    /// Present only when `status == Failed`.
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Newtype for task IDs.
///
/// Either supplied by the caller (the idempotency key of a pushed message) or
/// generated by the engine as `task_` followed by 12 hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("task_{}", &hex[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task. Which subset is used depends on the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, executor not yet started.
    Pending,
    /// Fetching source data from the data-fetch service.
    Reading,
    /// Waiting on the inference service.
    Analyzing,
    /// Rendering a chart (or skipping it).
    Visualizing,
    /// Done successfully. Terminal.
    Completed,
    /// A step failed after its retry budget. Terminal.
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Reading,
        TaskStatus::Analyzing,
        TaskStatus::Visualizing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Reading => "reading",
            TaskStatus::Analyzing => "analyzing",
            TaskStatus::Visualizing => "visualizing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Name of the step performed while in this status, if any.
    pub fn step_name(self) -> Option<&'static str> {
        match self {
            TaskStatus::Reading => Some("read_report"),
            TaskStatus::Analyzing => Some("analyze"),
            TaskStatus::Visualizing => Some("visualize"),
            TaskStatus::Pending | TaskStatus::Completed | TaskStatus::Failed => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidInput(format!("unknown task status: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Workflow type
// ---------------------------------------------------------------------------

/// The closed set of workflows the engine knows how to run.
///
/// The underscore names used by older producers are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowType {
    #[serde(rename = "report-analysis", alias = "analyze_report")]
    ReportAnalysis,
    #[serde(rename = "visualization-only", alias = "generate_visualization")]
    VisualizationOnly,
    #[serde(rename = "voice-analysis", alias = "voice_analysis")]
    VoiceAnalysis,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 3] = [
        WorkflowType::ReportAnalysis,
        WorkflowType::VisualizationOnly,
        WorkflowType::VoiceAnalysis,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowType::ReportAnalysis => "report-analysis",
            WorkflowType::VisualizationOnly => "visualization-only",
            WorkflowType::VoiceAnalysis => "voice-analysis",
        }
    }

    fn legacy_name(self) -> &'static str {
        match self {
            WorkflowType::ReportAnalysis => "analyze_report",
            WorkflowType::VisualizationOnly => "generate_visualization",
            WorkflowType::VoiceAnalysis => "voice_analysis",
        }
    }
}

impl std::fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowType::ALL
            .into_iter()
            .find(|wt| wt.as_str() == s || wt.legacy_name() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown workflow type: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Builder / write types
// ---------------------------------------------------------------------------

/// Builder for creating new tasks. The store's input for `create`.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub(crate) id: Option<TaskId>,
    pub(crate) workflow_type: WorkflowType,
    pub(crate) input_data: JsonMap,
}

impl NewTask {
    pub fn new(workflow_type: WorkflowType) -> Self {
        Self {
            id: None,
            workflow_type,
            input_data: JsonMap::new(),
        }
    }

    /// Use a caller-supplied id. Creating twice with the same id is a no-op.
    pub fn id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn input(mut self, input_data: JsonMap) -> Self {
        self.input_data = input_data;
        self
    }

    /// Materialize the PENDING row this builder describes.
    pub(crate) fn into_task(self, now: DateTime<Utc>) -> Task {
        Task {
            id: self.id.unwrap_or_else(TaskId::generate),
            workflow_type: self.workflow_type,
            status: TaskStatus::Pending,
            input_data: self.input_data,
            output_data: JsonMap::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What happened when a task was created.
#[derive(Debug, Clone)]
pub enum CreateResult {
    /// A new PENDING task was inserted.
    Created(Task),
    /// The supplied id already existed; the stored task is returned unchanged.
    Existing(Task),
}

impl CreateResult {
    pub fn is_created(&self) -> bool {
        matches!(self, CreateResult::Created(_))
    }

    pub fn task(&self) -> &Task {
        match self {
            CreateResult::Created(task) | CreateResult::Existing(task) => task,
        }
    }

    pub fn into_task(self) -> Task {
        match self {
            CreateResult::Created(task) | CreateResult::Existing(task) => task,
        }
    }
}

/// A single status write: the target status plus optional output and error.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: TaskStatus,
    pub output_patch: JsonMap,
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: TaskStatus) -> Self {
        Self {
            status,
            output_patch: JsonMap::new(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            output_patch: JsonMap::new(),
            error: Some(error.into()),
        }
    }

    pub fn with_output(mut self, patch: JsonMap) -> Self {
        self.output_patch = patch;
        self
    }
}

/// Merge `patch` into `output` without replacing keys that already exist.
///
/// Returns the keys that were dropped because they were already present.
pub fn merge_output(output: &mut JsonMap, patch: JsonMap) -> Vec<String> {
    let mut kept = Vec::new();
    for (key, value) in patch {
        if output.contains_key(&key) {
            kept.push(key);
        } else {
            output.insert(key, value);
        }
    }
    kept
}
