//! Workflow definitions and the executors that drive tasks through them.
//!
//! Each workflow type lives in its own module and implements the same
//! run-one-step contract. Dispatch is a closed `match` over [`WorkflowType`].

pub mod executor;
pub mod registry;

mod report_analysis;
mod steps;
mod visualization_only;
mod voice_analysis;

pub use executor::WorkflowExecutor;
pub use registry::{WorkflowDefinition, WorkflowRegistry};

use crate::collaborator::{CallTimeouts, Collaborators};
use crate::model::{JsonMap, Task, TaskStatus, WorkflowType};
use crate::resilience::{CallError, Resilience};

/// Everything a step needs: the task as of its latest status write (output
/// from earlier steps included) and the means to reach collaborators.
pub struct StepContext<'a> {
    pub task: &'a Task,
    pub collaborators: &'a dyn Collaborators,
    pub resilience: &'a Resilience,
    pub timeouts: &'a CallTimeouts,
}

impl StepContext<'_> {
    fn input(&self) -> &JsonMap {
        &self.task.input_data
    }

    fn output(&self) -> &JsonMap {
        &self.task.output_data
    }
}

/// Run the step named by `step` for the context's workflow, returning the
/// output patch to merge at the next status write.
pub async fn run_step(step: TaskStatus, ctx: &StepContext<'_>) -> Result<JsonMap, CallError> {
    match ctx.task.workflow_type {
        WorkflowType::ReportAnalysis => report_analysis::run_step(step, ctx).await,
        WorkflowType::VisualizationOnly => visualization_only::run_step(step, ctx).await,
        WorkflowType::VoiceAnalysis => voice_analysis::run_step(step, ctx).await,
    }
}
