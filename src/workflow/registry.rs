//! Static workflow definitions: which statuses each workflow walks through.

use serde::Serialize;

use crate::model::{TaskStatus, WorkflowType};

impl WorkflowType {
    /// The ordered status sequence of a successful run, ending in COMPLETED.
    /// PENDING precedes it implicitly; FAILED is reachable from any
    /// non-terminal status.
    pub fn states(self) -> &'static [TaskStatus] {
        match self {
            WorkflowType::ReportAnalysis => &[
                TaskStatus::Reading,
                TaskStatus::Analyzing,
                TaskStatus::Visualizing,
                TaskStatus::Completed,
            ],
            WorkflowType::VisualizationOnly => &[
                TaskStatus::Reading,
                TaskStatus::Visualizing,
                TaskStatus::Completed,
            ],
            WorkflowType::VoiceAnalysis => &[TaskStatus::Analyzing, TaskStatus::Completed],
        }
    }

    /// Whether a task of this workflow may move from `from` to `to`.
    ///
    /// Allowed moves are exactly one step forward along [`Self::states`]
    /// (starting from PENDING), or FAILED from any non-terminal status.
    pub fn can_transition(self, from: TaskStatus, to: TaskStatus) -> bool {
        if from.is_terminal() {
            return false;
        }
        if to == TaskStatus::Failed {
            return true;
        }

        let states = self.states();
        match from {
            TaskStatus::Pending => states.first() == Some(&to),
            _ => states
                .iter()
                .position(|s| *s == from)
                .and_then(|i| states.get(i + 1))
                .is_some_and(|next| *next == to),
        }
    }
}

/// One registry entry, in the shape the list-workflows interface returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub steps: Vec<TaskStatus>,
}

/// Immutable map from workflow type to its definition. Built once at
/// startup and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct WorkflowRegistry {
    definitions: Vec<(WorkflowType, WorkflowDefinition)>,
}

impl WorkflowRegistry {
    pub fn standard() -> Self {
        let definitions = WorkflowType::ALL
            .into_iter()
            .map(|wt| {
                (
                    wt,
                    WorkflowDefinition {
                        name: wt.as_str().to_string(),
                        steps: wt.states().to_vec(),
                    },
                )
            })
            .collect();
        Self { definitions }
    }

    pub fn get(&self, workflow: WorkflowType) -> Option<&WorkflowDefinition> {
        self.definitions
            .iter()
            .find(|(wt, _)| *wt == workflow)
            .map(|(_, def)| def)
    }

    pub fn definitions(&self) -> impl Iterator<Item = (WorkflowType, &WorkflowDefinition)> {
        self.definitions.iter().map(|(wt, def)| (*wt, def))
    }
}
