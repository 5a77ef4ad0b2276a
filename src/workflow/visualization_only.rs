//! visualization-only: read a report, chart it.
//!
//! Chart data supplied in the input takes precedence over rows from the read.

use serde_json::Value;

use super::StepContext;
use super::steps::{self, str_field};
use crate::collaborator::ChartRequest;
use crate::model::{JsonMap, TaskStatus, WorkflowType};
use crate::resilience::CallError;

pub(super) async fn run_step(
    step: TaskStatus,
    ctx: &StepContext<'_>,
) -> Result<JsonMap, CallError> {
    match step {
        TaskStatus::Reading => steps::read_report(ctx).await,
        TaskStatus::Visualizing => {
            let input = ctx.input();
            let data = match input.get("data") {
                Some(data) if !data.is_null() => Some(data.clone()),
                _ => {
                    let rows = steps::report_rows(ctx.output());
                    (!rows.is_empty()).then(|| steps::chart_data(rows, input))
                }
            };
            let request = data.map(|data: Value| ChartRequest {
                chart_type: str_field(input, "chart_type").unwrap_or("bar").to_string(),
                data,
                title: str_field(input, "title").unwrap_or("Chart").to_string(),
                save_to_storage: true,
            });
            steps::visualize(ctx, request).await
        }
        other => Err(steps::unexpected_step(WorkflowType::VisualizationOnly, other)),
    }
}
