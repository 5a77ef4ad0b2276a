//! report-analysis: read a report, analyze it, chart it.

use serde_json::json;

use super::StepContext;
use super::steps::{self, REPORT_DATA, str_field};
use crate::collaborator::{AnalyzeRequest, ChartRequest};
use crate::model::{JsonMap, TaskStatus, WorkflowType};
use crate::resilience::CallError;

const DEFAULT_QUERY: &str = "Analyze this report";
const DEFAULT_TITLE: &str = "Financial Report Analysis";

pub(super) async fn run_step(
    step: TaskStatus,
    ctx: &StepContext<'_>,
) -> Result<JsonMap, CallError> {
    match step {
        TaskStatus::Reading => steps::read_report(ctx).await,
        TaskStatus::Analyzing => {
            let input = ctx.input();
            let request = AnalyzeRequest {
                query: str_field(input, "query").unwrap_or(DEFAULT_QUERY).to_string(),
                report_id: str_field(input, "report_id").map(str::to_string),
                context: Some(json!({ REPORT_DATA: ctx.output().get(REPORT_DATA) })),
            };
            steps::analyze(ctx, request).await
        }
        TaskStatus::Visualizing => {
            let rows = steps::report_rows(ctx.output());
            let request = (!rows.is_empty()).then(|| ChartRequest {
                chart_type: "bar".to_string(),
                data: steps::chart_data(rows, ctx.input()),
                title: str_field(ctx.input(), "title")
                    .unwrap_or(DEFAULT_TITLE)
                    .to_string(),
                save_to_storage: true,
            });
            steps::visualize(ctx, request).await
        }
        other => Err(steps::unexpected_step(WorkflowType::ReportAnalysis, other)),
    }
}
