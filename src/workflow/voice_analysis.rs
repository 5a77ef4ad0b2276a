//! voice-analysis: answer a transcribed question with the inference service.

use super::StepContext;
use super::steps::{self, str_field};
use crate::collaborator::AnalyzeRequest;
use crate::model::{JsonMap, TaskStatus, WorkflowType};
use crate::resilience::CallError;

pub(super) async fn run_step(
    step: TaskStatus,
    ctx: &StepContext<'_>,
) -> Result<JsonMap, CallError> {
    match step {
        TaskStatus::Analyzing => {
            let input = ctx.input();
            let query = str_field(input, "query")
                .ok_or_else(|| CallError::Client("voice analysis requires a query".to_string()))?;
            let request = AnalyzeRequest {
                query: query.to_string(),
                report_id: str_field(input, "report_id").map(str::to_string),
                context: input.get("context").filter(|c| !c.is_null()).cloned(),
            };
            steps::analyze(ctx, request).await
        }
        other => Err(steps::unexpected_step(WorkflowType::VoiceAnalysis, other)),
    }
}
