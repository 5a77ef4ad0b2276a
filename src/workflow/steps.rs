//! Step building blocks shared by the workflow modules.

use serde_json::{Value, json};

use super::StepContext;
use crate::collaborator::{AnalyzeRequest, CHART, ChartRequest, DATA_FETCH, INFERENCE, ReadRequest};
use crate::model::{JsonMap, TaskStatus, WorkflowType};
use crate::resilience::CallError;

pub(super) const REPORT_DATA: &str = "report_data";
pub(super) const ANALYSIS: &str = "analysis";
pub(super) const VISUALIZATION: &str = "visualization";

/// Rows charted from a report.
const MAX_CHART_ROWS: usize = 10;

/// Collaborator that performs the step run in `status`.
pub(super) fn service_for(status: TaskStatus) -> Option<&'static str> {
    match status {
        TaskStatus::Reading => Some(DATA_FETCH),
        TaskStatus::Analyzing => Some(INFERENCE),
        TaskStatus::Visualizing => Some(CHART),
        TaskStatus::Pending | TaskStatus::Completed | TaskStatus::Failed => None,
    }
}

pub(super) fn unexpected_step(workflow: WorkflowType, step: TaskStatus) -> CallError {
    CallError::Client(format!("{step} is not a step of the {workflow} workflow"))
}

/// Non-empty string field of the task input.
pub(super) fn str_field<'a>(input: &'a JsonMap, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn single(key: &str, value: Value) -> JsonMap {
    let mut map = JsonMap::new();
    map.insert(key.to_string(), value);
    map
}

/// Build the data-fetch request from task input. A storage path wins over a
/// spreadsheet id; with neither the step fails without calling out.
pub(super) fn read_request(input: &JsonMap) -> Result<ReadRequest, CallError> {
    let sheet_name = str_field(input, "sheet_name").map(str::to_string);

    if let Some(file_path) = str_field(input, "file_path") {
        return Ok(ReadRequest::Storage {
            file_path: file_path.to_string(),
            bucket: str_field(input, "bucket").map(str::to_string),
            sheet_name,
            header_row: input.get("header_row").and_then(Value::as_i64),
        });
    }

    if let Some(spreadsheet_id) = str_field(input, "spreadsheet_id") {
        return Ok(ReadRequest::Sheets {
            spreadsheet_id: spreadsheet_id.to_string(),
            range: str_field(input, "range").map(str::to_string),
            sheet_name,
        });
    }

    Err(CallError::Client(
        "reading a report requires file_path or spreadsheet_id".to_string(),
    ))
}

pub(super) async fn read_report(ctx: &StepContext<'_>) -> Result<JsonMap, CallError> {
    let request = read_request(ctx.input())?;
    let report = ctx
        .resilience
        .call(DATA_FETCH, "read_report", ctx.timeouts.data_fetch, || {
            ctx.collaborators.read_report(&request)
        })
        .await?;
    Ok(single(REPORT_DATA, report))
}

pub(super) async fn analyze(
    ctx: &StepContext<'_>,
    request: AnalyzeRequest,
) -> Result<JsonMap, CallError> {
    let analysis = ctx
        .resilience
        .call(INFERENCE, "analyze", ctx.timeouts.inference, || {
            ctx.collaborators.analyze(&request)
        })
        .await?;
    Ok(single(ANALYSIS, analysis))
}

/// Render a chart, or record a skipped visualization when there is nothing
/// to draw.
pub(super) async fn visualize(
    ctx: &StepContext<'_>,
    request: Option<ChartRequest>,
) -> Result<JsonMap, CallError> {
    let Some(request) = request else {
        tracing::info!(task_id = %ctx.task.id, "no chartable data, skipping visualization");
        return Ok(single(
            VISUALIZATION,
            json!({"status": "skipped", "reason": "no data for visualization"}),
        ));
    };

    let chart = ctx
        .resilience
        .call(CHART, "create_chart", ctx.timeouts.chart, || {
            ctx.collaborators.create_chart(&request)
        })
        .await?;
    Ok(single(VISUALIZATION, chart))
}

/// Row records of the report read earlier in this run
/// (`report_data.data.data`). Empty when the read produced none.
pub(super) fn report_rows(output: &JsonMap) -> &[Value] {
    output
        .get(REPORT_DATA)
        .and_then(|report| report.get("data"))
        .and_then(|data| data.get("data"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// `{labels, values}` for the first rows of a report.
///
/// Labels come from `label_field` when the input names one, else the row
/// index; values from `value_field` (default `value`), 0 when missing or not
/// numeric.
pub(super) fn chart_data(rows: &[Value], input: &JsonMap) -> Value {
    let label_field = str_field(input, "label_field");
    let value_field = str_field(input, "value_field").unwrap_or("value");

    let (labels, values): (Vec<Value>, Vec<Value>) = rows
        .iter()
        .take(MAX_CHART_ROWS)
        .enumerate()
        .map(|(i, row)| {
            let label = label_field
                .and_then(|field| row.get(field))
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| i.to_string());
            let value = row
                .get(value_field)
                .filter(|v| v.is_number())
                .cloned()
                .unwrap_or(json!(0));
            (Value::String(label), value)
        })
        .unzip();

    json!({"labels": labels, "values": values})
}
