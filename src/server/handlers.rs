//! HTTP handlers.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use tracing::{debug, info};

use super::error::ApiResult;
use super::responses::{
    CreateTaskRequest, DeadLettersResponse, HealthResponse, LimitQuery, ListTasksQuery,
    TaskListResponse, TaskResponse, WorkflowsResponse,
};
use crate::engine::Engine;
use crate::model::message::PushAck;
use crate::model::{TaskId, TaskStatus, WorkflowType};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

/// State shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "orchestrator",
        version: env!("CARGO_PKG_VERSION"),
        active_runs: state.engine.active_runs(),
        workflows: WorkflowType::ALL.to_vec(),
    })
}

/// POST /tasks: create a task and start its workflow in the background.
pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<Json<TaskResponse>> {
    let task = state
        .engine
        .create_task(request.workflow_type, request.input_data)
        .await?;
    info!(task_id = %task.id, workflow = %task.workflow_type, "task accepted");
    Ok(Json(task.into()))
}

/// GET /tasks/:task_id
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskResponse>> {
    let task = state.engine.get_task(&TaskId(task_id)).await?;
    Ok(Json(task.into()))
}

/// GET /tasks?status=&limit=
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<TaskListResponse>> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<TaskStatus>)
        .transpose()?;

    let tasks = state
        .engine
        .list_tasks(status, clamp_limit(query.limit))
        .await?;
    let tasks: Vec<TaskResponse> = tasks.into_iter().map(Into::into).collect();
    Ok(Json(TaskListResponse {
        total: tasks.len(),
        tasks,
    }))
}

/// GET /workflows
pub async fn list_workflows(State(state): State<AppState>) -> Json<WorkflowsResponse> {
    let workflows = state
        .engine
        .workflows()
        .definitions()
        .map(|(wt, def)| (wt.as_str().to_string(), def.clone()))
        .collect();
    Json(WorkflowsResponse { workflows })
}

/// GET /dead-letters?limit=
pub async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<DeadLettersResponse>> {
    let dead_letters = state.engine.dead_letters(clamp_limit(query.limit)).await?;
    Ok(Json(DeadLettersResponse {
        total: dead_letters.len(),
        dead_letters,
    }))
}

/// POST /pubsub/push: always answers 200 so the transport does not redeliver.
///
/// The body is read here against the engine's push limit instead of the
/// router's default, so an oversized message is dead-lettered and acked
/// rather than answered with 413.
pub async fn pubsub_push(State(state): State<AppState>, body: Body) -> Json<PushAck> {
    let limit = state.engine.max_push_bytes();
    let ack = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => state.engine.handle_push(&bytes).await,
        Err(e) => {
            let reason = format!("push body unreadable or larger than {limit} bytes: {e}");
            state.engine.reject_push(&[], reason).await
        }
    };
    debug!(status = ack.status.as_str(), task_id = ?ack.task_id, "push acknowledged");
    Json(ack)
}
