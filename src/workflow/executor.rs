//! Drives one task from PENDING to a terminal status.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::{Instrument, Span, error, info, warn};

use super::steps::service_for;
use super::{StepContext, run_step};
use crate::collaborator::{CallTimeouts, Collaborators};
use crate::error::{Error, Result};
use crate::model::message::CompletionMessage;
use crate::model::{JsonMap, StatusUpdate, Task, TaskStatus};
use crate::publish::ResultPublisher;
use crate::resilience::{CallError, Resilience};
use crate::store::TaskStore;
use crate::telemetry::{metrics, task as task_span};

/// Attempts at the FAILED write that ends a run whose status write failed.
const FAIL_WRITE_ATTEMPTS: u32 = 3;
const FAIL_WRITE_BACKOFF: Duration = Duration::from_millis(50);

/// Runs workflows. One executor is shared by every run; each run owns its
/// task for its whole lifetime.
#[derive(Clone)]
pub struct WorkflowExecutor {
    store: Arc<dyn TaskStore>,
    collaborators: Arc<dyn Collaborators>,
    publisher: Arc<dyn ResultPublisher>,
    resilience: Resilience,
    timeouts: CallTimeouts,
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        collaborators: Arc<dyn Collaborators>,
        publisher: Arc<dyn ResultPublisher>,
        resilience: Resilience,
        timeouts: CallTimeouts,
    ) -> Self {
        Self {
            store,
            collaborators,
            publisher,
            resilience,
            timeouts,
        }
    }

    /// Walk `task` through its workflow's statuses.
    ///
    /// Each status is written before its step runs; the step's output is
    /// merged at the following write, so the COMPLETED write carries the
    /// last step's result. A failed step fails the whole task, and so does a
    /// status write the store rejects. Returns the task in its terminal
    /// status; `Err` only when not even the FAILED write could be made, in
    /// which case the task is left for [`crate::engine::Engine::recover_interrupted`].
    pub async fn run(&self, task: Task) -> Result<Task> {
        let span = task_span::start_task_span(task.workflow_type, &task.id);
        self.run_inner(task, &span).instrument(span.clone()).await
    }

    async fn run_inner(&self, task: Task, span: &Span) -> Result<Task> {
        let started = Instant::now();
        let workflow = task.workflow_type;
        let mut current = task;
        let mut pending = JsonMap::new();

        info!(task_id = %current.id, workflow = %workflow, "workflow started");

        for &state in workflow.states() {
            let from = current.status;
            let update = StatusUpdate::to(state).with_output(std::mem::take(&mut pending));
            let written = self.store.update_status(&current.id, update).await;
            current = match written {
                Ok(task) => task,
                Err(e) => return self.abort(current, state, e, span).await,
            };
            task_span::record_status_transition(span, from.as_str(), state.as_str());

            if state.is_terminal() {
                break;
            }

            let ctx = StepContext {
                task: &current,
                collaborators: self.collaborators.as_ref(),
                resilience: &self.resilience,
                timeouts: &self.timeouts,
            };
            let outcome = run_step(state, &ctx).await;
            match outcome {
                Ok(patch) => pending = patch,
                Err(err) => return self.fail(current, state, err, span).await,
            }
        }

        metrics::operation_duration_ms().record(
            started.elapsed().as_millis() as f64,
            &[KeyValue::new("operation", format!("workflow.{workflow}"))],
        );
        info!(
            task_id = %current.id,
            workflow = %workflow,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "workflow completed"
        );

        self.publish(&current).await;
        Ok(current)
    }

    async fn fail(
        &self,
        task: Task,
        step: TaskStatus,
        err: CallError,
        span: &Span,
    ) -> Result<Task> {
        let message = failure_message(step, &err);
        warn!(
            task_id = %task.id,
            step = step.step_name().unwrap_or(step.as_str()),
            kind = err.kind(),
            error = %err,
            "step failed, failing task"
        );

        let failed = self.write_failed(&task, message).await?;
        task_span::record_status_transition(span, step.as_str(), TaskStatus::Failed.as_str());
        Ok(failed)
    }

    /// End a run whose write of `target` was rejected by the store.
    async fn abort(
        &self,
        task: Task,
        target: TaskStatus,
        err: Error,
        span: &Span,
    ) -> Result<Task> {
        error!(
            task_id = %task.id,
            from = %task.status,
            to = %target,
            error = %err,
            "status write failed, failing task"
        );
        let message = format!("could not record status {target}: {err}");
        match self.write_failed(&task, message).await {
            Ok(failed) => {
                task_span::record_status_transition(
                    span,
                    task.status.as_str(),
                    TaskStatus::Failed.as_str(),
                );
                Ok(failed)
            }
            Err(_) => Err(err),
        }
    }

    /// Write FAILED with a short bounded retry. A task that is already
    /// terminal is not retried.
    async fn write_failed(&self, task: &Task, message: String) -> Result<Task> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .store
                .update_status(&task.id, StatusUpdate::failed(message.clone()))
                .await
            {
                Ok(failed) => return Ok(failed),
                Err(e)
                    if attempt >= FAIL_WRITE_ATTEMPTS
                        || matches!(e, Error::TaskTerminal { .. }) =>
                {
                    error!(
                        task_id = %task.id,
                        attempt,
                        error = %e,
                        "could not fail task, leaving it for restart recovery"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        task_id = %task.id,
                        attempt,
                        error = %e,
                        "failed write rejected, retrying"
                    );
                    tokio::time::sleep(FAIL_WRITE_BACKOFF * attempt).await;
                }
            }
        }
    }

    async fn publish(&self, task: &Task) {
        let message = CompletionMessage {
            task_id: task.id.clone(),
            status: task.status,
            output_data: task.output_data.clone(),
        };
        let result = match self.publisher.publish(&message).await {
            Ok(()) => "ok",
            Err(e) => {
                error!(task_id = %task.id, error = %e, "failed to publish task result");
                "error"
            }
        };
        metrics::results_published().add(1, &[KeyValue::new("result", result)]);
    }
}

/// Human-readable `error_message` for a task whose step failed.
///
/// Rate limiting and timeouts get their own wording so callers can tell them
/// apart from other failures.
pub fn failure_message(step: TaskStatus, err: &CallError) -> String {
    let step_name = step.step_name().unwrap_or(step.as_str());
    let service = service_for(step).unwrap_or("collaborator");
    match err {
        CallError::RateLimited(detail) => format!(
            "{step_name} failed: {service} service is rate limiting requests, try again later ({detail})"
        ),
        CallError::Timeout(after) => format!(
            "{step_name} failed: {service} service did not respond within {}ms",
            after.as_millis()
        ),
        other => format!("{step_name} failed: {other}"),
    }
}
