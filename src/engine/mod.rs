//! Ingestion layer: direct task creation, push delivery, and the scheduling
//! of one executor run per newly created task.
//!
//! Runs are spawned onto the tokio runtime without a concurrency cap. Every
//! created task gets exactly one run; redeliveries that resolve to an
//! existing task schedule nothing.

pub mod push;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use opentelemetry::KeyValue;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::model::message::{DeadLetter, PushAck, PushAckStatus};
use crate::model::{
    CreateResult, JsonMap, NewTask, StatusUpdate, Task, TaskId, TaskStatus, WorkflowType,
};
use crate::store::TaskStore;
use crate::telemetry::metrics;
use crate::workflow::{WorkflowExecutor, WorkflowRegistry};

pub use push::{DecodedPush, MAX_PUSH_BODY_BYTES, PushedTask};

const INTERRUPTED: &str = "interrupted by orchestrator restart";

/// How much of an oversized push body is kept in its dead letter.
const OVERSIZED_PAYLOAD_PREVIEW: usize = 1024;

/// The orchestration engine. Cheap to clone; clones share state.
pub struct Engine {
    store: Arc<dyn TaskStore>,
    registry: Arc<WorkflowRegistry>,
    executor: WorkflowExecutor,
    active_runs: Arc<AtomicUsize>,
    runs: Arc<Mutex<JoinSet<()>>>,
    max_push_bytes: usize,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            executor: self.executor.clone(),
            active_runs: Arc::clone(&self.active_runs),
            runs: Arc::clone(&self.runs),
            max_push_bytes: self.max_push_bytes,
        }
    }
}

impl Engine {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<WorkflowRegistry>,
        executor: WorkflowExecutor,
    ) -> Self {
        Self {
            store,
            registry,
            executor,
            active_runs: Arc::new(AtomicUsize::new(0)),
            runs: Arc::new(Mutex::new(JoinSet::new())),
            max_push_bytes: MAX_PUSH_BODY_BYTES,
        }
    }

    /// Override the push body size limit.
    pub fn with_max_push_bytes(mut self, limit: usize) -> Self {
        self.max_push_bytes = limit;
        self
    }

    pub fn max_push_bytes(&self) -> usize {
        self.max_push_bytes
    }

    /// Create a task and, if it is new, schedule its run.
    pub async fn submit(&self, new: NewTask) -> Result<CreateResult> {
        let result = self.store.create(new).await?;
        match &result {
            CreateResult::Created(task) => {
                info!(task_id = %task.id, workflow = %task.workflow_type, "task created");
                self.spawn_run(task.clone());
            }
            CreateResult::Existing(task) => {
                info!(
                    task_id = %task.id,
                    status = %task.status,
                    "task already exists, not scheduling"
                );
            }
        }
        Ok(result)
    }

    /// Direct creation with an engine-generated id. Returns the PENDING task
    /// immediately; progress is observed through [`Engine::get_task`].
    pub async fn create_task(&self, workflow_type: WorkflowType, input: JsonMap) -> Result<Task> {
        let result = self.submit(NewTask::new(workflow_type).input(input)).await?;
        Ok(result.into_task())
    }

    /// Create a task and drive it to a terminal status on the caller's task
    /// instead of spawning. An existing id is returned as stored.
    pub async fn run_to_completion(&self, new: NewTask) -> Result<Task> {
        match self.store.create(new).await? {
            CreateResult::Created(task) => self.executor.run(task).await,
            CreateResult::Existing(task) => Ok(task),
        }
    }

    /// Handle one push delivery. Never fails: the transport always gets an
    /// acknowledgement, and messages that cannot become tasks are kept as
    /// dead letters instead of being dropped.
    pub async fn handle_push(&self, body: &[u8]) -> PushAck {
        if body.len() > self.max_push_bytes {
            let reason = format!(
                "push body of {} bytes exceeds the {} byte limit",
                body.len(),
                self.max_push_bytes
            );
            let preview = &body[..OVERSIZED_PAYLOAD_PREVIEW.min(body.len())];
            return self.reject_push(preview, reason).await;
        }

        let decoded = push::decode(body);
        let ack = match decoded.task {
            Ok(ref pushed) => self.accept_push(pushed, &decoded, body).await,
            Err(ref reason) => {
                warn!(
                    subscription = %decoded.subscription,
                    message_id = ?decoded.message_id,
                    reason = %reason,
                    "undecodable push message"
                );
                self.dead_letter(&decoded, body, reason.clone()).await;
                PushAck {
                    status: PushAckStatus::DeadLettered,
                    task_id: None,
                    message: Some(reason.clone()),
                }
            }
        };

        metrics::push_messages().add(1, &[KeyValue::new("result", ack.status.as_str())]);
        ack
    }

    /// Acknowledge a push body that could not be read or is too large to
    /// decode. `payload` is whatever part of it should be kept.
    pub async fn reject_push(&self, payload: &[u8], reason: String) -> PushAck {
        warn!(bytes = payload.len(), reason = %reason, "rejected push message");
        let unread = DecodedPush {
            subscription: String::new(),
            message_id: None,
            task: Err(reason.clone()),
        };
        self.dead_letter(&unread, payload, reason.clone()).await;
        metrics::push_messages().add(
            1,
            &[KeyValue::new("result", PushAckStatus::DeadLettered.as_str())],
        );
        PushAck {
            status: PushAckStatus::DeadLettered,
            task_id: None,
            message: Some(reason),
        }
    }

    async fn accept_push(
        &self,
        pushed: &PushedTask,
        decoded: &DecodedPush,
        body: &[u8],
    ) -> PushAck {
        let new = NewTask::new(pushed.workflow_type)
            .id(pushed.task_id.clone())
            .input(pushed.input.clone());

        match self.submit(new).await {
            Ok(CreateResult::Created(task)) => PushAck {
                status: PushAckStatus::Accepted,
                task_id: Some(task.id),
                message: None,
            },
            Ok(CreateResult::Existing(task)) => PushAck {
                status: PushAckStatus::Duplicate,
                task_id: Some(task.id),
                message: Some(format!("task already exists with status {}", task.status)),
            },
            Err(e) => {
                error!(
                    task_id = %pushed.task_id,
                    error = %e,
                    "failed to create task from push message"
                );
                self.dead_letter(decoded, body, format!("task creation failed: {e}"))
                    .await;
                PushAck {
                    status: PushAckStatus::Error,
                    task_id: Some(pushed.task_id.clone()),
                    message: Some(e.to_string()),
                }
            }
        }
    }

    async fn dead_letter(&self, decoded: &DecodedPush, body: &[u8], reason: String) {
        let letter = DeadLetter {
            subscription: decoded.subscription.clone(),
            message_id: decoded.message_id.clone(),
            payload: String::from_utf8_lossy(body).into_owned(),
            reason,
            received_at: Utc::now(),
        };
        if let Err(e) = self.store.record_dead_letter(letter).await {
            error!(error = %e, "failed to record dead letter");
        }
    }

    pub async fn get_task(&self, id: &TaskId) -> Result<Task> {
        self.store.get(id).await
    }

    pub async fn list_tasks(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>> {
        self.store.list(status, limit).await
    }

    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        self.store.list_dead_letters(limit).await
    }

    pub fn workflows(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Executor runs currently in flight.
    pub fn active_runs(&self) -> usize {
        self.active_runs.load(Ordering::SeqCst)
    }

    /// Fail every task a previous process left non-terminal.
    ///
    /// Runs do not survive a restart, so such tasks would otherwise stay in
    /// an intermediate status forever. Call once at startup, before accepting
    /// work. Returns the number of tasks failed.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let stranded = self.store.list_active().await?;
        let mut failed = 0;
        for task in stranded {
            match self
                .store
                .update_status(&task.id, StatusUpdate::failed(INTERRUPTED))
                .await
            {
                Ok(_) => {
                    warn!(task_id = %task.id, status = %task.status, "failed interrupted task");
                    failed += 1;
                }
                Err(e) => error!(task_id = %task.id, error = %e, "could not fail interrupted task"),
            }
        }
        if failed > 0 {
            info!(count = failed, "recovered interrupted tasks");
        }
        Ok(failed)
    }

    /// Wait until every spawned run has finished.
    pub async fn wait_for_runs(&self) {
        loop {
            let mut runs = {
                let mut guard = self.runs.lock().unwrap_or_else(|p| p.into_inner());
                std::mem::take(&mut *guard)
            };
            if runs.is_empty() {
                return;
            }
            while let Some(joined) = runs.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "workflow run panicked");
                }
            }
        }
    }

    fn spawn_run(&self, task: Task) {
        let executor = self.executor.clone();
        let active = ActiveRun::start(Arc::clone(&self.active_runs));

        let run = async move {
            let _active = active;
            let id = task.id.clone();
            if let Err(e) = executor.run(task).await {
                error!(task_id = %id, error = %e, "workflow run aborted");
            }
        };

        let mut runs = self.runs.lock().unwrap_or_else(|p| p.into_inner());
        while runs.try_join_next().is_some() {}
        runs.spawn(run);
    }
}

/// Counts one run in `active_runs` until dropped, including when the run
/// panics or is cancelled.
struct ActiveRun(Arc<AtomicUsize>);

impl ActiveRun {
    fn start(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
