//! Shared test doubles: scripted collaborators and a store that records
//! every status it is asked to write.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pipeline_orchestrator::collaborator::{
    AnalyzeRequest, CallTimeouts, ChartRequest, Collaborators, ReadRequest,
};
use pipeline_orchestrator::engine::Engine;
use pipeline_orchestrator::error::{Error, Result};
use pipeline_orchestrator::model::message::{CompletionMessage, DeadLetter};
use pipeline_orchestrator::model::{
    CreateResult, JsonMap, NewTask, StatusUpdate, Task, TaskId, TaskStatus,
};
use pipeline_orchestrator::publish::ChannelPublisher;
use pipeline_orchestrator::resilience::{CallError, Resilience, RetryPolicy};
use pipeline_orchestrator::store::{MemoryTaskStore, TaskStore};
use pipeline_orchestrator::workflow::{WorkflowExecutor, WorkflowRegistry};
use serde_json::{Value, json};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// One scripted collaborator reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(Value),
    Err(CallError),
    /// Never answers within any reasonable timeout.
    Hang,
    /// Panics inside the collaborator call.
    Panic,
}

/// Collaborators that answer from per-service scripts, falling back to a
/// canned success once a script runs out.
#[derive(Default)]
pub struct FakeCollaborators {
    read_script: Mutex<VecDeque<Reply>>,
    analyze_script: Mutex<VecDeque<Reply>>,
    chart_script: Mutex<VecDeque<Reply>>,
    pub read_calls: AtomicU32,
    pub analyze_calls: AtomicU32,
    pub chart_calls: AtomicU32,
    pub read_requests: Mutex<Vec<ReadRequest>>,
    pub analyze_requests: Mutex<Vec<AnalyzeRequest>>,
    pub chart_requests: Mutex<Vec<ChartRequest>>,
}

impl FakeCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_read(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.read_script.lock().unwrap().extend(replies);
        self
    }

    pub fn on_analyze(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.analyze_script.lock().unwrap().extend(replies);
        self
    }

    pub fn on_chart(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.chart_script.lock().unwrap().extend(replies);
        self
    }

    pub fn reads(&self) -> u32 {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn analyses(&self) -> u32 {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    pub fn charts(&self) -> u32 {
        self.chart_calls.load(Ordering::SeqCst)
    }
}

/// A data-fetch response with `n` rows of `{name, value}`.
pub fn report_with_rows(n: usize) -> Value {
    let rows: Vec<Value> = (0..n)
        .map(|i| json!({"name": format!("row{i}"), "value": (i + 1) * 10}))
        .collect();
    json!({
        "success": true,
        "data": {"rows": n, "columns": ["name", "value"], "data": rows}
    })
}

pub fn default_analysis() -> Value {
    json!({"insights": ["revenue grew"], "summary": "steady quarter"})
}

pub fn default_chart() -> Value {
    json!({"chart_id": "chart_1", "public_url": "https://charts.example/chart_1.png"})
}

async fn answer(
    script: &Mutex<VecDeque<Reply>>,
    fallback: Value,
) -> std::result::Result<Value, CallError> {
    let reply = script.lock().unwrap().pop_front();
    match reply {
        None => Ok(fallback),
        Some(Reply::Ok(value)) => Ok(value),
        Some(Reply::Err(err)) => Err(err),
        Some(Reply::Hang) => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }
        Some(Reply::Panic) => panic!("collaborator blew up"),
    }
}

#[async_trait]
impl Collaborators for FakeCollaborators {
    async fn read_report(&self, request: &ReadRequest) -> std::result::Result<Value, CallError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.read_requests.lock().unwrap().push(request.clone());
        answer(&self.read_script, report_with_rows(3)).await
    }

    async fn analyze(&self, request: &AnalyzeRequest) -> std::result::Result<Value, CallError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        self.analyze_requests.lock().unwrap().push(request.clone());
        answer(&self.analyze_script, default_analysis()).await
    }

    async fn create_chart(&self, request: &ChartRequest) -> std::result::Result<Value, CallError> {
        self.chart_calls.fetch_add(1, Ordering::SeqCst);
        self.chart_requests.lock().unwrap().push(request.clone());
        answer(&self.chart_script, default_chart()).await
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Wraps [`MemoryTaskStore`] and records every accepted status write.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryTaskStore,
    history: Mutex<HashMap<TaskId, Vec<TaskStatus>>>,
    failing_writes: Mutex<Vec<TaskStatus>>,
}

impl RecordingStore {
    /// Reject the next write to `status` with a database-style error.
    pub fn fail_next_write_to(&self, status: TaskStatus) {
        self.failing_writes.lock().unwrap().push(status);
    }

    pub fn statuses(&self, id: &TaskId) -> Vec<TaskStatus> {
        self.history
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl TaskStore for RecordingStore {
    async fn create(&self, new: NewTask) -> Result<CreateResult> {
        self.inner.create(new).await
    }

    async fn update_status(&self, id: &TaskId, update: StatusUpdate) -> Result<Task> {
        {
            let mut failing = self.failing_writes.lock().unwrap();
            if let Some(pos) = failing.iter().position(|s| *s == update.status) {
                failing.remove(pos);
                return Err(Error::Other("connection reset by peer".into()));
            }
        }
        let task = self.inner.update_status(id, update).await?;
        self.history
            .lock()
            .unwrap()
            .entry(id.clone())
            .or_default()
            .push(task.status);
        Ok(task)
    }

    async fn get(&self, id: &TaskId) -> Result<Task> {
        self.inner.get(id).await
    }

    async fn list(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>> {
        self.inner.list(status, limit).await
    }

    async fn list_active(&self) -> Result<Vec<Task>> {
        self.inner.list_active().await
    }

    async fn record_dead_letter(&self, letter: DeadLetter) -> Result<()> {
        self.inner.record_dead_letter(letter).await
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        self.inner.list_dead_letters(limit).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<RecordingStore>,
    pub collaborators: Arc<FakeCollaborators>,
    pub results: mpsc::UnboundedReceiver<CompletionMessage>,
}

/// Retry budget with short delays so paused-clock tests stay readable.
pub fn test_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1))
}

pub fn test_timeouts() -> CallTimeouts {
    CallTimeouts {
        data_fetch: Duration::from_secs(2),
        inference: Duration::from_secs(1),
        chart: Duration::from_secs(2),
    }
}

pub fn harness(collaborators: FakeCollaborators) -> Harness {
    let store = Arc::new(RecordingStore::default());
    let collaborators = Arc::new(collaborators);
    let (publisher, results) = ChannelPublisher::channel();

    let executor = WorkflowExecutor::new(
        store.clone(),
        collaborators.clone(),
        Arc::new(publisher),
        Resilience::new(test_policy()),
        test_timeouts(),
    );
    let engine = Engine::new(
        store.clone(),
        Arc::new(WorkflowRegistry::standard()),
        executor,
    );

    Harness {
        engine,
        store,
        collaborators,
        results,
    }
}

pub fn input(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        other => panic!("test input must be a JSON object, got {other}"),
    }
}

/// A push-endpoint body carrying `payload` as base64 JSON.
pub fn push_body(payload: &Value) -> Vec<u8> {
    use base64::Engine as _;
    let data = base64::engine::general_purpose::STANDARD.encode(payload.to_string());
    serde_json::to_vec(&json!({
        "message": {"data": data, "messageId": "msg-1", "publishTime": "2024-05-01T10:00:00Z"},
        "subscription": "projects/demo/subscriptions/orchestrator-push"
    }))
    .unwrap()
}
