//! In-process task store.
//!
//! Used by tests, `serve --in-memory`, and single-shot CLI runs. State is
//! lost when the process exits. Tasks are kept for the life of the process;
//! dead letters are capped, dropping the oldest first.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{TaskStore, error_for, record_created, record_transition, validate_transition};
use crate::error::{Error, Result};
use crate::model::message::DeadLetter;
use crate::model::{
    CreateResult, NewTask, StatusUpdate, Task, TaskId, TaskStatus, merge_output,
};

/// Dead letters kept by default before the oldest are dropped.
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 10_000;

pub struct MemoryTaskStore {
    inner: RwLock<Inner>,
    dead_letter_capacity: usize,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, Entry>,
    dead_letters: VecDeque<DeadLetter>,
    next_seq: u64,
}

/// A task plus its insertion order, used to break `created_at` ties.
struct Entry {
    seq: u64,
    task: Task,
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::with_dead_letter_capacity(DEFAULT_DEAD_LETTER_CAPACITY)
    }
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dead_letter_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            dead_letter_capacity: capacity.max(1),
        }
    }

    /// Number of stored tasks.
    pub async fn len(&self) -> usize {
        self.inner.read().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, new: NewTask) -> Result<CreateResult> {
        let workflow = new.workflow_type;
        let mut inner = self.inner.write().await;

        if let Some(ref id) = new.id
            && let Some(entry) = inner.tasks.get(id)
        {
            debug!(task_id = %id, "task already exists, create is a no-op");
            record_created(workflow, false);
            return Ok(CreateResult::Existing(entry.task.clone()));
        }

        let task = new.into_task(Utc::now());
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.tasks.insert(
            task.id.clone(),
            Entry {
                seq,
                task: task.clone(),
            },
        );

        record_created(workflow, true);
        Ok(CreateResult::Created(task))
    }

    async fn update_status(&self, id: &TaskId, update: StatusUpdate) -> Result<Task> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;

        let task = &mut entry.task;
        validate_transition(task, update.status)?;

        let from = task.status;
        let error_message = error_for(&update);
        let kept = merge_output(&mut task.output_data, update.output_patch);
        if !kept.is_empty() {
            warn!(task_id = %id, keys = ?kept, "output keys already present, kept existing values");
        }
        task.status = update.status;
        task.error_message = error_message;
        task.updated_at = Utc::now().max(task.updated_at);

        record_transition(from, task.status);
        Ok(task.clone())
    }

    async fn get(&self, id: &TaskId) -> Result<Task> {
        self.inner
            .read()
            .await
            .tasks
            .get(id)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    async fn list(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<&Entry> = inner
            .tasks
            .values()
            .filter(|entry| status.is_none_or(|s| entry.task.status == s))
            .collect();
        entries.sort_by(|a, b| {
            b.task
                .created_at
                .cmp(&a.task.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(entries
            .into_iter()
            .take(limit)
            .map(|entry| entry.task.clone())
            .collect())
    }

    async fn list_active(&self) -> Result<Vec<Task>> {
        let inner = self.inner.read().await;
        let mut active: Vec<&Entry> = inner
            .tasks
            .values()
            .filter(|entry| !entry.task.is_terminal())
            .collect();
        active.sort_by_key(|entry| entry.seq);
        Ok(active.into_iter().map(|entry| entry.task.clone()).collect())
    }

    async fn record_dead_letter(&self, letter: DeadLetter) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.dead_letters.len() >= self.dead_letter_capacity {
            inner.dead_letters.pop_front();
            debug!(
                capacity = self.dead_letter_capacity,
                "dead letter buffer full, dropped oldest"
            );
        }
        inner.dead_letters.push_back(letter);
        Ok(())
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let inner = self.inner.read().await;
        Ok(inner
            .dead_letters
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}
