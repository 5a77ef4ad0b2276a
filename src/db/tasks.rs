//! Postgres-backed [`TaskStore`].
//!
//! Creation relies on the primary key (`ON CONFLICT (id) DO NOTHING`) so that
//! concurrent redeliveries of one message resolve to a single row. Status
//! writes are compare-and-swap on the status they were validated against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::message::DeadLetter;
use crate::model::{CreateResult, JsonMap, NewTask, StatusUpdate, Task, TaskId, TaskStatus};
use crate::store::{TaskStore, error_for, record_created, record_transition, validate_transition};

const TASK_COLUMNS: &str =
    "id, workflow_type, status, input_data, output_data, error_message, created_at, updated_at";

impl super::Db {
    async fn fetch_task(&self, id: &TaskId) -> Result<Option<Task>> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TaskRow::try_into_task).transpose()
    }
}

#[async_trait]
impl TaskStore for super::Db {
    async fn create(&self, new: NewTask) -> Result<CreateResult> {
        let workflow = new.workflow_type;
        let task = new.into_task(Utc::now());

        let inserted: Option<TaskRow> = sqlx::query_as(&format!(
            "INSERT INTO tasks (id, workflow_type, status, input_data, output_data, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6)
             ON CONFLICT (id) DO NOTHING
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task.id.as_str())
        .bind(task.workflow_type.as_str())
        .bind(task.status.as_str())
        .bind(Value::Object(task.input_data.clone()))
        .bind(Value::Object(task.output_data.clone()))
        .bind(task.created_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => {
                record_created(workflow, true);
                Ok(CreateResult::Created(row.try_into_task()?))
            }
            None => {
                debug!(task_id = %task.id, "task already exists, create is a no-op");
                record_created(workflow, false);
                let existing = self
                    .fetch_task(&task.id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("task {}", task.id)))?;
                Ok(CreateResult::Existing(existing))
            }
        }
    }

    async fn update_status(&self, id: &TaskId, update: StatusUpdate) -> Result<Task> {
        let current = self
            .fetch_task(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        validate_transition(&current, update.status)?;

        let kept: Vec<&String> = update
            .output_patch
            .keys()
            .filter(|key| current.output_data.contains_key(*key))
            .collect();
        if !kept.is_empty() {
            warn!(task_id = %id, keys = ?kept, "output keys already present, kept existing values");
        }

        // `patch || output` lets existing keys win over the patch.
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE tasks
             SET status = $1,
                 output_data = $2::jsonb || output_data,
                 error_message = $3,
                 updated_at = GREATEST(now(), updated_at)
             WHERE id = $4 AND status = $5
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(update.status.as_str())
        .bind(Value::Object(update.output_patch.clone()))
        .bind(error_for(&update))
        .bind(id.as_str())
        .bind(current.status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(Error::Conflict(format!(
                "task {id} left status {} before the write to {} landed",
                current.status, update.status
            )));
        };

        record_transition(current.status, update.status);
        row.try_into_task()
    }

    async fn get(&self, id: &TaskId) -> Result<Task> {
        self.fetch_task(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    async fn list(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at DESC, seq DESC
             LIMIT $2"
        ))
        .bind(status.map(TaskStatus::as_str))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TaskRow::try_into_task).collect()
    }

    async fn list_active(&self) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE status NOT IN ('completed', 'failed')
             ORDER BY seq"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TaskRow::try_into_task).collect()
    }

    async fn record_dead_letter(&self, letter: DeadLetter) -> Result<()> {
        sqlx::query(
            "INSERT INTO dead_letters (subscription, message_id, payload, reason, received_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&letter.subscription)
        .bind(&letter.message_id)
        .bind(&letter.payload)
        .bind(&letter.reason)
        .bind(letter.received_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let rows: Vec<DeadLetterRow> = sqlx::query_as(
            "SELECT subscription, message_id, payload, reason, received_at
             FROM dead_letters
             ORDER BY id DESC
             LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DeadLetterRow::into_dead_letter).collect())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    workflow_type: String,
    status: String,
    input_data: Value,
    output_data: Value,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn try_into_task(self) -> Result<Task> {
        Ok(Task {
            workflow_type: self.workflow_type.parse()?,
            status: self.status.parse()?,
            input_data: into_map(self.input_data, "input_data", &self.id)?,
            output_data: into_map(self.output_data, "output_data", &self.id)?,
            id: TaskId(self.id),
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn into_map(value: Value, column: &str, id: &str) -> Result<JsonMap> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(JsonMap::new()),
        other => Err(Error::Other(format!(
            "task {id}: {column} is not a JSON object: {other}"
        ))),
    }
}

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    subscription: String,
    message_id: Option<String>,
    payload: String,
    reason: String,
    received_at: DateTime<Utc>,
}

impl DeadLetterRow {
    fn into_dead_letter(self) -> DeadLetter {
        DeadLetter {
            subscription: self.subscription,
            message_id: self.message_id,
            payload: self.payload,
            reason: self.reason,
            received_at: self.received_at,
        }
    }
}
