//! pgmq queue operations via direct SQLx.
//!
//! Only the producer side is needed: completion messages are sent to a
//! queue that downstream consumers read on their own schedule.

use crate::error::Result;
use opentelemetry::KeyValue;
use tracing::debug;

use crate::telemetry::metrics;

impl super::Db {
    /// Make sure the pgmq extension and the named queue exist (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS pgmq")
            .execute(&self.pool)
            .await?;
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await?;
        debug!(queue = queue_name, "pgmq queue ready");
        Ok(())
    }

    /// Send a message to a pgmq queue. Returns the message ID.
    pub async fn send_to_queue(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
    ) -> Result<i64> {
        let started = std::time::Instant::now();
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, 0)")
            .bind(queue_name)
            .bind(payload)
            .fetch_one(&self.pool)
            .await?;
        metrics::operation_duration_ms().record(
            started.elapsed().as_millis() as f64,
            &[
                KeyValue::new("operation", "pgmq.send"),
                KeyValue::new("queue", queue_name.to_string()),
            ],
        );
        Ok(row.0)
    }
}
