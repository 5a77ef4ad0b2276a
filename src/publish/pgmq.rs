use async_trait::async_trait;
use tracing::debug;

use super::ResultPublisher;
use crate::db::Db;
use crate::error::Result;
use crate::model::message::CompletionMessage;

/// Sends completion messages to a pgmq queue in the orchestrator's database.
#[derive(Clone)]
pub struct PgmqPublisher {
    db: Db,
    queue: String,
}

impl PgmqPublisher {
    /// Create the publisher, creating the queue if it does not exist yet.
    pub async fn new(db: Db, queue: impl Into<String>) -> Result<Self> {
        let queue = queue.into();
        db.create_queue(&queue).await?;
        Ok(Self { db, queue })
    }
}

#[async_trait]
impl ResultPublisher for PgmqPublisher {
    async fn publish(&self, message: &CompletionMessage) -> Result<()> {
        let payload = serde_json::to_value(message)?;
        let msg_id = self.db.send_to_queue(&self.queue, &payload).await?;
        debug!(queue = %self.queue, msg_id, task_id = %message.task_id, "published result");
        Ok(())
    }
}
