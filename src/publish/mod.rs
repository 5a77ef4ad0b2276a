//! Completion-message publishing.
//!
//! Delivery is best-effort: the executor logs a failed publish and leaves
//! the task COMPLETED.

pub mod pgmq;

pub use pgmq::PgmqPublisher;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{Error, Result};
use crate::model::message::CompletionMessage;

#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, message: &CompletionMessage) -> Result<()>;
}

/// Writes completion messages to the log. Used when no queue is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl ResultPublisher for LogPublisher {
    async fn publish(&self, message: &CompletionMessage) -> Result<()> {
        info!(
            task_id = %message.task_id,
            status = %message.status,
            output_keys = ?message.output_data.keys().collect::<Vec<_>>(),
            "task result"
        );
        Ok(())
    }
}

/// Hands completion messages to an in-process receiver.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<CompletionMessage>,
}

impl ChannelPublisher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CompletionMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ResultPublisher for ChannelPublisher {
    async fn publish(&self, message: &CompletionMessage) -> Result<()> {
        self.tx
            .send(message.clone())
            .map_err(|_| Error::Other("result receiver dropped".to_string()))
    }
}
