//! Wire types for push delivery, completion messages, and dead letters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JsonMap, TaskId, TaskStatus};

/// Transport envelope posted to the push endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: String,
}

/// The message inside a push envelope. `data` is base64-encoded JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(default)]
    pub data: String,
    #[serde(default, rename = "messageId", alias = "message_id")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub attributes: Option<JsonMap>,
    #[serde(default, rename = "publishTime", alias = "publish_time")]
    pub publish_time: Option<String>,
}

/// Response body for the push endpoint. Always sent with a success status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushAck {
    pub status: PushAckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushAckStatus {
    /// New task created and scheduled.
    Accepted,
    /// Redelivery of a task that already exists; nothing scheduled.
    Duplicate,
    /// Message could not be turned into a task; kept as a dead letter.
    DeadLettered,
    /// Internal failure while handling a decodable message.
    Error,
}

impl PushAckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PushAckStatus::Accepted => "accepted",
            PushAckStatus::Duplicate => "duplicate",
            PushAckStatus::DeadLettered => "dead_lettered",
            PushAckStatus::Error => "error",
        }
    }
}

/// Fire-and-forget message emitted when a task reaches COMPLETED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub output_data: JsonMap,
}

/// A push message that was acknowledged but could not become a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub subscription: String,
    pub message_id: Option<String>,
    /// The raw request body, lossily decoded as UTF-8.
    pub payload: String,
    pub reason: String,
    pub received_at: DateTime<Utc>,
}
