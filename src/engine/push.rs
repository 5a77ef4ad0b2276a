//! Decoding of push-delivered messages.
//!
//! The transport posts `{message: {data: base64(json)}, subscription}`. The
//! decoded JSON must carry `task_id` (the idempotency key) and
//! `workflow_type`; every other field becomes the task input.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use crate::model::message::PushEnvelope;
use crate::model::{JsonMap, TaskId, WorkflowType};

/// Largest push body accepted. Room for a 10 MB payload after base64
/// expansion plus the envelope.
pub const MAX_PUSH_BODY_BYTES: usize = 16 * 1024 * 1024;

/// A push message turned into a task request.
#[derive(Debug, Clone, PartialEq)]
pub struct PushedTask {
    pub task_id: TaskId,
    pub workflow_type: WorkflowType,
    pub input: JsonMap,
}

/// Outcome of decoding one push body. Envelope metadata is kept even when
/// the payload is unusable, so the dead letter can reference it.
#[derive(Debug)]
pub struct DecodedPush {
    pub subscription: String,
    pub message_id: Option<String>,
    pub task: Result<PushedTask, String>,
}

pub fn decode(body: &[u8]) -> DecodedPush {
    let envelope: PushEnvelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return DecodedPush {
                subscription: String::new(),
                message_id: None,
                task: Err(format!("invalid push envelope: {e}")),
            };
        }
    };

    DecodedPush {
        task: decode_payload(&envelope.message.data),
        subscription: envelope.subscription,
        message_id: envelope.message.message_id,
    }
}

fn decode_payload(data: &str) -> Result<PushedTask, String> {
    let data = data.trim();
    if data.is_empty() {
        return Err("push message carries no data".to_string());
    }

    let bytes = STANDARD
        .decode(data)
        .map_err(|e| format!("message data is not valid base64: {e}"))?;
    let payload: Value =
        serde_json::from_slice(&bytes).map_err(|e| format!("message data is not JSON: {e}"))?;
    let Value::Object(mut fields) = payload else {
        return Err("message data is not a JSON object".to_string());
    };

    let task_id = match fields.remove("task_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => TaskId(id),
        Some(Value::Number(n)) => TaskId(n.to_string()),
        _ => return Err("message is missing task_id".to_string()),
    };

    let workflow_type = match fields.remove("workflow_type") {
        Some(Value::String(name)) => name
            .parse::<WorkflowType>()
            .map_err(|_| format!("unknown workflow_type: {name}"))?,
        _ => return Err("message is missing workflow_type".to_string()),
    };

    Ok(PushedTask {
        task_id,
        workflow_type,
        input: fields,
    })
}
