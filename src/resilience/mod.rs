//! Call resilience: per-call timeout, bounded exponential-backoff retry, and
//! error classification for every outbound request to a collaborator.

pub mod retry;

pub use retry::{Resilience, RetryPolicy};

use std::time::Duration;
use thiserror::Error;

/// Classified failure of one outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Malformed request or validation failure. Never retried.
    #[error("client error: {0}")]
    Client(String),

    /// The collaborator does not know the requested resource. Never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure or server-side error. Retried.
    #[error("transient error: {0}")]
    Transient(String),

    /// The collaborator explicitly asked us to slow down. Retried.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The per-call deadline passed. Retried.
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl CallError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CallError::Transient(_) | CallError::RateLimited(_) | CallError::Timeout(_)
        )
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            CallError::Client(_) => "client",
            CallError::NotFound(_) => "not_found",
            CallError::Transient(_) => "transient",
            CallError::RateLimited(_) => "rate_limited",
            CallError::Timeout(_) => "timeout",
        }
    }

    /// Which retryable failure to report when retries run out after mixed
    /// failures: rate limiting outranks timeouts, which outrank other
    /// transient errors.
    pub fn precedence(&self) -> u8 {
        match self {
            CallError::RateLimited(_) => 3,
            CallError::Timeout(_) => 2,
            CallError::Transient(_) => 1,
            CallError::Client(_) | CallError::NotFound(_) => 0,
        }
    }
}
