use std::future::Future;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::{Instrument, debug, error, warn};

use super::CallError;
use crate::telemetry::{collaborator, metrics};

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles for each further attempt.
    pub base_delay: Duration,
    /// Upper bound for any single backoff wait.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Backoff to wait after the given (1-based) failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Wraps outbound calls with timeout, classification, and retry.
///
/// Cheap to clone; holds no shared state, so concurrent calls never contend.
#[derive(Debug, Clone, Default)]
pub struct Resilience {
    policy: RetryPolicy,
}

impl Resilience {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Each attempt is bounded by `timeout`.
    ///
    /// On exhaustion the highest-ranked failure seen is returned (see
    /// [`CallError::precedence`]), so a collaborator that answered "too many
    /// requests" on any attempt surfaces as [`CallError::RateLimited`] even
    /// if its last answer was a 503.
    pub async fn call<T, F, Fut>(
        &self,
        service: &str,
        operation: &str,
        timeout: Duration,
        mut op: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let span = collaborator::start_call_span(service, operation);
        let started = Instant::now();

        let result = async {
            let mut attempt = 0;
            let mut worst: Option<CallError> = None;
            loop {
                attempt += 1;
                let outcome = match tokio::time::timeout(timeout, op()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(CallError::Timeout(timeout)),
                };

                match outcome {
                    Ok(value) => {
                        debug!(service, operation, attempt, "call succeeded");
                        return (attempt, Ok(value));
                    }
                    Err(err) if !err.is_retryable() => {
                        warn!(
                            service,
                            operation,
                            attempt,
                            error = %err,
                            "call failed, not retrying"
                        );
                        return (attempt, Err(err));
                    }
                    Err(err) if attempt >= self.policy.max_attempts => {
                        let err = match worst {
                            Some(seen) if seen.precedence() > err.precedence() => seen,
                            _ => err,
                        };
                        error!(
                            service,
                            operation,
                            attempt,
                            error = %err,
                            "call failed, retry budget exhausted"
                        );
                        return (attempt, Err(err));
                    }
                    Err(err) => {
                        let delay = self.policy.delay(attempt);
                        warn!(
                            service,
                            operation,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "call failed, backing off"
                        );
                        metrics::collaborator_retries().add(
                            1,
                            &[
                                KeyValue::new("service", service.to_string()),
                                KeyValue::new("kind", err.kind()),
                            ],
                        );
                        if worst
                            .as_ref()
                            .is_none_or(|seen| err.precedence() >= seen.precedence())
                        {
                            worst = Some(err);
                        }
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        .instrument(span.clone())
        .await;

        let (attempts, result) = result;
        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        collaborator::record_call_outcome(&span, attempts, outcome);
        metrics::collaborator_calls().add(
            1,
            &[
                KeyValue::new("service", service.to_string()),
                KeyValue::new("outcome", outcome),
            ],
        );
        metrics::operation_duration_ms().record(
            started.elapsed().as_millis() as f64,
            &[KeyValue::new("operation", format!("{service}.{operation}"))],
        );

        result
    }
}
