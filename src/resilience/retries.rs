//! Bounded retry with backoff.
//!
//! # Responsibilities
//! - Classify attempt errors as retryable or fatal
//! - Gate every attempt on the service's circuit breaker
//! - Sleep a jittered backoff between attempts, honoring provider cooldowns
//! - Report every outcome to the breaker and the metrics aggregator
//!
//! # Design Decisions
//! - Classification is driven by the structured [`ErrorKind`]; message matching is only
//!   applied to [`ErrorKind::Opaque`] errors from third-party collaborators
//! - A breaker fast-fail is not an attempt and does not penalize the breaker further
//! - If the breaker opens partway through a call, the call ends as `RetryExhausted`
//!   with the attempts made so far and the last attempt error
//! - Provider cooldowns are capped at [`MAX_PROVIDER_COOLDOWN`]
//! - Exactly one terminal [`DispatchError`] leaves the engine per call

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{DispatchError, DispatchResult, ErrorKind, OperationError};
use crate::observability::aggregator::MetricsAggregator;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
use crate::resilience::context::RetryContext;
use crate::resilience::timeouts::run_attempt;

/// Longest cooldown honored from a rate-limited error; larger values are clamped.
pub const MAX_PROVIDER_COOLDOWN: Duration = Duration::from_secs(3600);

const RATE_LIMIT_SIGNATURES: &[&str] = &["rate limit", "rate-limit", "ratelimit", "too many requests"];
const TIMEOUT_SIGNATURES: &[&str] = &["timeout", "timed out", "deadline exceeded"];
const TRANSPORT_SIGNATURES: &[&str] = &[
    "connection reset",
    "connection refused",
    "econnreset",
    "econnrefused",
    "enotfound",
    "name resolution",
    "failed to lookup address",
    "dns error",
];

/// Whether an attempt that failed with `error` may be retried.
pub fn is_retryable(error: &OperationError) -> bool {
    match error.kind() {
        ErrorKind::Transport | ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::Retryable => true,
        ErrorKind::Status(code) => code >= 500 || code == 429 || code == 408,
        ErrorKind::Fatal => false,
        ErrorKind::Opaque => {
            let message = error.message().to_ascii_lowercase();
            RATE_LIMIT_SIGNATURES
                .iter()
                .chain(TIMEOUT_SIGNATURES)
                .chain(TRANSPORT_SIGNATURES)
                .any(|signature| message.contains(signature))
        }
    }
}

/// Drives the retry loop for one call at a time; cheap to clone.
#[derive(Debug, Clone)]
pub struct RetryEngine {
    breakers: CircuitBreakerRegistry,
    metrics: MetricsAggregator,
}

impl RetryEngine {
    pub fn new(breakers: CircuitBreakerRegistry, metrics: MetricsAggregator) -> Self {
        Self { breakers, metrics }
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Run `operation` until it succeeds, fails fatally, or `ctx.max_attempts()`
    /// attempts have been made.
    ///
    /// `ctx.attempt` is advanced in place, so after the call it holds the number of
    /// attempts that actually invoked the operation.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        mut operation: F,
        ctx: &mut RetryContext,
    ) -> DispatchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OperationError>,
    {
        let started = Instant::now();
        let mut last_error: Option<OperationError> = None;

        loop {
            let permit = match self.breakers.try_acquire(&ctx.service) {
                Ok(permit) => permit,
                Err(err) => {
                    let Some(source) = last_error.take() else {
                        tracing::debug!(
                            operation_id = %ctx.operation_id,
                            service = %ctx.service,
                            tool = %ctx.tool,
                            "Circuit open, failing fast"
                        );
                        return Err(err);
                    };
                    tracing::error!(
                        operation_id = %ctx.operation_id,
                        service = %ctx.service,
                        tool = %ctx.tool,
                        attempts = ctx.attempt,
                        error = %source,
                        "Circuit opened mid-call, giving up"
                    );
                    self.metrics
                        .record_call(&ctx.service, &ctx.tool, ctx.attempt, false, started.elapsed());
                    return Err(DispatchError::RetryExhausted {
                        service: ctx.service.clone(),
                        tool: ctx.tool.clone(),
                        attempts: ctx.attempt,
                        source,
                    });
                }
            };

            ctx.attempt += 1;
            let attempt = ctx.attempt;

            let error = match run_attempt(operation(), ctx.attempt_timeout).await {
                Ok(value) => {
                    permit.success();
                    metrics::record_attempt(&ctx.service, &ctx.tool, "success");
                    self.metrics
                        .record_call(&ctx.service, &ctx.tool, attempt, true, started.elapsed());
                    if attempt > 1 {
                        tracing::info!(
                            operation_id = %ctx.operation_id,
                            service = %ctx.service,
                            tool = %ctx.tool,
                            attempts = attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            permit.failure(ctx.breaker);
            metrics::record_attempt(&ctx.service, &ctx.tool, "failure");
            self.metrics.record_error(&error, &ctx.service, &ctx.tool);

            if !error.is_retryable() {
                tracing::warn!(
                    operation_id = %ctx.operation_id,
                    service = %ctx.service,
                    tool = %ctx.tool,
                    attempt,
                    error = %error,
                    "Non-retryable failure"
                );
                self.metrics
                    .record_call(&ctx.service, &ctx.tool, attempt, false, started.elapsed());
                return Err(DispatchError::NonRetryable {
                    service: ctx.service.clone(),
                    tool: ctx.tool.clone(),
                    attempts: attempt,
                    source: error,
                });
            }

            if attempt >= ctx.max_attempts() {
                tracing::error!(
                    operation_id = %ctx.operation_id,
                    service = %ctx.service,
                    tool = %ctx.tool,
                    attempts = attempt,
                    error = %error,
                    "Retries exhausted"
                );
                self.metrics
                    .record_call(&ctx.service, &ctx.tool, attempt, false, started.elapsed());
                return Err(DispatchError::RetryExhausted {
                    service: ctx.service.clone(),
                    tool: ctx.tool.clone(),
                    attempts: attempt,
                    source: error,
                });
            }

            if let Some(cooldown) = error.retry_after() {
                ctx.rate_limit_reset_at = Some(Instant::now() + cooldown.min(MAX_PROVIDER_COOLDOWN));
            }
            let delay = calculate_backoff(attempt, ctx);

            tracing::warn!(
                operation_id = %ctx.operation_id,
                service = %ctx.service,
                tool = %ctx.tool,
                attempt,
                max_attempts = ctx.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying"
            );
            last_error = Some(error);
            tokio::time::sleep(delay).await;
        }
    }
}
