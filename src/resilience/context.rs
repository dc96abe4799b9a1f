//! Per-call resilience knobs and retry state.

use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::config::DispatcherConfig;
use crate::resilience::circuit_breaker::BreakerSettings;

/// Resilience knobs resolved for one service.
#[derive(Debug, Clone, PartialEq)]
pub struct ResiliencePolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential: bool,
    /// Deadline for each attempt; `None` lets attempts run unbounded.
    pub attempt_timeout: Option<Duration>,
    pub breaker: BreakerSettings,
    /// Bulkhead capacity for the service.
    pub max_concurrent: usize,
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            exponential: true,
            attempt_timeout: None,
            breaker: BreakerSettings::default(),
            max_concurrent: 10,
        }
    }
}

impl ResiliencePolicy {
    /// Resolve the policy for `service`: global sections overlaid with its overrides.
    pub fn from_config(config: &DispatcherConfig, service: &str) -> Self {
        let mut policy = Self {
            max_retries: config.retry.max_retries,
            base_delay: Duration::from_millis(config.retry.base_delay_ms),
            max_delay: Duration::from_millis(config.retry.max_delay_ms),
            exponential: config.retry.exponential_backoff,
            attempt_timeout: config.retry.attempt_timeout_ms.map(Duration::from_millis),
            breaker: BreakerSettings {
                threshold: config.circuit_breaker.threshold,
                reset_timeout: Duration::from_millis(config.circuit_breaker.timeout_ms),
            },
            max_concurrent: config.bulkhead.max_concurrent,
        };

        if let Some(o) = config.services.get(service) {
            if let Some(v) = o.max_retries {
                policy.max_retries = v;
            }
            if let Some(v) = o.base_delay_ms {
                policy.base_delay = Duration::from_millis(v);
            }
            if let Some(v) = o.max_delay_ms {
                policy.max_delay = Duration::from_millis(v);
            }
            if let Some(v) = o.exponential_backoff {
                policy.exponential = v;
            }
            if let Some(v) = o.attempt_timeout_ms {
                policy.attempt_timeout = Some(Duration::from_millis(v));
            }
            if let Some(v) = o.circuit_breaker_threshold {
                policy.breaker.threshold = v;
            }
            if let Some(v) = o.circuit_breaker_timeout_ms {
                policy.breaker.reset_timeout = Duration::from_millis(v);
            }
            if let Some(v) = o.max_concurrent {
                policy.max_concurrent = v;
            }
        }

        policy
    }

    /// Policy for explicit health checks against `service`: the service's breaker and
    /// bulkhead, with the short retry budget from `[health_check]`.
    pub fn health_check(config: &DispatcherConfig, service: &str) -> Self {
        let base = Self::from_config(config, service);
        let base_delay = Duration::from_millis(config.health_check.base_delay_ms);
        Self {
            max_retries: config.health_check.max_retries,
            base_delay,
            max_delay: base_delay.max(base.max_delay),
            attempt_timeout: Some(Duration::from_millis(config.health_check.timeout_ms)),
            ..base
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    pub fn with_exponential(mut self, exponential: bool) -> Self {
        self.exponential = exponential;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn with_breaker(mut self, threshold: u32, reset_timeout: Duration) -> Self {
        self.breaker = BreakerSettings {
            threshold,
            reset_timeout,
        };
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }
}

/// State of one retried call. Only `attempt` and `rate_limit_reset_at` change.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub operation_id: Uuid,
    pub service: String,
    pub tool: String,
    /// Attempts made so far (0 before the first try).
    pub attempt: u32,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential: bool,
    /// Cooldown deadline communicated by the provider.
    pub rate_limit_reset_at: Option<Instant>,
    pub attempt_timeout: Option<Duration>,
    pub breaker: BreakerSettings,
}

impl RetryContext {
    pub fn new(service: impl Into<String>, tool: impl Into<String>, policy: &ResiliencePolicy) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            service: service.into(),
            tool: tool.into(),
            attempt: 0,
            max_retries: policy.max_retries,
            base_delay: policy.base_delay,
            max_delay: policy.max_delay,
            exponential: policy.exponential,
            rate_limit_reset_at: None,
            attempt_timeout: policy.attempt_timeout,
            breaker: policy.breaker,
        }
    }

    /// Total attempts permitted (`max_retries + 1`).
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Key of the `RetryStats` entry for this call.
    pub fn stats_key(&self) -> String {
        stats_key(&self.service, &self.tool)
    }
}

pub(crate) fn stats_key(service: &str, tool: &str) -> String {
    format!("{}:{}", service, tool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceOverride;

    #[test]
    fn test_policy_from_default_config() {
        let policy = ResiliencePolicy::from_config(&DispatcherConfig::default(), "anything");
        assert_eq!(policy, ResiliencePolicy::default());
    }

    #[test]
    fn test_service_override_applies_only_to_that_service() {
        let mut config = DispatcherConfig::default();
        config.services.insert(
            "vector-store".into(),
            ServiceOverride {
                max_retries: Some(1),
                circuit_breaker_threshold: Some(2),
                attempt_timeout_ms: Some(250),
                ..Default::default()
            },
        );

        let tuned = ResiliencePolicy::from_config(&config, "vector-store");
        assert_eq!(tuned.max_retries, 1);
        assert_eq!(tuned.breaker.threshold, 2);
        assert_eq!(tuned.attempt_timeout, Some(Duration::from_millis(250)));
        assert_eq!(tuned.base_delay, Duration::from_millis(1000));

        let other = ResiliencePolicy::from_config(&config, "cache");
        assert_eq!(other.max_retries, 3);
    }

    #[test]
    fn test_health_check_policy_keeps_service_breaker() {
        let mut config = DispatcherConfig::default();
        config.services.insert(
            "db".into(),
            ServiceOverride {
                circuit_breaker_threshold: Some(9),
                ..Default::default()
            },
        );

        let policy = ResiliencePolicy::health_check(&config, "db");
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.breaker.threshold, 9);
        assert_eq!(policy.attempt_timeout, Some(Duration::from_millis(5000)));
    }

    #[test]
    fn test_context_starts_before_first_attempt() {
        let ctx = RetryContext::new("llm", "complete", &ResiliencePolicy::default());
        assert_eq!(ctx.attempt, 0);
        assert_eq!(ctx.max_attempts(), 4);
        assert_eq!(ctx.stats_key(), "llm:complete");
    }
}
