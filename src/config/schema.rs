//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML config files.
//! Every section carries defaults so a minimal (even empty) file is valid.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Retry/backoff knobs applied to every service.
    pub retry: RetryConfig,

    /// Circuit breaker knobs applied to every service.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Bulkhead capacity applied to every service.
    pub bulkhead: BulkheadConfig,

    /// Provider liveness cache.
    pub health: HealthConfig,

    /// Policy used for explicit health-check operations.
    pub health_check: HealthCheckConfig,

    /// Per-service overrides keyed by service name.
    pub services: HashMap<String, ServiceOverride>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin endpoint settings.
    pub admin: AdminConfig,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Cap on the computed backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Double the delay per attempt instead of using a fixed delay.
    pub exponential_backoff: bool,

    /// Per-attempt deadline in milliseconds. Unset means attempts run unbounded.
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            exponential_backoff: true,
            attempt_timeout_ms: None,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub threshold: u32,

    /// Time the circuit stays open before a trial call, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout_ms: 60_000,
        }
    }
}

/// Bulkhead configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BulkheadConfig {
    /// Maximum concurrent executions per resource.
    pub max_concurrent: usize,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent: 10 }
    }
}

/// Provider liveness cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// How long a probe result is trusted, in seconds.
    pub cache_window_secs: u64,

    /// Deadline for a single probe, in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cache_window_secs: 30,
            probe_timeout_ms: 5_000,
        }
    }
}

impl HealthConfig {
    pub fn cache_window(&self) -> Duration {
        Duration::from_secs(self.cache_window_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Policy for explicit health-check operations.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Retries for a health check (checks should fail fast).
    pub max_retries: u32,

    /// Base backoff between health-check attempts in milliseconds.
    pub base_delay_ms: u64,

    /// Per-attempt deadline in milliseconds.
    pub timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 500,
            timeout_ms: 5_000,
        }
    }
}

/// Per-service overrides. Unset fields inherit from the global sections.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServiceOverride {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub exponential_backoff: Option<bool>,
    pub attempt_timeout_ms: Option<u64>,
    pub circuit_breaker_threshold: Option<u32>,
    pub circuit_breaker_timeout_ms: Option<u64>,
    pub max_concurrent: Option<usize>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full `EnvFilter` directive.
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve the admin router.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = DispatcherConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 10_000);
        assert!(config.retry.exponential_backoff);
        assert_eq!(config.circuit_breaker.threshold, 5);
        assert_eq!(config.circuit_breaker.timeout_ms, 60_000);
        assert_eq!(config.bulkhead.max_concurrent, 10);
        assert_eq!(config.health.cache_window(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: DispatcherConfig = toml::from_str(
            r#"
            [retry]
            max_retries = 5

            [services.search]
            max_concurrent = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.services["search"].max_concurrent, Some(2));
        assert_eq!(config.services["search"].max_retries, None);
    }
}
