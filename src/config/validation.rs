//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges. Validation is a pure function
//! returning every problem found, not just the first.

use thiserror::Error;

use crate::config::schema::{DispatcherConfig, ServiceOverride};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Validate a configuration, collecting all errors.
pub fn validate_config(config: &DispatcherConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.retry.base_delay_ms == 0 {
        errors.push(ValidationError::new("retry.base_delay_ms", "must be > 0"));
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        errors.push(ValidationError::new(
            "retry.max_delay_ms",
            "must be >= retry.base_delay_ms",
        ));
    }
    if config.retry.attempt_timeout_ms == Some(0) {
        errors.push(ValidationError::new("retry.attempt_timeout_ms", "must be > 0 when set"));
    }
    if config.circuit_breaker.threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.threshold", "must be >= 1"));
    }
    if config.circuit_breaker.timeout_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.timeout_ms", "must be > 0"));
    }
    if config.bulkhead.max_concurrent == 0 {
        errors.push(ValidationError::new("bulkhead.max_concurrent", "must be >= 1"));
    }
    if config.health.probe_timeout_ms == 0 {
        errors.push(ValidationError::new("health.probe_timeout_ms", "must be > 0"));
    }
    if config.health_check.timeout_ms == 0 {
        errors.push(ValidationError::new("health_check.timeout_ms", "must be > 0"));
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "not a valid socket address",
        ));
    }
    if config.admin.enabled {
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
        if config
            .admin
            .bind_address
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            errors.push(ValidationError::new("admin.bind_address", "not a valid socket address"));
        }
    }

    let mut names: Vec<&String> = config.services.keys().collect();
    names.sort();
    for name in names {
        validate_override(config, name, &config.services[name], &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_override(
    config: &DispatcherConfig,
    name: &str,
    service: &ServiceOverride,
    errors: &mut Vec<ValidationError>,
) {
    let field = |f: &str| format!("services.{}.{}", name, f);

    if service.base_delay_ms == Some(0) {
        errors.push(ValidationError::new(field("base_delay_ms"), "must be > 0"));
    }
    let base = service.base_delay_ms.unwrap_or(config.retry.base_delay_ms);
    let max = service.max_delay_ms.unwrap_or(config.retry.max_delay_ms);
    if max < base {
        errors.push(ValidationError::new(field("max_delay_ms"), "must be >= base_delay_ms"));
    }
    if service.attempt_timeout_ms == Some(0) {
        errors.push(ValidationError::new(field("attempt_timeout_ms"), "must be > 0 when set"));
    }
    if service.circuit_breaker_threshold == Some(0) {
        errors.push(ValidationError::new(field("circuit_breaker_threshold"), "must be >= 1"));
    }
    if service.circuit_breaker_timeout_ms == Some(0) {
        errors.push(ValidationError::new(field("circuit_breaker_timeout_ms"), "must be > 0"));
    }
    if service.max_concurrent == Some(0) {
        errors.push(ValidationError::new(field("max_concurrent"), "must be >= 1"));
    }
}
