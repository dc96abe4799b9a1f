//! Metrics collection and exposition.
//!
//! # Metrics
//! - `dispatch_attempts_total` (counter): attempts by service, tool, outcome
//! - `dispatch_calls_total` (counter): finished calls by service, tool, outcome
//! - `dispatch_duration_seconds` (histogram): call latency including retries
//! - `circuit_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `circuit_breaker_transitions_total` (counter): by service, from, to
//! - `bulkhead_rejections_total` (counter): by resource
//! - `bulkhead_in_flight` (gauge): current executions by resource
//! - `fallback_activations_total` (counter): by primary, fallback, reason
//! - `provider_health` (gauge): 1=healthy, 0=unhealthy
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics exporter listening");
    Ok(())
}

pub fn record_attempt(service: &str, tool: &str, outcome: &'static str) {
    counter!(
        "dispatch_attempts_total",
        "service" => service.to_string(),
        "tool" => tool.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_call(service: &str, tool: &str, outcome: &'static str, elapsed: Duration) {
    counter!(
        "dispatch_calls_total",
        "service" => service.to_string(),
        "tool" => tool.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "dispatch_duration_seconds",
        "service" => service.to_string(),
        "tool" => tool.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_circuit_transition(service: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "circuit_breaker_transitions_total",
        "service" => service.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
    let value = match to {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("circuit_breaker_state", "service" => service.to_string()).set(value);
}

pub fn record_bulkhead_rejection(resource: &str) {
    counter!("bulkhead_rejections_total", "resource" => resource.to_string()).increment(1);
}

pub fn record_bulkhead_in_flight(resource: &str, current: usize) {
    gauge!("bulkhead_in_flight", "resource" => resource.to_string()).set(current as f64);
}

pub fn record_fallback(primary: &str, fallback: &str, reason: &'static str) {
    counter!(
        "fallback_activations_total",
        "primary" => primary.to_string(),
        "fallback" => fallback.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_provider_health(provider: &str, healthy: bool) {
    gauge!("provider_health", "provider" => provider.to_string()).set(if healthy { 1.0 } else { 0.0 });
}
