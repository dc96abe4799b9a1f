//! In-process aggregation of dispatch outcomes.
//!
//! Everything here is observational: recording never fails and never blocks a call
//! for longer than a shard lock. The snapshot is the payload behind the admin
//! endpoint.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::{ErrorKind, OperationError};
use crate::health::tracker::{HealthTracker, ProviderSnapshot};
use crate::observability::metrics;
use crate::resilience::bulkhead::{BulkheadRegistry, BulkheadSnapshot};
use crate::resilience::circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerSnapshot};
use crate::resilience::context::stats_key;

const HOUR: Duration = Duration::from_secs(3600);

/// Running counters for one `service:tool` pair.
///
/// `total_attempts == successful_attempts + failed_attempts`; a call contributes at
/// most one successful attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetryStats {
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub failed_attempts: u64,
    /// Finished calls (successful or terminally failed).
    pub calls: u64,
    pub avg_retries_per_success: f64,
    pub avg_execution_time_ms: f64,
}

impl RetryStats {
    fn record(&mut self, attempts: u32, success: bool, elapsed: Duration) {
        let attempts = u64::from(attempts);
        self.total_attempts += attempts;
        self.calls += 1;

        if success {
            self.successful_attempts += 1;
            self.failed_attempts += attempts.saturating_sub(1);
            let retries = attempts.saturating_sub(1) as f64;
            self.avg_retries_per_success +=
                (retries - self.avg_retries_per_success) / self.successful_attempts as f64;
        } else {
            self.failed_attempts += attempts;
        }

        let ms = elapsed.as_secs_f64() * 1000.0;
        self.avg_execution_time_ms += (ms - self.avg_execution_time_ms) / self.calls as f64;
    }
}

#[derive(Debug, Clone)]
struct ErrorPattern {
    kind: ErrorKind,
    message: String,
    count: u64,
    first_seen: Instant,
    first_seen_unix_ms: u64,
    last_seen_unix_ms: u64,
    services: BTreeSet<String>,
    tools: BTreeSet<String>,
}

/// Aggregated view of identical failures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPatternSnapshot {
    pub signature: String,
    pub kind: ErrorKind,
    pub message: String,
    pub count: u64,
    pub first_seen_unix_ms: u64,
    pub last_seen_unix_ms: u64,
    /// Occurrences per hour since first seen; the first hour counts as a full hour.
    pub frequency_per_hour: f64,
    pub services: Vec<String>,
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Outcome history of explicit health checks for a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckRecord {
    pub status: HealthStatus,
    pub last_check_unix_ms: u64,
    pub consecutive_failures: u32,
}

/// Everything the monitoring surface exposes, keyed deterministically.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResilienceSnapshot {
    pub retry_stats: BTreeMap<String, RetryStats>,
    pub circuit_breakers: BTreeMap<String, CircuitBreakerSnapshot>,
    pub bulkheads: BTreeMap<String, BulkheadSnapshot>,
    pub error_patterns: Vec<ErrorPatternSnapshot>,
    pub health_checks: BTreeMap<String, HealthCheckRecord>,
    pub providers: BTreeMap<String, ProviderSnapshot>,
}

/// Observational sink shared by the retry engine, dispatcher and admin surface.
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    retry_stats: Arc<DashMap<String, RetryStats>>,
    error_patterns: Arc<DashMap<String, ErrorPattern>>,
    health_checks: Arc<DashMap<String, HealthCheckRecord>>,
    breakers: CircuitBreakerRegistry,
    bulkheads: BulkheadRegistry,
    health: HealthTracker,
}

impl MetricsAggregator {
    pub fn new(breakers: CircuitBreakerRegistry, bulkheads: BulkheadRegistry, health: HealthTracker) -> Self {
        Self {
            retry_stats: Arc::new(DashMap::new()),
            error_patterns: Arc::new(DashMap::new()),
            health_checks: Arc::new(DashMap::new()),
            breakers,
            bulkheads,
            health,
        }
    }

    /// Record a finished call that made `attempts` attempts.
    pub fn record_call(&self, service: &str, tool: &str, attempts: u32, success: bool, elapsed: Duration) {
        self.retry_stats
            .entry(stats_key(service, tool))
            .or_default()
            .record(attempts, success, elapsed);
        metrics::record_call(service, tool, if success { "success" } else { "failure" }, elapsed);
    }

    /// Record one failed attempt in the error-pattern table.
    pub fn record_error(&self, error: &OperationError, service: &str, tool: &str) {
        let now_unix = unix_ms();
        let mut pattern = self
            .error_patterns
            .entry(error.signature())
            .or_insert_with(|| ErrorPattern {
                kind: error.kind(),
                message: error.message().to_string(),
                count: 0,
                first_seen: Instant::now(),
                first_seen_unix_ms: now_unix,
                last_seen_unix_ms: now_unix,
                services: BTreeSet::new(),
                tools: BTreeSet::new(),
            });
        pattern.count += 1;
        pattern.last_seen_unix_ms = now_unix;
        if !pattern.services.contains(service) {
            pattern.services.insert(service.to_string());
        }
        if !pattern.tools.contains(tool) {
            pattern.tools.insert(tool.to_string());
        }
    }

    /// Record the outcome of an explicit health check.
    pub fn record_health_check(&self, service: &str, healthy: bool) {
        let mut record = self
            .health_checks
            .entry(service.to_string())
            .or_insert(HealthCheckRecord {
                status: HealthStatus::Healthy,
                last_check_unix_ms: 0,
                consecutive_failures: 0,
            });
        record.last_check_unix_ms = unix_ms();
        if healthy {
            record.status = HealthStatus::Healthy;
            record.consecutive_failures = 0;
        } else {
            record.status = HealthStatus::Unhealthy;
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        }
    }

    pub fn retry_stats(&self, service: &str, tool: &str) -> Option<RetryStats> {
        self.retry_stats.get(&stats_key(service, tool)).map(|s| s.clone())
    }

    pub fn health_check(&self, service: &str) -> Option<HealthCheckRecord> {
        self.health_checks.get(service).map(|r| r.clone())
    }

    pub fn snapshot(&self) -> ResilienceSnapshot {
        let now = Instant::now();

        let mut error_patterns: Vec<ErrorPatternSnapshot> = self
            .error_patterns
            .iter()
            .map(|entry| {
                let p = entry.value();
                let hours = now.saturating_duration_since(p.first_seen).max(HOUR).as_secs_f64()
                    / HOUR.as_secs_f64();
                ErrorPatternSnapshot {
                    signature: entry.key().clone(),
                    kind: p.kind,
                    message: p.message.clone(),
                    count: p.count,
                    first_seen_unix_ms: p.first_seen_unix_ms,
                    last_seen_unix_ms: p.last_seen_unix_ms,
                    frequency_per_hour: p.count as f64 / hours,
                    services: p.services.iter().cloned().collect(),
                    tools: p.tools.iter().cloned().collect(),
                }
            })
            .collect();
        error_patterns.sort_by(|a, b| a.signature.cmp(&b.signature));

        ResilienceSnapshot {
            retry_stats: self
                .retry_stats
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            circuit_breakers: self.breakers.snapshot(),
            bulkheads: self.bulkheads.snapshot(),
            error_patterns,
            health_checks: self
                .health_checks
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            providers: self.health.snapshot(),
        }
    }

    /// Administrative breaker reset. Returns whether the service had a breaker.
    pub fn reset_circuit_breaker(&self, service: &str) -> bool {
        self.breakers.reset(service)
    }

    pub fn clear_error_patterns(&self) {
        let cleared = self.error_patterns.len();
        self.error_patterns.clear();
        tracing::info!(cleared, "Error patterns cleared");
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
