//! The resilience envelope entry point.
//!
//! # Data Flow
//! ```text
//! execute(service, tool, op):
//!     → resolve ResiliencePolicy from the current config (arc-swap load)
//!     → bulkhead.try_enter(service)          reject: BulkheadFull
//!     → RetryEngine::execute_with_retry       per attempt: breaker gate, timeout, backoff
//!     → permit dropped on every exit path
//! ```
//!
//! # Design Decisions
//! - The bulkhead slot is held across the whole retry run, backoff sleeps included, so
//!   `max_concurrent` bounds in-flight calls rather than in-flight attempts
//! - Config reloads apply to the next call; breakers and stats keep their state

use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc};
use tracing::Instrument;

use crate::config::{validate_config, ConfigError, DispatcherConfig};
use crate::error::{DispatchResult, OperationError};
use crate::health::HealthTracker;
use crate::observability::{MetricsAggregator, ResilienceSnapshot};
use crate::resilience::{BulkheadRegistry, CircuitBreakerRegistry, ResiliencePolicy, RetryContext, RetryEngine};

/// Tool name recorded for explicit health-check operations.
pub const HEALTH_CHECK_TOOL: &str = "health_check";

/// Shared dispatcher. Cloning is cheap; clones share registries and config.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: Arc<ArcSwap<DispatcherConfig>>,
    breakers: CircuitBreakerRegistry,
    bulkheads: BulkheadRegistry,
    health: HealthTracker,
    metrics: MetricsAggregator,
    engine: RetryEngine,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self::with_registries(config, CircuitBreakerRegistry::new(), BulkheadRegistry::new())
    }

    /// Build around existing registries, e.g. to share breakers between dispatchers.
    pub fn with_registries(
        config: DispatcherConfig,
        breakers: CircuitBreakerRegistry,
        bulkheads: BulkheadRegistry,
    ) -> Self {
        let health = HealthTracker::from_config(&config.health);
        let metrics = MetricsAggregator::new(breakers.clone(), bulkheads.clone(), health.clone());
        let engine = RetryEngine::new(breakers.clone(), metrics.clone());

        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            breakers,
            bulkheads,
            health,
            metrics,
            engine,
        }
    }

    pub fn config(&self) -> Arc<DispatcherConfig> {
        self.config.load_full()
    }

    /// Validate and swap in a new configuration.
    pub fn apply_config(&self, config: DispatcherConfig) -> Result<(), ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        self.config.store(Arc::new(config));
        tracing::info!("Dispatcher configuration updated");
        Ok(())
    }

    /// Apply configs from a [`ConfigWatcher`](crate::config::ConfigWatcher) until the
    /// channel closes or shutdown fires.
    pub async fn follow_config_updates(
        &self,
        mut updates: mpsc::UnboundedReceiver<DispatcherConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(config) => {
                        if let Err(e) = self.apply_config(config) {
                            tracing::error!(error = %e, "Rejected configuration update");
                        }
                    }
                    None => break,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Config follower received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Policy `execute` would use for `service` right now.
    pub fn policy_for(&self, service: &str) -> ResiliencePolicy {
        ResiliencePolicy::from_config(&self.config.load(), service)
    }

    /// Run `operation` inside the service's resilience envelope.
    pub async fn execute<T, E, F, Fut>(&self, service: &str, tool: &str, operation: F) -> DispatchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OperationError>,
    {
        let policy = self.policy_for(service);
        self.execute_with_policy(service, tool, &policy, operation).await
    }

    /// Like [`execute`](Self::execute) with caller-supplied knobs.
    pub async fn execute_with_policy<T, E, F, Fut>(
        &self,
        service: &str,
        tool: &str,
        policy: &ResiliencePolicy,
        operation: F,
    ) -> DispatchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OperationError>,
    {
        let _slot = self.bulkheads.try_enter(service, policy.max_concurrent)?;

        let mut ctx = RetryContext::new(service, tool, policy);
        let span = tracing::debug_span!(
            "dispatch",
            service = %service,
            tool = %tool,
            operation_id = %ctx.operation_id
        );
        self.engine
            .execute_with_retry(operation, &mut ctx)
            .instrument(span)
            .await
    }

    /// Run an explicit health check through the envelope with the `[health_check]`
    /// retry budget, and record its outcome.
    pub async fn run_health_check<T, E, F, Fut>(&self, service: &str, check: F) -> DispatchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OperationError>,
    {
        let policy = ResiliencePolicy::health_check(&self.config.load(), service);
        let result = self
            .execute_with_policy(service, HEALTH_CHECK_TOOL, &policy, check)
            .await;

        self.metrics.record_health_check(service, result.is_ok());
        if let Err(e) = &result {
            tracing::warn!(service = %service, error = %e, "Health check failed");
        }
        result
    }

    pub fn snapshot(&self) -> ResilienceSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_circuit_breaker(&self, service: &str) -> bool {
        self.metrics.reset_circuit_breaker(service)
    }

    pub fn clear_error_patterns(&self) {
        self.metrics.clear_error_patterns()
    }

    /// Force the next liveness query for `provider` to probe.
    pub fn invalidate_provider(&self, provider: &str) -> bool {
        self.health.invalidate(provider)
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn bulkheads(&self) -> &BulkheadRegistry {
        &self.bulkheads
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn metrics(&self) -> &MetricsAggregator {
        &self.metrics
    }
}
