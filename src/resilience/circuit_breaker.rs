//! Per-service circuit breakers.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: service assumed down, calls fail fast
//! - Half-Open: one trial call tests whether the service recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= threshold
//! Open → Half-Open: reset_timeout elapsed since last failure (checked lazily on access)
//! Half-Open → Closed: trial succeeds
//! Half-Open → Open: trial fails
//! ```
//!
//! # Design Decisions
//! - Breakers are created on the first failure of a service and only removed by an
//!   explicit reset
//! - Fail fast in Open state without invoking the operation or touching the counters
//! - Single trial in Half-Open; the reservation is released if the trial is abandoned
//! - While Half-Open, outcomes of calls admitted before the circuit opened are ignored
//! - Each breaker is mutated under its DashMap shard lock so concurrent callers never
//!   lose a failure

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::DispatchError;
use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Threshold and reset timeout applied when a failure is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_time: Option<Instant>,
    threshold: u32,
    reset_timeout: Duration,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    fn new(settings: BreakerSettings) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_time: None,
            threshold: settings.threshold,
            reset_timeout: settings.reset_timeout,
            trial_in_flight: false,
        }
    }

    fn window_elapsed(&self, now: Instant) -> bool {
        match self.last_failure_time {
            Some(at) => now.saturating_duration_since(at) >= self.reset_timeout,
            None => true,
        }
    }

    /// Lazy Open → Half-Open check.
    fn advance(&mut self, service: &str, now: Instant) {
        if self.state == CircuitState::Open && self.window_elapsed(now) {
            self.transition(service, CircuitState::HalfOpen);
            self.trial_in_flight = false;
        }
    }

    /// State as the next gating check would see it, without mutating.
    fn effective_state(&self, now: Instant) -> CircuitState {
        if self.state == CircuitState::Open && self.window_elapsed(now) {
            CircuitState::HalfOpen
        } else {
            self.state
        }
    }

    fn retry_after(&self, now: Instant) -> Duration {
        match self.last_failure_time {
            Some(at) => self
                .reset_timeout
                .saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }

    fn transition(&mut self, service: &str, to: CircuitState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        match to {
            CircuitState::Open => tracing::warn!(
                service = %service,
                from = %from,
                consecutive_failures = self.consecutive_failures,
                reset_timeout = ?self.reset_timeout,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(service = %service, from = %from, to = %to, "Circuit breaker state change"),
        }
        metrics::record_circuit_transition(service, from, to);
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub threshold: u32,
    pub reset_timeout_ms: u64,
    pub ms_since_last_failure: Option<u64>,
}

/// Registry of breakers keyed by service name.
///
/// Cloning is cheap; clones share the same breakers.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<DashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// False only when the service's breaker is open (after the lazy half-open check).
    pub fn allow(&self, service: &str) -> bool {
        match self.breakers.get_mut(service) {
            Some(mut breaker) => {
                breaker.advance(service, Instant::now());
                breaker.state != CircuitState::Open
            }
            None => true,
        }
    }

    /// Gate a call. In Half-Open only one caller gets the trial permit; the others are
    /// rejected like an open circuit until the trial settles.
    pub fn try_acquire(&self, service: &str) -> Result<CircuitPermit, DispatchError> {
        let trial = match self.breakers.get_mut(service) {
            None => false,
            Some(mut breaker) => {
                let now = Instant::now();
                breaker.advance(service, now);
                let state = breaker.state;
                match state {
                    CircuitState::Closed => false,
                    CircuitState::Open => {
                        return Err(DispatchError::CircuitOpen {
                            service: service.to_string(),
                            failures: breaker.consecutive_failures,
                            retry_after: breaker.retry_after(now),
                        });
                    }
                    CircuitState::HalfOpen if breaker.trial_in_flight => {
                        return Err(DispatchError::CircuitOpen {
                            service: service.to_string(),
                            failures: breaker.consecutive_failures,
                            retry_after: Duration::ZERO,
                        });
                    }
                    CircuitState::HalfOpen => {
                        breaker.trial_in_flight = true;
                        tracing::info!(service = %service, "Admitting half-open trial call");
                        true
                    }
                }
            }
        };

        Ok(CircuitPermit {
            registry: self.clone(),
            service: service.to_string(),
            trial,
            settled: false,
        })
    }

    /// Success callback: closes a half-open breaker and clears the failure streak.
    pub fn record_success(&self, service: &str) {
        self.settle_success(service, true);
    }

    /// Failure callback. Creates the breaker on the service's first failure.
    pub fn record_failure(&self, service: &str, settings: BreakerSettings) {
        self.settle_failure(service, settings, true);
    }

    fn settle_success(&self, service: &str, trial: bool) {
        if let Some(mut breaker) = self.breakers.get_mut(service) {
            let state = breaker.state;
            match state {
                CircuitState::Closed => breaker.consecutive_failures = 0,
                CircuitState::HalfOpen if !trial => {
                    tracing::debug!(service = %service, "Ignoring non-trial success while half-open");
                }
                CircuitState::HalfOpen => {
                    breaker.consecutive_failures = 0;
                    breaker.trial_in_flight = false;
                    breaker.transition(service, CircuitState::Closed);
                }
                // A call admitted before the circuit opened; the open window stands.
                CircuitState::Open => {}
            }
        }
    }

    fn settle_failure(&self, service: &str, settings: BreakerSettings, trial: bool) {
        let mut breaker = self
            .breakers
            .entry(service.to_string())
            .or_insert_with(|| CircuitBreaker::new(settings));

        breaker.threshold = settings.threshold;
        breaker.reset_timeout = settings.reset_timeout;

        // Only the trial decides a half-open breaker.
        if breaker.state == CircuitState::HalfOpen && !trial {
            tracing::debug!(service = %service, "Ignoring non-trial failure while half-open");
            return;
        }

        breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);
        breaker.last_failure_time = Some(Instant::now());

        let state = breaker.state;
        match state {
            CircuitState::Closed => {
                if breaker.consecutive_failures >= breaker.threshold {
                    breaker.transition(service, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                breaker.trial_in_flight = false;
                breaker.transition(service, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Current state as seen by the next call. Unknown services are closed.
    pub fn state(&self, service: &str) -> CircuitState {
        self.breakers
            .get(service)
            .map(|b| b.effective_state(Instant::now()))
            .unwrap_or(CircuitState::Closed)
    }

    pub fn consecutive_failures(&self, service: &str) -> u32 {
        self.breakers
            .get(service)
            .map(|b| b.consecutive_failures)
            .unwrap_or(0)
    }

    /// Administrative reset. Returns whether a breaker existed.
    pub fn reset(&self, service: &str) -> bool {
        match self.breakers.remove(service) {
            Some((_, breaker)) => {
                tracing::info!(service = %service, previous = %breaker.state, "Circuit breaker reset");
                metrics::record_circuit_transition(service, breaker.state, CircuitState::Closed);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, CircuitBreakerSnapshot> {
        let now = Instant::now();
        self.breakers
            .iter()
            .map(|entry| {
                let b = entry.value();
                let snapshot = CircuitBreakerSnapshot {
                    state: b.effective_state(now),
                    consecutive_failures: b.consecutive_failures,
                    threshold: b.threshold,
                    reset_timeout_ms: u64::try_from(b.reset_timeout.as_millis()).unwrap_or(u64::MAX),
                    ms_since_last_failure: b.last_failure_time.map(|at| {
                        u64::try_from(now.saturating_duration_since(at).as_millis())
                            .unwrap_or(u64::MAX)
                    }),
                };
                (entry.key().clone(), snapshot)
            })
            .collect()
    }

    fn release_trial(&self, service: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(service) {
            if breaker.state == CircuitState::HalfOpen {
                breaker.trial_in_flight = false;
                tracing::debug!(service = %service, "Half-open trial abandoned");
            }
        }
    }
}

/// Admission granted by [`CircuitBreakerRegistry::try_acquire`].
///
/// Settle it with [`success`](Self::success) or [`failure`](Self::failure). Dropping an
/// unsettled trial permit (cancelled call) frees the half-open slot without counting
/// an outcome.
#[derive(Debug)]
pub struct CircuitPermit {
    registry: CircuitBreakerRegistry,
    service: String,
    trial: bool,
    settled: bool,
}

impl CircuitPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.registry.settle_success(&self.service, self.trial);
    }

    pub fn failure(mut self, settings: BreakerSettings) {
        self.settled = true;
        self.registry.settle_failure(&self.service, settings, self.trial);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.registry.release_trial(&self.service);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(threshold: u32, reset_ms: u64) -> BreakerSettings {
        BreakerSettings {
            threshold,
            reset_timeout: Duration::from_millis(reset_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_exactly_at_threshold() {
        let registry = CircuitBreakerRegistry::new();
        let s = settings(3, 1000);

        registry.record_failure("svc", s);
        registry.record_failure("svc", s);
        assert_eq!(registry.state("svc"), CircuitState::Closed);
        assert!(registry.allow("svc"));

        registry.record_failure("svc", s);
        assert_eq!(registry.state("svc"), CircuitState::Open);
        assert!(!registry.allow("svc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_streak_while_closed() {
        let registry = CircuitBreakerRegistry::new();
        let s = settings(3, 1000);

        registry.record_failure("svc", s);
        registry.record_failure("svc", s);
        registry.record_success("svc");
        assert_eq!(registry.consecutive_failures("svc"), 0);

        registry.record_failure("svc", s);
        registry.record_failure("svc", s);
        assert_eq!(registry.state("svc"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_until_reset_timeout() {
        let registry = CircuitBreakerRegistry::new();
        registry.record_failure("svc", settings(1, 1000));

        match registry.try_acquire("svc") {
            Err(DispatchError::CircuitOpen { failures, retry_after, .. }) => {
                assert_eq!(failures, 1);
                assert_eq!(retry_after, Duration::from_millis(1000));
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(registry.try_acquire("svc").is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(registry.state("svc"), CircuitState::HalfOpen);
        assert!(registry.try_acquire("svc").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_a_single_trial() {
        let registry = CircuitBreakerRegistry::new();
        registry.record_failure("svc", settings(1, 100));
        tokio::time::advance(Duration::from_millis(100)).await;

        let trial = registry.try_acquire("svc").unwrap();
        assert!(trial.is_trial());
        assert!(registry.try_acquire("svc").is_err());

        trial.success();
        assert_eq!(registry.state("svc"), CircuitState::Closed);
        assert_eq!(registry.consecutive_failures("svc"), 0);
        assert!(!registry.try_acquire("svc").unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let registry = CircuitBreakerRegistry::new();
        let s = settings(2, 100);
        registry.record_failure("svc", s);
        registry.record_failure("svc", s);
        tokio::time::advance(Duration::from_millis(150)).await;

        registry.try_acquire("svc").unwrap().failure(s);
        assert_eq!(registry.state("svc"), CircuitState::Open);

        // Window restarts from the trial failure.
        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(registry.try_acquire("svc").is_err());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(registry.try_acquire("svc").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_outcomes_do_not_override_trial() {
        let registry = CircuitBreakerRegistry::new();
        let s = settings(1, 100);

        let slow = registry.try_acquire("svc").unwrap();
        registry.try_acquire("svc").unwrap().failure(s);
        assert_eq!(registry.state("svc"), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(100)).await;
        let trial = registry.try_acquire("svc").unwrap();
        assert!(trial.is_trial());

        slow.failure(s);
        assert_eq!(registry.state("svc"), CircuitState::HalfOpen);
        assert!(registry.try_acquire("svc").is_err());

        trial.success();
        assert_eq!(registry.state("svc"), CircuitState::Closed);
        assert_eq!(registry.consecutive_failures("svc"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_does_not_close_half_open() {
        let registry = CircuitBreakerRegistry::new();
        let s = settings(1, 100);

        let slow = registry.try_acquire("svc").unwrap();
        registry.try_acquire("svc").unwrap().failure(s);
        tokio::time::advance(Duration::from_millis(100)).await;
        let trial = registry.try_acquire("svc").unwrap();

        slow.success();
        assert_eq!(registry.state("svc"), CircuitState::HalfOpen);

        trial.failure(s);
        assert_eq!(registry.state("svc"), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_frees_slot() {
        let registry = CircuitBreakerRegistry::new();
        registry.record_failure("svc", settings(1, 10));
        tokio::time::advance(Duration::from_millis(10)).await;

        let trial = registry.try_acquire("svc").unwrap();
        drop(trial);

        assert_eq!(registry.state("svc"), CircuitState::HalfOpen);
        assert!(registry.try_acquire("svc").unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_snapshot() {
        let registry = CircuitBreakerRegistry::new();
        registry.record_failure("a", settings(1, 5000));
        registry.record_failure("b", settings(5, 5000));
        tokio::time::advance(Duration::from_millis(40)).await;

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["a"].state, CircuitState::Open);
        assert_eq!(snapshot["a"].ms_since_last_failure, Some(40));
        assert_eq!(snapshot["b"].state, CircuitState::Closed);
        assert_eq!(snapshot["b"].consecutive_failures, 1);

        assert!(registry.reset("a"));
        assert!(!registry.reset("a"));
        assert_eq!(registry.state("a"), CircuitState::Closed);
        assert!(registry.allow("a"));
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_not_lost() {
        let registry = CircuitBreakerRegistry::new();
        let s = settings(u32::MAX, 1000);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    registry.record_failure("shared", s);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(registry.consecutive_failures("shared"), 1600);
    }
}
