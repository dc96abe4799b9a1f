//! Time-cached provider liveness.
//!
//! # States
//! - Unknown: never probed, or invalidated; the next query probes
//! - Fresh: probed within the cache window; the cached flag is returned as is
//! - Stale: older than the window; the next query probes again
//!
//! Concurrent queries against a stale entry may each run the probe; the last
//! result written wins.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::HealthConfig;
use crate::health::probe::HealthProbe;
use crate::observability::metrics;

/// An alternative backend and the probe that checks it.
#[derive(Clone)]
pub struct Provider {
    name: String,
    probe: Arc<dyn HealthProbe>,
}

impl Provider {
    pub fn new(name: impl Into<String>, probe: impl HealthProbe + 'static) -> Self {
        Self {
            name: name.into(),
            probe: Arc::new(probe),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider").field("name", &self.name).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct ProviderHealth {
    healthy: bool,
    checked_at: Instant,
    checked_at_unix_ms: u64,
    last_error: Option<String>,
}

/// Cached liveness of one provider as exposed in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSnapshot {
    pub healthy: bool,
    pub last_checked_unix_ms: u64,
    pub last_error: Option<String>,
}

/// Liveness cache shared by every clone.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    entries: Arc<DashMap<String, ProviderHealth>>,
    cache_window: Duration,
    probe_timeout: Duration,
}

impl HealthTracker {
    pub fn new(cache_window: Duration, probe_timeout: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            cache_window,
            probe_timeout,
        }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(config.cache_window(), config.probe_timeout())
    }

    pub fn cache_window(&self) -> Duration {
        self.cache_window
    }

    /// Cached flag if fresh, otherwise the result of a new probe. Never fails.
    pub async fn is_healthy(&self, provider: &Provider) -> bool {
        if let Some(entry) = self.entries.get(provider.name()) {
            if entry.checked_at.elapsed() < self.cache_window {
                return entry.healthy;
            }
        }

        let outcome = self.run_probe(provider).await;
        let healthy = outcome.is_ok();
        let previous = self.entries.insert(
            provider.name().to_string(),
            ProviderHealth {
                healthy,
                checked_at: Instant::now(),
                checked_at_unix_ms: unix_ms(),
                last_error: outcome.err(),
            },
        );

        match previous.map(|p| p.healthy) {
            Some(true) | None if !healthy => {
                tracing::warn!(provider = %provider.name(), "Provider marked unhealthy")
            }
            Some(false) if healthy => {
                tracing::info!(provider = %provider.name(), "Provider recovered")
            }
            _ => {}
        }
        metrics::record_provider_health(provider.name(), healthy);

        healthy
    }

    async fn run_probe(&self, provider: &Provider) -> Result<(), String> {
        let probe = AssertUnwindSafe(async { provider.probe.probe().await }).catch_unwind();
        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => {
                tracing::debug!(provider = %provider.name(), error = %e, "Health probe failed");
                Err(e.to_string())
            }
            Ok(Err(_)) => {
                tracing::warn!(provider = %provider.name(), "Health probe panicked");
                Err("probe panicked".to_string())
            }
            Err(_) => {
                tracing::debug!(provider = %provider.name(), timeout = ?self.probe_timeout, "Health probe timed out");
                Err(format!("probe timed out after {}ms", self.probe_timeout.as_millis()))
            }
        }
    }

    /// Drop the cached flag so the next query probes. Returns whether one existed.
    pub fn invalidate(&self, provider: &str) -> bool {
        self.entries.remove(provider).is_some()
    }

    /// Cached flag regardless of age, without probing.
    pub fn cached(&self, provider: &str) -> Option<bool> {
        self.entries.get(provider).map(|e| e.healthy)
    }

    pub fn snapshot(&self) -> BTreeMap<String, ProviderSnapshot> {
        self.entries
            .iter()
            .map(|entry| {
                let h = entry.value();
                (
                    entry.key().clone(),
                    ProviderSnapshot {
                        healthy: h.healthy,
                        last_checked_unix_ms: h.checked_at_unix_ms,
                        last_error: h.last_error.clone(),
                    },
                )
            })
            .collect()
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OperationError;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn counting_provider(name: &str, up: Arc<AtomicBool>, probes: Arc<AtomicU32>) -> Provider {
        Provider::new(name, move || {
            let up = up.load(Ordering::SeqCst);
            probes.fetch_add(1, Ordering::SeqCst);
            async move {
                if up {
                    Ok(())
                } else {
                    Err(OperationError::transport("connection refused"))
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_caches_within_window() {
        let tracker = HealthTracker::new(Duration::from_secs(30), Duration::from_secs(1));
        let up = Arc::new(AtomicBool::new(true));
        let probes = Arc::new(AtomicU32::new(0));
        let provider = counting_provider("primary", up.clone(), probes.clone());

        assert!(tracker.is_healthy(&provider).await);
        up.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(tracker.is_healthy(&provider).await);
        assert_eq!(probes.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!tracker.is_healthy(&provider).await);
        assert_eq!(probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_sticks_for_the_window() {
        let tracker = HealthTracker::new(Duration::from_secs(30), Duration::from_secs(1));
        let up = Arc::new(AtomicBool::new(false));
        let probes = Arc::new(AtomicU32::new(0));
        let provider = counting_provider("p", up.clone(), probes.clone());

        assert!(!tracker.is_healthy(&provider).await);
        up.store(true, Ordering::SeqCst);
        assert!(!tracker.is_healthy(&provider).await);
        assert_eq!(probes.load(Ordering::SeqCst), 1);

        assert!(tracker.invalidate("p"));
        assert!(tracker.is_healthy(&provider).await);
        assert_eq!(probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_is_unhealthy() {
        let tracker = HealthTracker::new(Duration::from_secs(30), Duration::from_millis(100));
        let provider = Provider::new("slow", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), OperationError>(())
        });

        assert!(!tracker.is_healthy(&provider).await);
        let snapshot = tracker.snapshot();
        assert!(!snapshot["slow"].healthy);
        assert!(snapshot["slow"].last_error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_panicking_probe_is_swallowed() {
        let tracker = HealthTracker::new(Duration::from_secs(30), Duration::from_secs(1));
        let provider = Provider::new("boom", || async {
            if true {
                panic!("probe exploded");
            }
            Ok::<(), OperationError>(())
        });

        assert!(!tracker.is_healthy(&provider).await);
        assert_eq!(tracker.cached("boom"), Some(false));
        assert_eq!(tracker.cached("unknown"), None);
    }
}
