//! Per-resource concurrency bulkheads.
//!
//! Admission is immediate: a full bulkhead rejects instead of queueing. The returned
//! permit decrements the count when dropped, so every exit path (success, failure,
//! timeout, cancellation, panic unwinding) gives the slot back exactly once.
//!
//! Capacity follows the latest admission. Lowering it while slots are held never
//! evicts a holder, so a snapshot may briefly show `current_executions` above
//! `max_executions` until enough permits drop; no new call is admitted meanwhile.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::error::DispatchError;
use crate::observability::metrics;

#[derive(Debug)]
struct Bulkhead {
    current: AtomicUsize,
    max: AtomicUsize,
}

/// Point-in-time occupancy of one bulkhead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkheadSnapshot {
    pub current_executions: usize,
    pub max_executions: usize,
}

/// Registry of bulkheads keyed by resource name.
#[derive(Debug, Clone, Default)]
pub struct BulkheadRegistry {
    bulkheads: Arc<DashMap<String, Arc<Bulkhead>>>,
}

impl BulkheadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the bulkhead for `key`, or fail with `BulkheadFull`.
    ///
    /// `max_concurrent` is the capacity the caller's configuration asks for; the latest
    /// value wins so reloads take effect on the next admission.
    pub fn try_enter(&self, key: &str, max_concurrent: usize) -> Result<BulkheadPermit, DispatchError> {
        let bulkhead = self
            .bulkheads
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Bulkhead {
                    current: AtomicUsize::new(0),
                    max: AtomicUsize::new(max_concurrent),
                })
            })
            .clone();
        bulkhead.max.store(max_concurrent, Ordering::Release);

        let mut prev = bulkhead.current.load(Ordering::Acquire);
        loop {
            if prev >= max_concurrent {
                tracing::debug!(resource = %key, current = prev, max = max_concurrent, "Bulkhead full, rejecting");
                metrics::record_bulkhead_rejection(key);
                return Err(DispatchError::BulkheadFull {
                    resource: key.to_string(),
                    max_concurrent,
                });
            }
            match bulkhead.current.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => prev = actual,
            }
        }
        metrics::record_bulkhead_in_flight(key, prev + 1);

        Ok(BulkheadPermit {
            key: key.to_string(),
            bulkhead,
        })
    }

    /// Executions currently inside `key`'s bulkhead.
    pub fn current(&self, key: &str) -> usize {
        self.bulkheads
            .get(key)
            .map(|b| b.current.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, BulkheadSnapshot> {
        self.bulkheads
            .iter()
            .map(|entry| {
                let b = entry.value();
                (
                    entry.key().clone(),
                    BulkheadSnapshot {
                        current_executions: b.current.load(Ordering::Acquire),
                        max_executions: b.max.load(Ordering::Acquire),
                    },
                )
            })
            .collect()
    }
}

/// Slot held inside a bulkhead. Released on drop.
#[derive(Debug)]
pub struct BulkheadPermit {
    key: String,
    bulkhead: Arc<Bulkhead>,
}

impl BulkheadPermit {
    pub fn resource(&self) -> &str {
        &self.key
    }
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        let prev = self.bulkhead.current.fetch_sub(1, Ordering::AcqRel);
        metrics::record_bulkhead_in_flight(&self.key, prev.saturating_sub(1));
    }
}
