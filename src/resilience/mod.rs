//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatched call:
//!     → bulkhead.rs (admit or reject immediately)
//!     → retries.rs (loop over attempts)
//!         → circuit_breaker.rs (gate the attempt; record outcome)
//!         → timeouts.rs (per-attempt deadline)
//!         → backoff.rs (delay before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Registries are explicit objects injected into the dispatcher, never globals
//! - Every per-key counter is updated under a shard lock or an atomic CAS loop
//! - Guards (bulkhead slot, half-open trial) release on drop so cancellation is safe

pub mod backoff;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod context;
pub mod retries;
pub mod timeouts;

pub use backoff::calculate_backoff;
pub use bulkhead::{BulkheadPermit, BulkheadRegistry, BulkheadSnapshot};
pub use circuit_breaker::{
    BreakerSettings, CircuitBreakerRegistry, CircuitBreakerSnapshot, CircuitPermit, CircuitState,
};
pub use context::{ResiliencePolicy, RetryContext};
pub use retries::{is_retryable, RetryEngine};
pub use timeouts::with_timeout;
