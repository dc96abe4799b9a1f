//! Provider liveness.
//!
//! # Data Flow
//! ```text
//! Fallback dispatcher asks is_healthy(provider):
//!     → tracker.rs (cached flag younger than the window? return it)
//!     → otherwise run the provider's probe.rs HealthProbe once, bounded by a timeout
//!     → cache the outcome; a failed, timed out or panicking probe caches `false`
//! ```
//!
//! # Design Decisions
//! - Optimistic re-probing, pessimistic failure: one failed probe marks the provider
//!   down for the rest of the window, and no retry is applied to probes
//! - Probes are supplied by the caller; the tracker never knows the protocol
//! - Explicit health-check operations go through the full resilience envelope and are
//!   recorded separately by the metrics aggregator

pub mod probe;
pub mod tracker;

pub use probe::{HealthProbe, HttpProbe};
pub use tracker::{HealthTracker, Provider, ProviderSnapshot};
