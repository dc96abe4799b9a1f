//! Resilient multi-provider request dispatcher.
//!
//! # Architecture Overview
//!
//! ```text
//!     caller operation ──▶ Dispatcher::execute / dispatch / dispatch_with_health
//!                              │
//!                              ├─▶ health       (provider liveness cache + probes)
//!                              ├─▶ resilience   (bulkhead → retry engine → breaker,
//!                              │                 per-attempt timeout, backoff)
//!                              └─▶ observability (tracing, Prometheus, aggregator)
//!
//!     config (TOML + notify hot reload) ──▶ Dispatcher (arc-swap)
//!     admin (axum) ──▶ snapshot / breaker reset / pattern clear / probe invalidation
//! ```
//!
//! The dispatcher is protocol-agnostic: an operation is any `FnMut() -> Future`
//! resolving to `Result<T, E>` with `E: Into<OperationError>`.

// Core
pub mod dispatch;
pub mod error;
pub mod health;
pub mod resilience;

// Cross-cutting concerns
pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::DispatcherConfig;
pub use dispatch::{Dispatcher, FallbackContext};
pub use error::{DispatchError, DispatchResult, ErrorKind, OperationError};
pub use health::{HealthProbe, HttpProbe, Provider};
pub use lifecycle::Shutdown;
pub use resilience::{ResiliencePolicy, RetryContext};
