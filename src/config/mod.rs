//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → DispatcherConfig (validated, immutable)
//!     → held by the Dispatcher behind an ArcSwap
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Dispatcher::apply_config swaps it in
//!     → subsequent calls resolve their policy from the new config
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Breaker/bulkhead state survives reloads; only knobs change

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, BulkheadConfig, CircuitBreakerConfig, DispatcherConfig, HealthCheckConfig,
    HealthConfig, ObservabilityConfig, RetryConfig, ServiceOverride,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
