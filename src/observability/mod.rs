//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Retry engine / breakers / bulkheads / health tracker produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (Prometheus counters, gauges, histograms)
//!     → aggregator.rs (in-process stats, error patterns, health-check records)
//!
//! Consumers:
//!     → Metrics endpoint (Prometheus scrape)
//!     → Admin snapshot endpoint (aggregator.snapshot())
//! ```
//!
//! # Design Decisions
//! - Recording never fails and never propagates into a dispatched call
//! - Metrics are cheap (atomic increments) and no-ops without an installed recorder

pub mod aggregator;
pub mod logging;
pub mod metrics;

use std::net::SocketAddr;

use crate::config::ObservabilityConfig;

pub use aggregator::{
    ErrorPatternSnapshot, HealthCheckRecord, HealthStatus, MetricsAggregator, ResilienceSnapshot,
    RetryStats,
};

/// Install logging and, when enabled, the Prometheus exporter.
///
/// A bad metrics address or exporter failure is logged and otherwise ignored.
pub fn install(config: &ObservabilityConfig) {
    logging::init(config);

    if !config.metrics_enabled {
        return;
    }
    match config.metrics_address.parse::<SocketAddr>() {
        Ok(addr) => {
            if let Err(e) = metrics::init_metrics(addr) {
                tracing::error!(error = %e, "Failed to install metrics exporter");
            }
        }
        Err(e) => {
            tracing::error!(address = %config.metrics_address, error = %e, "Invalid metrics address");
        }
    }
}
