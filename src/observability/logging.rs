//! Structured logging.
//!
//! # Design Decisions
//! - Uses the tracing crate; every dispatcher event carries service/tool fields
//! - `RUST_LOG` wins over the configured level so operators can raise verbosity
//!   without touching the config file
//! - Initialisation is idempotent: a second call (tests, embedding applications that
//!   already installed a subscriber) is a no-op

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global subscriber. Returns false when one was already installed.
pub fn init(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        let config = ObservabilityConfig {
            log_level: "not a valid [directive".to_string(),
            ..Default::default()
        };
        let _ = init(&config);
        assert!(!init(&config));
    }
}
