//! Dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Caller (operation + service/tool)
//!     → dispatcher.rs (policy lookup, bulkhead, retry engine)
//!
//! Caller (primary + fallback + FallbackContext)
//!     → fallback.rs (health check on the primary provider, primary envelope,
//!                    fallback envelope, combined error)
//! ```

pub mod dispatcher;
pub mod fallback;

pub use dispatcher::{Dispatcher, HEALTH_CHECK_TOOL};
pub use fallback::FallbackContext;
