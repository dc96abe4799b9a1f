//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Ctrl-C or explicit trigger
//!     → broadcast to subscribers (admin server, config follower)
//!     → each task finishes its current unit of work and exits
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
