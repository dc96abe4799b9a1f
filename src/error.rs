//! Error types for dispatched operations.
//!
//! Two layers:
//! - [`OperationError`] is what a single attempt fails with. It carries a structured
//!   [`ErrorKind`] set where the error originates, which the retry engine classifies.
//! - [`DispatchError`] is the terminal error crossing the dispatcher boundary. A call
//!   produces exactly one of its variants.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Structured tag describing why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection reset/refused, name resolution failure and similar transient transport faults.
    Transport,
    /// The attempt (or the upstream) timed out.
    Timeout,
    /// The upstream answered with a status code.
    Status(u16),
    /// The provider signalled a rate limit, possibly with a cooldown.
    RateLimited,
    /// Internal failure explicitly marked as safe to retry.
    Retryable,
    /// Failure that retrying cannot fix (validation, auth, bad request).
    Fatal,
    /// Error from an opaque third-party collaborator; classified by its message.
    Opaque,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Status(code) => write!(f, "status {}", code),
            ErrorKind::RateLimited => write!(f, "rate_limited"),
            ErrorKind::Retryable => write!(f, "retryable"),
            ErrorKind::Fatal => write!(f, "fatal"),
            ErrorKind::Opaque => write!(f, "opaque"),
        }
    }
}

/// Failure of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct OperationError {
    kind: ErrorKind,
    message: String,
    retry_after: Option<Duration>,
}

impl OperationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Upstream answered with `code`.
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Status(code), message)
    }

    /// Provider-communicated rate limit. `retry_after` is the cooldown it asked for.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: ErrorKind::RateLimited,
            message: message.into(),
            retry_after,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retryable, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn opaque(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Opaque, message)
    }

    /// Attach a cooldown (e.g. from a `Retry-After` header on a 429).
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Key used to group identical failures in the error-pattern table.
    pub fn signature(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }

    /// Whether the retry engine may try again after this error.
    pub fn is_retryable(&self) -> bool {
        crate::resilience::retries::is_retryable(self)
    }
}

impl From<std::io::Error> for OperationError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match err.kind() {
            Io::ConnectionReset
            | Io::ConnectionRefused
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::BrokenPipe
            | Io::AddrNotAvailable
            | Io::UnexpectedEof => ErrorKind::Transport,
            Io::TimedOut => ErrorKind::Timeout,
            // DNS failures surface as `Other`/`Uncategorized`; message matching picks them up.
            _ => ErrorKind::Opaque,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for OperationError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::timeout(err.to_string())
    }
}

/// Terminal error returned by the dispatcher.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// The service's breaker is open; the operation was not invoked.
    #[error("circuit breaker open for '{service}' after {failures} consecutive failures (retry in {retry_after:?})")]
    CircuitOpen {
        service: String,
        failures: u32,
        retry_after: Duration,
    },

    /// Admission rejected by a full bulkhead; the operation was not invoked.
    #[error("bulkhead '{resource}' is full ({max_concurrent} concurrent executions)")]
    BulkheadFull {
        resource: String,
        max_concurrent: usize,
    },

    /// A standalone timeout wrapper elapsed.
    #[error("operation timed out after {timeout:?}")]
    OperationTimeout { timeout: Duration },

    /// The operation failed with an error that retrying cannot fix.
    #[error("{service}/{tool} failed after {attempts} attempt(s) with a non-retryable error: {source}")]
    NonRetryable {
        service: String,
        tool: String,
        attempts: u32,
        #[source]
        source: OperationError,
    },

    /// Every permitted attempt failed.
    #[error("{service}/{tool} exhausted {attempts} attempt(s): {source}")]
    RetryExhausted {
        service: String,
        tool: String,
        attempts: u32,
        #[source]
        source: OperationError,
    },

    /// The provider was skipped because its health probe reported it down.
    #[error("provider '{provider}' skipped: unhealthy")]
    ProviderUnhealthy { provider: String },

    /// Both the primary and the fallback failed.
    #[error("primary and fallback both failed; primary: {primary}; fallback: {fallback}")]
    FallbackExhausted {
        primary: Box<DispatchError>,
        fallback: Box<DispatchError>,
    },
}

impl DispatchError {
    /// Attempts that actually invoked the operation before this error was produced.
    pub fn attempts(&self) -> u32 {
        match self {
            DispatchError::NonRetryable { attempts, .. }
            | DispatchError::RetryExhausted { attempts, .. } => *attempts,
            DispatchError::FallbackExhausted { primary, fallback } => {
                primary.attempts() + fallback.attempts()
            }
            _ => 0,
        }
    }

    /// The last attempt error, if an attempt was made.
    pub fn last_cause(&self) -> Option<&OperationError> {
        match self {
            DispatchError::NonRetryable { source, .. }
            | DispatchError::RetryExhausted { source, .. } => Some(source),
            DispatchError::FallbackExhausted { fallback, .. } => fallback.last_cause(),
            _ => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchError::CircuitOpen { .. } => "circuit_open",
            DispatchError::BulkheadFull { .. } => "bulkhead_full",
            DispatchError::OperationTimeout { .. } => "timeout",
            DispatchError::NonRetryable { .. } => "non_retryable",
            DispatchError::RetryExhausted { .. } => "retry_exhausted",
            DispatchError::ProviderUnhealthy { .. } => "provider_unhealthy",
            DispatchError::FallbackExhausted { .. } => "fallback_exhausted",
        }
    }
}

/// Result alias for dispatcher calls.
pub type DispatchResult<T> = Result<T, DispatchError>;
