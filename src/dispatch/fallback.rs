//! Primary/fallback provider selection.
//!
//! # Data Flow
//! ```text
//! dispatch:
//!     primary envelope (primary_service) ── ok ──▶ result
//!         │ any terminal error
//!         ▼
//!     fallback envelope (fallback_service) ── ok ──▶ result
//!         │ error
//!         ▼
//!     FallbackExhausted { primary, fallback }
//!
//! dispatch_with_health:
//!     primary provider healthy?  yes → dispatch
//!                                no  → fallback envelope only
//! ```
//!
//! # Design Decisions
//! - Each side runs in its own envelope: separate breaker, bulkhead and stats keys
//! - An unhealthy primary is never invoked; its slot in the combined error is
//!   `ProviderUnhealthy`
//! - The fallback's own liveness is not consulted; its breaker already gates it

use std::future::Future;

use crate::dispatch::dispatcher::Dispatcher;
use crate::error::{DispatchError, DispatchResult, OperationError};
use crate::health::Provider;
use crate::observability::metrics;

/// Services and tool a fallback dispatch runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackContext {
    pub primary_service: String,
    pub fallback_service: String,
    pub tool: String,
}

impl FallbackContext {
    pub fn new(
        primary_service: impl Into<String>,
        fallback_service: impl Into<String>,
        tool: impl Into<String>,
    ) -> Self {
        Self {
            primary_service: primary_service.into(),
            fallback_service: fallback_service.into(),
            tool: tool.into(),
        }
    }
}

impl Dispatcher {
    /// Try `primary`; on any terminal failure try `fallback`.
    pub async fn dispatch<T, E1, F1, Fut1, E2, F2, Fut2>(
        &self,
        primary: F1,
        fallback: F2,
        ctx: &FallbackContext,
    ) -> DispatchResult<T>
    where
        F1: FnMut() -> Fut1,
        Fut1: Future<Output = Result<T, E1>>,
        E1: Into<OperationError>,
        F2: FnMut() -> Fut2,
        Fut2: Future<Output = Result<T, E2>>,
        E2: Into<OperationError>,
    {
        match self.execute(&ctx.primary_service, &ctx.tool, primary).await {
            Ok(value) => Ok(value),
            Err(primary_error) => {
                tracing::warn!(
                    primary = %ctx.primary_service,
                    fallback = %ctx.fallback_service,
                    tool = %ctx.tool,
                    error = %primary_error,
                    "Primary failed, falling back"
                );
                metrics::record_fallback(&ctx.primary_service, &ctx.fallback_service, primary_error.label());
                self.run_fallback(primary_error, fallback, ctx).await
            }
        }
    }

    /// Like [`dispatch`](Self::dispatch), but skips a primary whose probe reports it down.
    pub async fn dispatch_with_health<T, E1, F1, Fut1, E2, F2, Fut2>(
        &self,
        primary_provider: &Provider,
        primary: F1,
        fallback: F2,
        ctx: &FallbackContext,
    ) -> DispatchResult<T>
    where
        F1: FnMut() -> Fut1,
        Fut1: Future<Output = Result<T, E1>>,
        E1: Into<OperationError>,
        F2: FnMut() -> Fut2,
        Fut2: Future<Output = Result<T, E2>>,
        E2: Into<OperationError>,
    {
        if self.health().is_healthy(primary_provider).await {
            return self.dispatch(primary, fallback, ctx).await;
        }

        tracing::warn!(
            provider = %primary_provider.name(),
            primary = %ctx.primary_service,
            fallback = %ctx.fallback_service,
            tool = %ctx.tool,
            "Primary provider unhealthy, skipping to fallback"
        );
        let skipped = DispatchError::ProviderUnhealthy {
            provider: primary_provider.name().to_string(),
        };
        metrics::record_fallback(&ctx.primary_service, &ctx.fallback_service, skipped.label());
        self.run_fallback(skipped, fallback, ctx).await
    }

    async fn run_fallback<T, E, F, Fut>(
        &self,
        primary_error: DispatchError,
        fallback: F,
        ctx: &FallbackContext,
    ) -> DispatchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OperationError>,
    {
        match self.execute(&ctx.fallback_service, &ctx.tool, fallback).await {
            Ok(value) => {
                tracing::info!(
                    fallback = %ctx.fallback_service,
                    tool = %ctx.tool,
                    "Fallback succeeded"
                );
                Ok(value)
            }
            Err(fallback_error) => {
                tracing::error!(
                    primary = %ctx.primary_service,
                    fallback = %ctx.fallback_service,
                    tool = %ctx.tool,
                    primary_error = %primary_error,
                    fallback_error = %fallback_error,
                    "Primary and fallback both failed"
                );
                Err(DispatchError::FallbackExhausted {
                    primary: Box::new(primary_error),
                    fallback: Box::new(fallback_error),
                })
            }
        }
    }
}
