//! Admin HTTP surface.
//!
//! # Routes
//! ```text
//! GET    /admin/status                              summary
//! GET    /admin/snapshot                            full ResilienceSnapshot
//! POST   /admin/circuit-breakers/{service}/reset    drop a breaker
//! DELETE /admin/error-patterns                      clear the pattern table
//! POST   /admin/providers/{name}/invalidate         force the next probe
//! ```
//!
//! Every route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::dispatch::Dispatcher;
use crate::lifecycle::Shutdown;

/// State shared by the admin handlers.
#[derive(Debug, Clone)]
pub struct AdminState {
    pub dispatcher: Dispatcher,
    pub api_key: Arc<str>,
}

pub fn router(dispatcher: Dispatcher, api_key: impl Into<Arc<str>>) -> Router {
    let state = AdminState {
        dispatcher,
        api_key: api_key.into(),
    };

    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/snapshot", get(get_snapshot))
        .route("/admin/circuit-breakers/{service}/reset", post(reset_circuit_breaker))
        .route("/admin/error-patterns", delete(clear_error_patterns))
        .route("/admin/providers/{name}/invalidate", post(invalidate_provider))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware)),
        )
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` fires.
pub async fn serve(listener: TcpListener, router: Router, shutdown: &Shutdown) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.signalled())
        .await?;
    tracing::info!("Admin server stopped");
    Ok(())
}
