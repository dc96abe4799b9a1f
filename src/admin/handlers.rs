use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::observability::ResilienceSnapshot;
use crate::resilience::CircuitState;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub open_circuits: Vec<String>,
    pub in_flight: usize,
    pub error_patterns: usize,
}

#[derive(Debug, Serialize)]
pub struct ActionResult {
    pub target: String,
    pub action: &'static str,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let snapshot = state.dispatcher.snapshot();
    let open_circuits: Vec<String> = snapshot
        .circuit_breakers
        .iter()
        .filter(|(_, b)| b.state == CircuitState::Open)
        .map(|(service, _)| service.clone())
        .collect();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if open_circuits.is_empty() { "operational" } else { "degraded" },
        in_flight: snapshot.bulkheads.values().map(|b| b.current_executions).sum(),
        error_patterns: snapshot.error_patterns.len(),
        open_circuits,
    })
}

pub async fn get_snapshot(State(state): State<AdminState>) -> Json<ResilienceSnapshot> {
    Json(state.dispatcher.snapshot())
}

pub async fn reset_circuit_breaker(
    State(state): State<AdminState>,
    Path(service): Path<String>,
) -> Result<Json<ActionResult>, StatusCode> {
    if state.dispatcher.reset_circuit_breaker(&service) {
        Ok(Json(ActionResult {
            target: service,
            action: "circuit_breaker_reset",
        }))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

pub async fn clear_error_patterns(State(state): State<AdminState>) -> StatusCode {
    state.dispatcher.clear_error_patterns();
    StatusCode::NO_CONTENT
}

pub async fn invalidate_provider(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<ActionResult>, StatusCode> {
    if state.dispatcher.invalidate_provider(&name) {
        Ok(Json(ActionResult {
            target: name,
            action: "provider_invalidated",
        }))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
