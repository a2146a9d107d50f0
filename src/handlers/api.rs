use axum::{extract::State, response::Json};
use serde::Serialize;
use std::sync::Arc;

use crate::core::bridge::BridgeReport;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness probe.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct CallsResponse {
    pub active: usize,
    pub calls: Vec<BridgeReport>,
}

/// List bridges for calls currently connected.
pub async fn list_calls(State(state): State<Arc<AppState>>) -> Json<CallsResponse> {
    let mut calls = state.calls.snapshot();
    calls.sort_by_key(|call| std::cmp::Reverse(call.duration_ms));
    Json(CallsResponse {
        active: calls.len(),
        calls,
    })
}
