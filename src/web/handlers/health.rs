//! Health check handler.

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::web::dto::HealthResponse;
use crate::web::handlers::AppState;

/// GET /api/health - Liveness probe, no credential required.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.version))
}
