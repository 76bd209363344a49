use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// `GET /health`: liveness check.
///
/// Returns `200 OK` when DuckDB answers and `503 Service Unavailable` when it
/// does not.
///
/// Response shape:
/// ```json
/// { "status": "ok", "version": "0.1.0", "scheduler": { "mode": "cluster", "running": true } }
/// ```
#[tracing::instrument(skip(state))]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let running = state
        .scheduler
        .as_ref()
        .is_some_and(|scheduler| scheduler.is_running());
    let scheduler = json!({
        "mode": state.config.scheduler.mode.as_str(),
        "running": running,
    });
    match state.db.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "scheduler": scheduler
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Health check: DuckDB unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "version": env!("CARGO_PKG_VERSION"),
                    "scheduler": scheduler
                })),
            )
                .into_response()
        }
    }
}
