//! Health and readiness endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub store: CheckStatus,
}

#[derive(Debug, Serialize)]
pub struct CheckStatus {
    pub healthy: bool,
    pub backend: &'static str,
    pub message: String,
}

/// GET /
pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /health
///
/// Basic health check - returns 200 if the server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /ready
///
/// Readiness check - verifies the forecast store answers
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let backend = state.store.backend();
    let store_check = match state.store.ping().await {
        Ok(()) => CheckStatus {
            healthy: true,
            backend,
            message: "Connected".to_string(),
        },
        Err(e) => {
            warn!(error = %e, backend, "Readiness check failed");
            CheckStatus {
                healthy: false,
                backend,
                message: e.to_string(),
            }
        }
    };

    let (status, status_code) = if store_check.healthy {
        ("ready", StatusCode::OK)
    } else {
        ("not_ready", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        status_code,
        Json(ReadinessResponse {
            status,
            checks: ReadinessChecks { store: store_check },
        }),
    )
}
