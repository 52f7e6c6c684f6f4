pub mod health;
pub mod jobs;
pub mod metrics;

use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

/// Job submission, status and result routes plus the health check.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs", post(jobs::submit))
        .route("/api/v1/jobs/{id}/status", get(jobs::status))
        .route("/api/v1/jobs/{id}/results", get(jobs::results))
        .with_state(state)
}
