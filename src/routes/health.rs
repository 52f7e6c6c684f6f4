use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub queue: ComponentHealth,
    pub store: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<u64>,
}

impl ComponentHealth {
    fn ok(latency_ms: u64) -> Self {
        Self {
            status: "ok".to_string(),
            latency_ms: Some(latency_ms),
            queue_depth: None,
        }
    }

    fn error() -> Self {
        Self {
            status: "error".to_string(),
            latency_ms: None,
            queue_depth: None,
        }
    }
}

/// GET /health: queue connectivity and status store availability.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let queue_start = std::time::Instant::now();
    let queue_check = match state.queue.health_check().await {
        Ok(()) => {
            let mut check = ComponentHealth::ok(queue_start.elapsed().as_millis() as u64);
            check.queue_depth = state.queue.depth(&state.topic).await.ok();
            if let Some(depth) = check.queue_depth {
                metrics::gauge!("qr_queue_depth").set(depth as f64);
            }
            check
        }
        Err(_) => ComponentHealth::error(),
    };

    let store_start = std::time::Instant::now();
    let store_check = match state.store.durable().ensure_dirs().await {
        Ok(()) => ComponentHealth::ok(store_start.elapsed().as_millis() as u64),
        Err(_) => ComponentHealth::error(),
    };

    let all_healthy = queue_check.status == "ok" && store_check.status == "ok";
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            queue: queue_check,
            store: store_check,
        },
    };

    (status_code, Json(response))
}
