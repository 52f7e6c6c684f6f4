use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::models::job::{JobId, JobStatus};
use crate::models::scan::QrCodeResult;
use crate::services::submit::submit_job;

/// Request to queue a video that is already on shared storage.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitRequest {
    #[garde(length(min = 1, max = 4096))]
    pub path: String,
}

/// Response after queueing a video.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: String,
}

/// POST /api/v1/jobs: queue a staged video for QR extraction.
pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), StatusCode> {
    request.validate().map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;
    if request.path.trim().is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let job = submit_job(&state.store, state.queue.as_ref(), &state.topic, request.path)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            id: job.id.to_string(),
        }),
    ))
}

/// GET /api/v1/jobs/{id}/status
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, StatusCode> {
    let id = JobId::parse(id).map_err(|_| StatusCode::BAD_REQUEST)?;
    match state.store.status(&id).await {
        Ok(Some(status)) => Ok(Json(status)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "Failed to read job status");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/v1/jobs/{id}/results: empty until the job completes.
pub async fn results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<QrCodeResult>>, StatusCode> {
    let id = JobId::parse(id).map_err(|_| StatusCode::BAD_REQUEST)?;
    state.store.results(&id).await.map(Json).map_err(|e| {
        tracing::error!(job_id = %id, error = %e, "Failed to read job results");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
