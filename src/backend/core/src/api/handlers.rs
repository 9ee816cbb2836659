//! API request handlers with proper error propagation.
//!
//! All handlers return `Result<impl IntoResponse, JoblineError>` so that errors
//! are automatically converted to appropriate HTTP status codes via the
//! `IntoResponse` implementation on `JoblineError`.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::{ApiResponse, AppState};
use crate::error::{ErrorCode, JoblineError};
use crate::jobs::{JobId, SubmissionStatus};

/// Header carrying a client-chosen idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

const DUPLICATE_MESSAGE: &str = "Identical job was recently submitted";

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.jobs.health().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if report.healthy { "healthy" } else { "unhealthy" },
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "checks": report,
        })),
    )
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Handlers
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize, Serialize)]
pub struct SubmitJobRequest {
    pub kind: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Result<impl IntoResponse, JoblineError> {
    let Json(req) = payload.map_err(|rejection| {
        JoblineError::with_internal(
            ErrorCode::InvalidJson,
            "Request body must be a JSON job submission",
            rejection.body_text(),
        )
    })?;

    let header_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    let key = req.idempotency_key.as_deref().or(header_key);

    let submission = state.jobs.enqueue(&req.kind, req.input, key).await?;

    let (status, message) = match submission.status {
        SubmissionStatus::Queued => (StatusCode::CREATED, None),
        SubmissionStatus::ExistingJobFound => (StatusCode::OK, Some(DUPLICATE_MESSAGE.to_string())),
    };

    Ok((
        status,
        Json(ApiResponse::success(SubmitJobResponse {
            job_id: submission.job_id,
            status: submission.status,
            message,
        })),
    ))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, JoblineError> {
    let id: JobId = id
        .parse()
        .map_err(|_| JoblineError::validation(format!("Invalid job id: {}", id)))?;

    let job = state.jobs.get_status(id).await?;
    Ok(Json(ApiResponse::success(job)))
}
