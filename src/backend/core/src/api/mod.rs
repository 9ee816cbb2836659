//! HTTP surface for submitting jobs and reading their status.
//!
//! - `POST /api/v1/jobs` submit a job (or find the recent identical one)
//! - `GET /api/v1/jobs/:id` current job record
//! - `GET /health` store and transport probes
//! - `GET /metrics` Prometheus exposition

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::jobs::JobService;

pub use handlers::{SubmitJobRequest, SubmitJobResponse, IDEMPOTENCY_KEY_HEADER};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: JobService,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(jobs: JobService) -> Self {
        Self { jobs, metrics: None }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Build the API router.
///
/// # Example
///
/// ```rust,ignore
/// let state = AppState::new(JobService::new(store, transport, window));
/// let app = build_router(state);
/// ```
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/api/v1/jobs", post(handlers::submit_job))
        .route("/api/v1/jobs/:id", get(handlers::get_job))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// API response wrapper.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }
}
