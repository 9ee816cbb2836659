//! Tests for the HTTP surface and the built-in query job.
//!
//! Tests cover:
//! - Job submission, dedup responses and the idempotency header
//! - Status lookup and error responses
//! - Health and metrics endpoints
//! - End-to-end query jobs against a mock answering service

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use jobline_core::api::{build_router, AppState, ApiResponse};
use jobline_core::error::{JoblineError, Result};
use jobline_core::jobs::{
    BackoffStrategy, Envelope, HandlerRegistry, InMemoryJobStore, InMemoryTransport, JobOutcome,
    JobService, JobStatus, JobStore, LifecycleManager, QueryJob, RetryPolicy, Transport, Worker,
    WorkerConfig, ENQUEUE_FAILED_MESSAGE,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WINDOW: Duration = Duration::from_secs(300);

/// Transport whose every operation fails.
struct BrokenTransport;

#[async_trait]
impl Transport for BrokenTransport {
    async fn push(&self, _envelope: &Envelope) -> Result<()> {
        Err(JoblineError::internal("queue unavailable"))
    }

    async fn pop(&self, _timeout: Duration) -> Result<Option<String>> {
        Err(JoblineError::internal("queue unavailable"))
    }

    async fn len(&self) -> Result<usize> {
        Err(JoblineError::internal("queue unavailable"))
    }
}

fn app() -> (axum::Router, Arc<InMemoryJobStore>, Arc<InMemoryTransport>) {
    let store = Arc::new(InMemoryJobStore::new());
    let transport = Arc::new(InMemoryTransport::new());
    let service = JobService::new(store.clone(), transport.clone(), WINDOW);
    (build_router(AppState::new(service)), store, transport)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_job(body: Value) -> Request<Body> {
    Request::post("/api/v1/jobs")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ============================================================================
// ApiResponse Tests
// ============================================================================

#[test]
fn test_api_response_success() {
    let response = ApiResponse::success(json!({"key": "value"}));
    let parsed = serde_json::to_value(&response).unwrap();

    assert_eq!(parsed["success"], true);
    assert_eq!(parsed["data"]["key"], "value");
}

// ============================================================================
// Submission Tests
// ============================================================================

#[tokio::test]
async fn test_submit_job_returns_created() {
    let (app, store, transport) = app();

    let (status, body) = send(&app, post_job(json!({"kind": "query", "input": {"query": "hello"}}))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "queued");
    assert!(body["data"].get("message").is_none());
    assert_eq!(store.len(), 1);
    assert_eq!(transport.pending().len(), 1);
}

#[tokio::test]
async fn test_duplicate_submission_returns_existing_job() {
    let (app, store, _) = app();

    let (_, first) = send(&app, post_job(json!({"kind": "query", "input": {"query": "hello"}}))).await;
    let (status, second) = send(&app, post_job(json!({"kind": "query", "input": {"query": " HELLO "}}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"]["status"], "existing_job_found");
    assert_eq!(second["data"]["job_id"], first["data"]["job_id"]);
    assert_eq!(second["data"]["message"], "Identical job was recently submitted");
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_idempotency_header_dedups_different_input() {
    let (app, store, _) = app();

    for query in ["first", "second"] {
        let request = Request::post("/api/v1/jobs")
            .header(header::CONTENT_TYPE, "application/json")
            .header("Idempotency-Key", "order-42")
            .body(Body::from(json!({"kind": "query", "input": {"query": query}}).to_string()))
            .unwrap();
        send(&app, request).await;
    }

    assert_eq!(store.len(), 1);
    assert_eq!(store.snapshot()[0].dedup_key, "client:order-42");
}

#[tokio::test]
async fn test_submit_with_empty_kind_is_rejected() {
    let (app, store, _) = app();

    let (status, body) = send(&app, post_job(json!({"kind": "  ", "input": {}}))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_submit_with_invalid_json_is_rejected() {
    let (app, _, _) = app();

    let request = Request::post("/api/v1/jobs")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_JSON");
}

#[tokio::test]
async fn test_submit_when_transport_down_marks_job_failed() {
    let store = Arc::new(InMemoryJobStore::new());
    let service = JobService::new(store.clone(), Arc::new(BrokenTransport), WINDOW);
    let app = build_router(AppState::new(service));

    let (status, body) = send(&app, post_job(json!({"kind": "query", "input": {"query": "q"}}))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);

    let job = &store.snapshot()[0];
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some(ENQUEUE_FAILED_MESSAGE));
}

// ============================================================================
// Status Tests
// ============================================================================

#[tokio::test]
async fn test_get_job_returns_record() {
    let (app, _, _) = app();

    let (_, created) = send(&app, post_job(json!({"kind": "query", "input": {"query": "hello"}}))).await;
    let id = created["data"]["job_id"].as_str().unwrap().to_string();

    let request = Request::get(format!("/api/v1/jobs/{}", id)).body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], id);
    assert_eq!(body["data"]["kind"], "query");
    assert_eq!(body["data"]["status"], "queued");
    assert_eq!(body["data"]["input"]["query"], "hello");
}

#[tokio::test]
async fn test_get_unknown_job_is_not_found() {
    let (app, _, _) = app();

    let request = Request::get(format!("/api/v1/jobs/{}", uuid::Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "JOB_NOT_FOUND");
}

#[tokio::test]
async fn test_get_job_with_malformed_id_is_rejected() {
    let (app, _, _) = app();

    let request = Request::get("/api/v1/jobs/not-a-uuid").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

// ============================================================================
// Health and Metrics Tests
// ============================================================================

#[tokio::test]
async fn test_health_reports_dependencies() {
    let (app, _, _) = app();

    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"]["healthy"], true);
    assert_eq!(body["checks"]["transport"]["healthy"], true);
    assert_eq!(body["checks"]["queue_depth"], 0);
}

#[tokio::test]
async fn test_health_unavailable_when_transport_down() {
    let service = JobService::new(Arc::new(InMemoryJobStore::new()), Arc::new(BrokenTransport), WINDOW);
    let app = build_router(AppState::new(service));

    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["checks"]["transport"]["healthy"], false);
}

#[tokio::test]
async fn test_metrics_endpoint_is_plain_text() {
    let (app, _, _) = app();

    let request = Request::get("/metrics").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

// ============================================================================
// Query Job Tests
// ============================================================================

fn query_worker(
    endpoint: String,
    store: Arc<InMemoryJobStore>,
    transport: Arc<InMemoryTransport>,
) -> Worker {
    let config = WorkerConfig {
        worker_id: "query-worker".to_string(),
        lease_duration: Duration::from_secs(60),
        poll_timeout: Duration::from_millis(50),
        task_timeout: Duration::from_secs(5),
        retry: RetryPolicy::new(3, BackoffStrategy::fixed(Duration::from_millis(10))),
    };
    Worker::new(
        config,
        LifecycleManager::new(store),
        transport,
        Arc::new(HandlerRegistry::new().with(QueryJob::new(endpoint))),
    )
}

#[tokio::test]
async fn test_query_job_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/answer"))
        .and(body_json(json!({"query": "what is jobline"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "a job queue"})))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryJobStore::new());
    let transport = Arc::new(InMemoryTransport::new());
    let service = JobService::new(store.clone(), transport.clone(), WINDOW);
    let app = build_router(AppState::new(service));

    let (_, created) = send(&app, post_job(json!({"kind": "query", "input": {"query": "  what is jobline "}}))).await;
    let id = created["data"]["job_id"].as_str().unwrap().to_string();

    let handle = query_worker(format!("{}/answer", server.uri()), store.clone(), transport.clone()).start();
    tokio::time::timeout(Duration::from_secs(5), async {
        while handle.stats().completed() < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    handle.shutdown();
    handle.join().await;

    let request = Request::get(format!("/api/v1/jobs/{}", id)).body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["result"]["answer"], "a job queue");
    assert_eq!(body["data"]["retry_count"], 1);
}

#[tokio::test]
async fn test_query_job_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/answer"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryJobStore::new());
    let transport = Arc::new(InMemoryTransport::new());
    let service = JobService::new(store.clone(), transport.clone(), WINDOW);
    let submission = service.enqueue("query", json!({"query": "q"}), None).await.unwrap();

    let worker = query_worker(format!("{}/answer", server.uri()), store.clone(), transport.clone());
    let raw = transport.pop(Duration::from_millis(10)).await.unwrap().unwrap();

    assert_eq!(
        worker.handle_message(&raw).await.unwrap(),
        JobOutcome::Failed(submission.job_id)
    );

    let job = store.get(submission.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 3);
    assert!(job.error.unwrap().contains("503"));
}

#[tokio::test]
async fn test_query_job_client_error_is_retried_like_any_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/answer"))
        .respond_with(ResponseTemplate::new(400))
        .expect(3)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryJobStore::new());
    let transport = Arc::new(InMemoryTransport::new());
    let service = JobService::new(store.clone(), transport.clone(), WINDOW);
    let submission = service.enqueue("query", json!({"query": "q"}), None).await.unwrap();

    let worker = query_worker(format!("{}/answer", server.uri()), store.clone(), transport.clone());
    let raw = transport.pop(Duration::from_millis(10)).await.unwrap().unwrap();

    assert_eq!(
        worker.handle_message(&raw).await.unwrap(),
        JobOutcome::Failed(submission.job_id)
    );

    let job = store.get(submission.job_id).await.unwrap().unwrap();
    assert_eq!(job.retry_count, 3);
    assert!(job.error.unwrap().contains("400"));
}

#[tokio::test]
async fn test_query_job_blank_query_fails_without_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryJobStore::new());
    let transport = Arc::new(InMemoryTransport::new());
    let service = JobService::new(store.clone(), transport.clone(), WINDOW);
    let submission = service.enqueue("query", json!({"query": "   "}), None).await.unwrap();

    let worker = query_worker(format!("{}/answer", server.uri()), store.clone(), transport.clone());
    let raw = transport.pop(Duration::from_millis(10)).await.unwrap().unwrap();

    worker.handle_message(&raw).await.unwrap();

    let job = store.get(submission.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("invalid job input: query must not be empty"));
}
