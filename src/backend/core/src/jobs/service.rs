//! Submission and status operations used by the HTTP layer.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::dedup::{Admission, IdempotencyGuard};
use super::job::{Job, JobId, NewJob};
use super::store::JobStore;
use super::transport::{Envelope, Transport};
use crate::error::{JoblineError, Result};
use crate::telemetry::metrics;

/// Error message stored on a job whose notification could not be published.
pub const ENQUEUE_FAILED_MESSAGE: &str = "failed to enqueue job notification";

/// Whether a submission created a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Queued,
    ExistingJobFound,
}

/// Result of [`JobService::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub job_id: JobId,
    pub status: SubmissionStatus,
}

impl Submission {
    pub fn is_new(&self) -> bool {
        self.status == SubmissionStatus::Queued
    }
}

/// Health of one dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn from_result<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self {
                healthy: true,
                error: None,
            },
            Err(e) => Self {
                healthy: false,
                error: Some(e.user_message().to_string()),
            },
        }
    }
}

/// Dependency probes for the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub database: ComponentHealth,
    pub transport: ComponentHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<usize>,
}

/// Entry point for submitters.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    transport: Arc<dyn Transport>,
    guard: IdempotencyGuard,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, transport: Arc<dyn Transport>, dedup_window: Duration) -> Self {
        Self {
            guard: IdempotencyGuard::new(store.clone(), dedup_window),
            store,
            transport,
        }
    }

    /// Submit a job, or return the recent identical one.
    pub async fn enqueue(
        &self,
        kind: &str,
        input: serde_json::Value,
        idempotency_key: Option<&str>,
    ) -> Result<Submission> {
        let kind = kind.trim();
        if kind.is_empty() {
            return Err(JoblineError::validation("Job kind must not be empty"));
        }

        let dedup_key = match self.guard.admit(kind, &input, idempotency_key).await? {
            Admission::Existing(job_id) => {
                metrics::record_submitted("existing");
                return Ok(Submission {
                    job_id,
                    status: SubmissionStatus::ExistingJobFound,
                });
            }
            Admission::Admitted(key) => key,
        };

        let job = self.store.create(NewJob::new(kind, input, dedup_key)).await?;

        if let Err(e) = self.transport.push(&Envelope::for_job(&job)).await {
            metrics::record_submitted("enqueue_failed");
            tracing::error!(job_id = %job.id, error = %e, "Failed to publish job notification");
            // Mark the row failed so dedup does not hide it from a client retry
            if let Err(cleanup) = self.store.set_error(job.id, ENQUEUE_FAILED_MESSAGE).await {
                tracing::error!(job_id = %job.id, error = %cleanup, "Failed to mark unpublished job as failed");
            }
            return Err(e);
        }

        metrics::record_submitted("queued");
        tracing::info!(job_id = %job.id, kind = %job.kind, "Job queued");
        Ok(Submission {
            job_id: job.id,
            status: SubmissionStatus::Queued,
        })
    }

    /// Current record for a job.
    pub async fn get_status(&self, id: JobId) -> Result<Job> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| JoblineError::job_not_found(id))
    }

    /// Probe the store and the transport.
    pub async fn health(&self) -> HealthReport {
        let database = self.store.ping().await;
        let depth = self.transport.len().await;

        let database = ComponentHealth::from_result(&database);
        let transport = ComponentHealth::from_result(&depth);
        HealthReport {
            healthy: database.healthy && transport.healthy,
            database,
            transport,
            queue_depth: depth.ok(),
        }
    }
}
