//! Job lifecycle manager.
//!
//! ```text
//! queued ──claim──▶ processing ──complete──▶ completed
//!    ▲                  │   └──────fail─────▶ failed
//!    └──reclaim sweep───┘
//! ```
//!
//! Each transition is one conditional statement in the store. Terminal states
//! are never left by any automatic transition.

use std::sync::Arc;
use std::time::Duration;

use super::job::{Job, JobId};
use super::store::JobStore;
use crate::error::{JoblineError, Result};
use crate::telemetry::metrics;

/// State transitions over a [`JobStore`].
#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn JobStore>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Take the lease on a queued job or one whose lease has expired.
    ///
    /// `None` means another worker owns it or it already finished.
    #[tracing::instrument(skip_all, fields(job_id = %id, worker_id = %worker_id))]
    pub async fn claim(&self, id: JobId, worker_id: &str, lease: Duration) -> Result<Option<Job>> {
        let claimed = self.store.claim(id, worker_id, lease).await?;
        match &claimed {
            Some(job) => {
                metrics::record_claimed();
                tracing::info!(kind = %job.kind, lease_secs = lease.as_secs(), "Job claimed");
            }
            None => {
                metrics::record_claim_conflict();
                tracing::debug!("Job not claimable");
            }
        }
        Ok(claimed)
    }

    /// Renew the lease. Fails with `LEASE_NOT_OWNED` once the job was
    /// reclaimed or finished out from under the caller.
    pub async fn extend_lease(&self, id: JobId, worker_id: &str, extra: Duration) -> Result<()> {
        if self.store.extend_lease(id, worker_id, extra).await? {
            metrics::record_lease_extension("extended");
            tracing::debug!(job_id = %id, worker_id = %worker_id, extra_secs = extra.as_secs(), "Lease extended");
            Ok(())
        } else {
            metrics::record_lease_extension("not_owner");
            Err(JoblineError::lease_not_owned(id, worker_id))
        }
    }

    /// Store the attempt number on the job. Owner-guarded like [`Self::extend_lease`].
    pub async fn record_attempt(&self, id: JobId, worker_id: &str, attempt: u32) -> Result<()> {
        if self.store.record_attempt(id, worker_id, attempt).await? {
            Ok(())
        } else {
            Err(JoblineError::lease_not_owned(id, worker_id))
        }
    }

    /// Terminal success. Repeating it overwrites the result.
    pub async fn complete(&self, id: JobId, result: serde_json::Value) -> Result<()> {
        if !self.store.set_result(id, result).await? {
            return Err(JoblineError::job_not_found(id));
        }
        metrics::record_completed();
        tracing::info!(job_id = %id, "Job completed");
        Ok(())
    }

    /// Terminal failure.
    pub async fn fail(&self, id: JobId, message: &str) -> Result<()> {
        if !self.store.set_error(id, message).await? {
            return Err(JoblineError::job_not_found(id));
        }
        metrics::record_failed("task_error");
        tracing::warn!(job_id = %id, error = %message, "Job failed");
        Ok(())
    }

    /// Terminal success written by the lease holder. Fails with
    /// `LEASE_NOT_OWNED` and leaves the row untouched once the lease moved on.
    pub async fn complete_owned(&self, id: JobId, worker_id: &str, result: serde_json::Value) -> Result<()> {
        if !self.store.set_result_if_owner(id, worker_id, result).await? {
            return Err(JoblineError::lease_not_owned(id, worker_id));
        }
        metrics::record_completed();
        tracing::info!(job_id = %id, worker_id = %worker_id, "Job completed");
        Ok(())
    }

    /// Terminal failure written by the lease holder.
    pub async fn fail_owned(&self, id: JobId, worker_id: &str, message: &str, reason: &'static str) -> Result<()> {
        if !self.store.set_error_if_owner(id, worker_id, message).await? {
            return Err(JoblineError::lease_not_owned(id, worker_id));
        }
        metrics::record_failed(reason);
        tracing::warn!(job_id = %id, worker_id = %worker_id, reason = reason, error = %message, "Job failed");
        Ok(())
    }

    /// Return every job with an expired lease to `queued`.
    pub async fn reclaim_sweep(&self) -> Result<Vec<Job>> {
        let reclaimed = self.store.reclaim_expired().await?;
        if !reclaimed.is_empty() {
            metrics::record_reclaimed(reclaimed.len() as u64);
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::jobs::clock::ManualClock;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::{JobStatus, NewJob};
    use serde_json::json;

    fn manager() -> (LifecycleManager, ManualClock) {
        let clock = ManualClock::default();
        let store = Arc::new(InMemoryJobStore::with_clock(Arc::new(clock.clone())));
        (LifecycleManager::new(store), clock)
    }

    #[tokio::test]
    async fn test_extend_after_reclaim_is_not_owner() {
        let (lifecycle, clock) = manager();
        let job = lifecycle
            .store()
            .create(NewJob::new("k", json!({}), "client:1"))
            .await
            .unwrap();

        lifecycle.claim(job.id, "w1", Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(11));
        assert_eq!(lifecycle.reclaim_sweep().await.unwrap().len(), 1);

        let err = lifecycle
            .extend_lease(job.id, "w1", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::LeaseNotOwned);
    }

    #[tokio::test]
    async fn test_complete_twice_is_stable() {
        let (lifecycle, _) = manager();
        let job = lifecycle
            .store()
            .create(NewJob::new("k", json!({}), "client:1"))
            .await
            .unwrap();

        lifecycle.complete(job.id, json!({"answer": 42})).await.unwrap();
        let first = lifecycle.store().get(job.id).await.unwrap().unwrap();
        lifecycle.complete(job.id, json!({"answer": 42})).await.unwrap();
        let second = lifecycle.store().get(job.id).await.unwrap().unwrap();

        assert_eq!(first.status, JobStatus::Completed);
        assert_eq!(first.status, second.status);
        assert_eq!(first.result, second.result);
        assert!(second.error.is_none());
    }

    #[tokio::test]
    async fn test_complete_unknown_job_is_not_found() {
        let (lifecycle, _) = manager();
        let err = lifecycle.complete(JobId::new(), json!(null)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobNotFound);
    }

    #[tokio::test]
    async fn test_owned_complete_after_takeover_is_not_owner() {
        let (lifecycle, clock) = manager();
        let job = lifecycle
            .store()
            .create(NewJob::new("k", json!({}), "client:1"))
            .await
            .unwrap();

        lifecycle.claim(job.id, "w1", Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(11));
        lifecycle.claim(job.id, "w2", Duration::from_secs(10)).await.unwrap();
        lifecycle.complete_owned(job.id, "w2", json!("first")).await.unwrap();

        let err = lifecycle.fail_owned(job.id, "w1", "late", "retries_exhausted").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::LeaseNotOwned);
        let err = lifecycle.complete_owned(job.id, "w1", json!("late")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::LeaseNotOwned);

        let stored = lifecycle.store().get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.result, Some(json!("first")));
    }
}
