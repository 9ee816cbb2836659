//! Durable job store seam.
//!
//! Every mutating primitive is a single conditional update so concurrent
//! callers are arbitrated by the store, never by a read-then-write in the
//! caller. `Database` implements this trait over Postgres (see `db::jobs`);
//! [`InMemoryJobStore`] mirrors the same row semantics under a mutex.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::clock::{Clock, SystemClock};
use super::job::{Job, JobId, JobStatus, NewJob};
use crate::error::Result;

/// Trait for job store backends.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job with `status = queued` and `retry_count = 0`.
    async fn create(&self, job: NewJob) -> Result<Job>;

    /// Fetch a job by id.
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Current status of a job.
    async fn status(&self, id: JobId) -> Result<Option<JobStatus>>;

    /// Transition to `completed` and clear the lease. Returns false if the job does not exist.
    async fn set_result(&self, id: JobId, result: serde_json::Value) -> Result<bool>;

    /// Transition to `failed` and clear the lease. Returns false if the job does not exist.
    async fn set_error(&self, id: JobId, message: &str) -> Result<bool>;

    /// [`Self::set_result`] applied only while `owner` holds the processing lease.
    async fn set_result_if_owner(&self, id: JobId, owner: &str, result: serde_json::Value) -> Result<bool>;

    /// [`Self::set_error`] applied only while `owner` holds the processing lease.
    async fn set_error_if_owner(&self, id: JobId, owner: &str, message: &str) -> Result<bool>;

    /// Take the processing lease if the job is queued or its lease has expired.
    ///
    /// Returns the updated record when this caller won the lease.
    async fn claim(&self, id: JobId, owner: &str, lease: Duration) -> Result<Option<Job>>;

    /// Push the lease expiry to `now + extra` if `owner` still holds it.
    async fn extend_lease(&self, id: JobId, owner: &str, extra: Duration) -> Result<bool>;

    /// Record the attempt number on the job if `owner` still holds the lease.
    async fn record_attempt(&self, id: JobId, owner: &str, attempt: u32) -> Result<bool>;

    /// Return every expired lease to `queued`, yielding the reclaimed records.
    async fn reclaim_expired(&self) -> Result<Vec<Job>>;

    /// Most recent job with `dedup_key` created inside `window` whose status
    /// still suppresses resubmission.
    async fn find_recent_by_dedup_key(&self, dedup_key: &str, window: Duration) -> Result<Option<JobId>>;

    /// Connectivity probe.
    async fn ping(&self) -> Result<()>;
}

fn offset(now: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::max_value());
    now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn clear_lease(job: &mut Job) {
    job.lease_owner = None;
    job.lease_expires_at = None;
}

fn held_by(job: &Job, owner: &str) -> bool {
    job.status == JobStatus::Processing && job.lease_owner.as_deref() == Some(owner)
}

fn finish_ok(job: &mut Job, result: serde_json::Value, now: DateTime<Utc>) {
    job.status = JobStatus::Completed;
    job.result = Some(result);
    job.error = None;
    clear_lease(job);
    job.updated_at = now;
}

fn finish_err(job: &mut Job, message: &str, now: DateTime<Utc>) {
    job.status = JobStatus::Failed;
    job.error = Some(message.to_string());
    job.result = None;
    clear_lease(job);
    job.updated_at = now;
}

/// In-memory job store for testing and development.
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Snapshot of every stored job, oldest first.
    pub fn snapshot(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.lock().values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, new: NewJob) -> Result<Job> {
        let now = self.clock.now();
        let job = Job {
            id: JobId::new(),
            kind: new.kind,
            input: new.input,
            status: JobStatus::Queued,
            result: None,
            error: None,
            retry_count: 0,
            dedup_key: new.dedup_key,
            lease_owner: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.lock().insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.lock().get(&id).cloned())
    }

    async fn status(&self, id: JobId) -> Result<Option<JobStatus>> {
        Ok(self.jobs.lock().get(&id).map(|job| job.status))
    }

    async fn set_result(&self, id: JobId, result: serde_json::Value) -> Result<bool> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        finish_ok(job, result, now);
        Ok(true)
    }

    async fn set_error(&self, id: JobId, message: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        finish_err(job, message, now);
        Ok(true)
    }

    async fn set_result_if_owner(&self, id: JobId, owner: &str, result: serde_json::Value) -> Result<bool> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(&id) {
            Some(job) if held_by(job, owner) => {
                finish_ok(job, result, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_error_if_owner(&self, id: JobId, owner: &str, message: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(&id) {
            Some(job) if held_by(job, owner) => {
                finish_err(job, message, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim(&self, id: JobId, owner: &str, lease: Duration) -> Result<Option<Job>> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Queued && !job.lease_expired(now) {
            return Ok(None);
        }
        job.status = JobStatus::Processing;
        job.lease_owner = Some(owner.to_string());
        job.lease_expires_at = Some(offset(now, lease));
        job.retry_count = 0;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn extend_lease(&self, id: JobId, owner: &str, extra: Duration) -> Result<bool> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(&id) {
            Some(job) if held_by(job, owner) => {
                job.lease_expires_at = Some(offset(now, extra));
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_attempt(&self, id: JobId, owner: &str, attempt: u32) -> Result<bool> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(&id) {
            Some(job) if held_by(job, owner) => {
                job.retry_count = attempt.min(i32::MAX as u32) as i32;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reclaim_expired(&self) -> Result<Vec<Job>> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock();
        let reclaimed = jobs
            .values_mut()
            .filter(|job| job.lease_expired(now))
            .map(|job| {
                job.status = JobStatus::Queued;
                clear_lease(job);
                job.updated_at = now;
                job.clone()
            })
            .collect();
        Ok(reclaimed)
    }

    async fn find_recent_by_dedup_key(&self, dedup_key: &str, window: Duration) -> Result<Option<JobId>> {
        let now = self.clock.now();
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::max_value());
        let since = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let jobs = self.jobs.lock();
        Ok(jobs
            .values()
            .filter(|job| {
                job.dedup_key == dedup_key
                    && job.created_at > since
                    && job.status.blocks_resubmission()
            })
            .max_by_key(|job| job.created_at)
            .map(|job| job.id))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::clock::ManualClock;
    use serde_json::json;

    fn store_with_clock() -> (InMemoryJobStore, ManualClock) {
        let clock = ManualClock::default();
        (InMemoryJobStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_create_starts_queued() {
        let store = InMemoryJobStore::new();
        let job = store
            .create(NewJob::new("query", json!({"query": "hi"}), "content:abc"))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, 0);
        assert!(job.lease_owner.is_none());
        assert_eq!(store.status(job.id).await.unwrap(), Some(JobStatus::Queued));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_expiry() {
        let (store, clock) = store_with_clock();
        let job = store.create(NewJob::new("k", json!({}), "client:1")).await.unwrap();

        let lease = Duration::from_secs(60);
        assert!(store.claim(job.id, "w1", lease).await.unwrap().is_some());
        assert!(store.claim(job.id, "w2", lease).await.unwrap().is_none());

        clock.advance(Duration::from_secs(61));
        let taken = store.claim(job.id, "w2", lease).await.unwrap().unwrap();
        assert_eq!(taken.lease_owner.as_deref(), Some("w2"));
    }

    #[tokio::test]
    async fn test_claim_refuses_terminal_jobs() {
        let store = InMemoryJobStore::new();
        let job = store.create(NewJob::new("k", json!({}), "client:1")).await.unwrap();
        store.set_result(job.id, json!("done")).await.unwrap();

        assert!(store.claim(job.id, "w1", Duration::from_secs(60)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extend_lease_requires_owner() {
        let (store, clock) = store_with_clock();
        let job = store.create(NewJob::new("k", json!({}), "client:1")).await.unwrap();
        store.claim(job.id, "w1", Duration::from_secs(10)).await.unwrap();

        assert!(!store.extend_lease(job.id, "w2", Duration::from_secs(60)).await.unwrap());
        clock.advance(Duration::from_secs(5));
        assert!(store.extend_lease(job.id, "w1", Duration::from_secs(60)).await.unwrap());

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(
            stored.lease_expires_at,
            Some(clock.now() + chrono::Duration::seconds(60))
        );
    }

    #[tokio::test]
    async fn test_terminal_transitions_clear_lease() {
        let store = InMemoryJobStore::new();
        let job = store.create(NewJob::new("k", json!({}), "client:1")).await.unwrap();
        store.claim(job.id, "w1", Duration::from_secs(10)).await.unwrap();
        store.set_error(job.id, "boom").await.unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
        assert!(stored.result.is_none());
        assert!(stored.lease_owner.is_none());
        assert!(stored.lease_expires_at.is_none());
    }

    #[tokio::test]
    async fn test_reclaim_only_touches_expired_leases() {
        let (store, clock) = store_with_clock();
        let short = store.create(NewJob::new("k", json!(1), "client:1")).await.unwrap();
        let long = store.create(NewJob::new("k", json!(2), "client:2")).await.unwrap();
        store.claim(short.id, "w1", Duration::from_secs(10)).await.unwrap();
        store.claim(long.id, "w2", Duration::from_secs(600)).await.unwrap();

        clock.advance(Duration::from_secs(11));
        let reclaimed = store.reclaim_expired().await.unwrap();

        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, short.id);
        assert_eq!(store.status(short.id).await.unwrap(), Some(JobStatus::Queued));
        assert_eq!(store.status(long.id).await.unwrap(), Some(JobStatus::Processing));
    }

    #[tokio::test]
    async fn test_dedup_lookup_skips_failed_and_stale() {
        let (store, clock) = store_with_clock();
        let window = Duration::from_secs(300);
        let failed = store.create(NewJob::new("k", json!({}), "content:x")).await.unwrap();
        store.set_error(failed.id, "nope").await.unwrap();
        assert_eq!(store.find_recent_by_dedup_key("content:x", window).await.unwrap(), None);

        let live = store.create(NewJob::new("k", json!({}), "content:x")).await.unwrap();
        assert_eq!(
            store.find_recent_by_dedup_key("content:x", window).await.unwrap(),
            Some(live.id)
        );

        clock.advance(Duration::from_secs(301));
        assert_eq!(store.find_recent_by_dedup_key("content:x", window).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_record_attempt_requires_owner() {
        let store = InMemoryJobStore::new();
        let job = store.create(NewJob::new("k", json!({}), "client:1")).await.unwrap();
        store.claim(job.id, "w1", Duration::from_secs(10)).await.unwrap();

        assert!(store.record_attempt(job.id, "w1", 2).await.unwrap());
        assert!(!store.record_attempt(job.id, "w2", 3).await.unwrap());
        assert_eq!(store.get(job.id).await.unwrap().unwrap().retry_count, 2);
    }

    #[tokio::test]
    async fn test_owned_terminal_writes_refuse_former_owner() {
        let (store, clock) = store_with_clock();
        let job = store.create(NewJob::new("k", json!({}), "client:1")).await.unwrap();
        store.claim(job.id, "w1", Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(11));
        store.claim(job.id, "w2", Duration::from_secs(10)).await.unwrap();

        assert!(!store.set_result_if_owner(job.id, "w1", json!("late")).await.unwrap());
        assert!(store.set_result_if_owner(job.id, "w2", json!("done")).await.unwrap());
        assert!(!store.set_error_if_owner(job.id, "w2", "again").await.unwrap());

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.result, Some(json!("done")));
        assert!(stored.lease_owner.is_none());
    }
}
