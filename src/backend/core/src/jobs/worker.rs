//! Worker loop: pop a notification, claim the job, run it with retries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::Instrument;

use super::job::{Job, JobError, JobId};
use super::lifecycle::LifecycleManager;
use super::registry::HandlerRegistry;
use super::retry::{RetryDecision, RetryPolicy};
use super::transport::{Envelope, Transport};
use crate::config::{QueueConfig, WorkerSettings};
use crate::error::{ErrorCode, JoblineError, Result};
use crate::telemetry::metrics;

/// Pause after a transport error before polling again.
const TRANSPORT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Configuration for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Lease owner identity
    pub worker_id: String,
    /// Visibility timeout taken on claim and on each renewal
    pub lease_duration: Duration,
    /// How long one transport pop waits
    pub poll_timeout: Duration,
    /// Attempt deadline when the handler sets none
    pub task_timeout: Duration,
    /// Attempts and backoff
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_settings(&WorkerSettings::default(), &QueueConfig::default())
    }
}

impl WorkerConfig {
    pub fn from_settings(worker: &WorkerSettings, queue: &QueueConfig) -> Self {
        Self {
            worker_id: worker.worker_id.clone().unwrap_or_else(generate_worker_id),
            lease_duration: worker.lease_duration,
            poll_timeout: queue.poll_timeout,
            task_timeout: worker.task_timeout,
            retry: RetryPolicy::new(worker.max_retries, worker.backoff.clone()),
        }
    }
}

/// Short random token used as the lease owner.
pub fn generate_worker_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// How a single notification was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(JobId),
    Failed(JobId),
    /// Lease lost or shutdown requested mid-job; the job is left for the reclaimer.
    Abandoned(JobId),
    /// Another worker holds the job, or it is already terminal.
    Skipped(JobId),
    /// The notification could not be decoded and was dropped.
    Malformed,
}

/// Statistics for the job worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Notifications handled
    pub processed: Arc<AtomicU64>,
    pub completed: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
    pub abandoned: Arc<AtomicU64>,
    pub skipped: Arc<AtomicU64>,
    pub malformed: Arc<AtomicU64>,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, outcome: &JobOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            JobOutcome::Completed(_) => &self.completed,
            JobOutcome::Failed(_) => &self.failed,
            JobOutcome::Abandoned(_) => &self.abandoned,
            JobOutcome::Skipped(_) => &self.skipped,
            JobOutcome::Malformed => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown: Arc<watch::Sender<bool>>,
    stats: WorkerStats,
    join: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Get worker statistics.
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Wait for the loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }
}

/// A single sequential worker.
pub struct Worker {
    config: WorkerConfig,
    lifecycle: LifecycleManager,
    transport: Arc<dyn Transport>,
    registry: Arc<HandlerRegistry>,
    stats: WorkerStats,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        lifecycle: LifecycleManager,
        transport: Arc<dyn Transport>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            lifecycle,
            transport,
            registry,
            stats: WorkerStats::new(),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Ask the loop (and any backoff sleep) to stop.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Start the worker, returning a handle for control.
    pub fn start(self) -> WorkerHandle {
        let shutdown = self.shutdown.clone();
        let stats = self.stats.clone();
        let join = tokio::spawn(async move { self.run().await });

        WorkerHandle {
            shutdown,
            stats,
            join,
        }
    }

    /// Poll until shutdown. A pop in flight is allowed to finish so a message
    /// already removed from the queue is never dropped.
    pub async fn run(&self) {
        tracing::info!(
            worker_id = %self.config.worker_id,
            lease_secs = self.config.lease_duration.as_secs(),
            max_attempts = self.config.retry.max_attempts,
            kinds = ?self.registry.kinds(),
            "Worker started"
        );

        while !self.shutdown_requested() {
            match self.transport.pop(self.config.poll_timeout).await {
                Ok(Some(raw)) => {
                    if let Err(e) = self.handle_message(&raw).await {
                        e.log();
                        tracing::error!(worker_id = %self.config.worker_id, error = %e, "Job handling failed");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(worker_id = %self.config.worker_id, error = %e, "Transport poll failed");
                    if self.sleep_or_shutdown(TRANSPORT_ERROR_BACKOFF).await {
                        break;
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.config.worker_id, "Worker stopped");
    }

    /// Handle one raw notification end to end.
    pub async fn handle_message(&self, raw: &str) -> Result<JobOutcome> {
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics::record_malformed();
                tracing::warn!(
                    worker_id = %self.config.worker_id,
                    error = %e,
                    raw_len = raw.len(),
                    "Dropping malformed job notification"
                );
                let outcome = JobOutcome::Malformed;
                self.stats.record(&outcome);
                return Ok(outcome);
            }
        };

        let span = tracing::info_span!(
            "job",
            job_id = %envelope.id,
            worker_id = %self.config.worker_id,
            kind = %envelope.kind
        );
        let outcome = self.process(envelope.id).instrument(span).await?;
        self.stats.record(&outcome);
        Ok(outcome)
    }

    async fn process(&self, id: JobId) -> Result<JobOutcome> {
        let worker_id = self.config.worker_id.as_str();
        let Some(job) = self
            .lifecycle
            .claim(id, worker_id, self.config.lease_duration)
            .await?
        else {
            return Ok(JobOutcome::Skipped(id));
        };

        let Some(handler) = self.registry.get(&job.kind) else {
            let error = JoblineError::unknown_job_kind(job.kind.as_str());
            return self.fail(id, error.user_message(), "unknown_kind").await;
        };

        let prepared = match handler.prepare(&job.input) {
            Ok(prepared) => prepared,
            Err(reason) => {
                let error = JoblineError::invalid_job_input(reason);
                return self.fail(id, error.user_message(), "invalid_input").await;
            }
        };

        let limit = prepared.timeout().unwrap_or(self.config.task_timeout);
        let mut retry = self.config.retry.start();

        loop {
            let attempt = retry.start_attempt();
            if !self.renew_ownership(&job, attempt).await {
                return Ok(JobOutcome::Abandoned(id));
            }

            metrics::record_attempt(&job.kind);
            tracing::info!(attempt, max_attempts = retry.max_attempts(), "Running job attempt");

            let started = Instant::now();
            let result = match tokio::time::timeout(limit, prepared.run()).await {
                Ok(result) => result,
                Err(_) => Err(JobError::timed_out(limit)),
            };
            metrics::record_task_duration(&job.kind, started.elapsed().as_secs_f64());

            let error = match result {
                Ok(output) => {
                    let written = self.lifecycle.complete_owned(id, worker_id, output).await;
                    return Self::settle(id, written, JobOutcome::Completed(id));
                }
                Err(error) => error,
            };

            tracing::warn!(attempt, code = ?error.code, error = %error, "Job attempt failed");

            match retry.record_failure(error) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                    if self.sleep_or_shutdown(delay).await {
                        tracing::info!(attempt, "Shutdown during backoff, leaving job for reclaim");
                        return Ok(JobOutcome::Abandoned(id));
                    }
                }
                RetryDecision::Exhausted(last) => {
                    return self.fail(id, &last.message, "retries_exhausted").await;
                }
            }
        }
    }

    /// Terminal failure written only while this worker still holds the lease.
    async fn fail(&self, id: JobId, message: &str, reason: &'static str) -> Result<JobOutcome> {
        let written = self
            .lifecycle
            .fail_owned(id, &self.config.worker_id, message, reason)
            .await;
        Self::settle(id, written, JobOutcome::Failed(id))
    }

    /// A terminal write refused for lack of ownership means another worker
    /// took the job over; its outcome stands and this one is abandoned.
    fn settle(id: JobId, written: Result<()>, outcome: JobOutcome) -> Result<JobOutcome> {
        match written {
            Ok(()) => Ok(outcome),
            Err(e) if e.code() == ErrorCode::LeaseNotOwned => {
                tracing::warn!("Lease lost before the final write, abandoning job");
                Ok(JobOutcome::Abandoned(id))
            }
            Err(e) => Err(e),
        }
    }

    /// Renew the lease before a retry and record the attempt number.
    ///
    /// Returns false when the lease is gone and the job must be abandoned.
    /// Other store errors are logged and the attempt proceeds.
    async fn renew_ownership(&self, job: &Job, attempt: u32) -> bool {
        let worker_id = self.config.worker_id.as_str();

        if attempt > 1 {
            match self
                .lifecycle
                .extend_lease(job.id, worker_id, self.config.lease_duration)
                .await
            {
                Ok(()) => {}
                Err(e) if e.code() == ErrorCode::LeaseNotOwned => {
                    tracing::warn!(attempt, "Lease lost, abandoning job");
                    return false;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Lease extension failed, continuing");
                }
            }
        }

        match self.lifecycle.record_attempt(job.id, worker_id, attempt).await {
            Ok(()) => true,
            Err(e) if e.code() == ErrorCode::LeaseNotOwned => {
                tracing::warn!(attempt, "Lease lost, abandoning job");
                false
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Failed to record attempt, continuing");
                true
            }
        }
    }

    /// Sleep for `delay`; true if shutdown was requested first.
    async fn sleep_or_shutdown(&self, delay: Duration) -> bool {
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = shutdown.wait_for(|stop| *stop) => true,
        }
    }
}
