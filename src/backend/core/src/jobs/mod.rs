//! Reliable job queue core.
//!
//! - **Store**: authoritative job records and atomic conditional updates
//! - **Transport**: at-least-once "a job exists" notifications
//! - **Dedup**: fingerprinting and the recent-duplicate check
//! - **Lifecycle**: claim, extend, complete, fail, reclaim
//! - **Worker**: claims notified jobs and runs them with bounded retries
//! - **Reclaimer**: periodic sweep of expired leases
//!
//! # Architecture
//!
//! ```text
//! submit ──▶ JobService ──▶ IdempotencyGuard ──▶ JobStore (queued)
//!                 │
//!                 └──▶ Transport ──▶ Worker ──claim──▶ LifecycleManager ──▶ JobStore
//!                          ▲                                   ▲
//!                          └──────── Reclaimer ─── sweep ──────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobline_core::jobs::{
//!     HandlerRegistry, InMemoryJobStore, InMemoryTransport, JobService,
//!     LifecycleManager, QueryJob, Worker, WorkerConfig,
//! };
//!
//! let store = Arc::new(InMemoryJobStore::new());
//! let transport = Arc::new(InMemoryTransport::new());
//! let service = JobService::new(store.clone(), transport.clone(), Duration::from_secs(300));
//!
//! let registry = HandlerRegistry::new().with(QueryJob::new("http://localhost:9000/answer"));
//! let worker = Worker::new(
//!     WorkerConfig::default(),
//!     LifecycleManager::new(store),
//!     transport,
//!     Arc::new(registry),
//! );
//! let handle = worker.start();
//!
//! service.enqueue("query", json!({"query": "hello"}), None).await?;
//! ```

pub mod clock;
pub mod dedup;
pub mod job;
pub mod lifecycle;
pub mod reclaimer;
pub mod registry;
pub mod retry;
pub mod service;
pub mod store;
pub mod transport;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dedup::{fingerprint, Admission, IdempotencyGuard};
pub use job::{BackoffStrategy, Job, JobError, JobId, JobStatus, NewJob};
pub use lifecycle::LifecycleManager;
pub use reclaimer::{Reclaimer, ReclaimerHandle};
pub use registry::{ErasedHandler, HandlerRegistry, JobHandler, PreparedJob};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use service::{
    ComponentHealth, HealthReport, JobService, Submission, SubmissionStatus, ENQUEUE_FAILED_MESSAGE,
};
pub use store::{InMemoryJobStore, JobStore};
pub use transport::{Envelope, InMemoryTransport, RedisTransport, Transport};
pub use worker::{generate_worker_id, JobOutcome, Worker, WorkerConfig, WorkerHandle, WorkerStats};

// Built-in jobs
mod builtin;
pub use builtin::{QueryInput, QueryJob};
