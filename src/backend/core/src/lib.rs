#![allow(clippy::result_large_err)]
//! # Jobline Core
//!
//! Reliable job queue: Postgres holds the authoritative job records, Redis
//! carries "a job exists" notifications, and workers claim jobs under a
//! time-bounded lease.
//!
//! ## Architecture
//!
//! - **Jobs**: store, transport, dedup, lifecycle, worker and reclaimer
//! - **Database**: Postgres job store backed by sqlx
//! - **API**: axum HTTP surface for submission, status and health
//! - **Telemetry**: structured logging, optional OTLP tracing, Prometheus metrics
//! - **Config**: layered configuration from environment and files

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod signal;
pub mod telemetry;

pub use error::{ErrorCode, ErrorDetails, ErrorSeverity, JoblineError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::db::Database;
    pub use crate::error::{ErrorCode, ErrorDetails, ErrorSeverity, JoblineError, Result};
    pub use crate::jobs::{
        BackoffStrategy, HandlerRegistry, Job, JobError, JobHandler, JobId, JobService, JobStatus,
        JobStore, LifecycleManager, Reclaimer, RetryPolicy, Transport, Worker, WorkerConfig,
    };
}
