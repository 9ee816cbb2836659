//! Job records and the vocabulary shared by the queue core.
//!
//! - **Job**: the durable record as stored and returned to clients
//! - **JobStatus**: the four lifecycle states
//! - **JobError**: failure reported by a task handler
//! - **BackoffStrategy**: delay between attempts of the same job

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ErrorCode, JoblineError};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker to claim it
    Queued,
    /// Leased by a worker
    Processing,
    /// Finished with a result
    Completed,
    /// Finished with an error
    Failed,
}

impl JobStatus {
    /// Terminal states are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Statuses that suppress a duplicate submission inside the dedup window.
    pub fn blocks_resubmission(&self) -> bool {
        !matches!(self, Self::Failed)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JoblineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(JoblineError::with_internal(
                ErrorCode::DeserializationError,
                "Stored job has an unknown status",
                format!("unknown job status '{}'", other),
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Record
// ═══════════════════════════════════════════════════════════════════════════════

/// A durable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: String,
    pub input: serde_json::Value,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Attempts made by the current or most recent owner
    pub retry_count: i32,
    pub dedup_key: String,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether `worker_id` holds an unexpired lease at `now`.
    pub fn is_leased_by(&self, worker_id: &str, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing
            && self.lease_owner.as_deref() == Some(worker_id)
            && self.lease_expires_at.map_or(false, |at| at > now)
    }

    /// Lease past its expiry while still processing.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing && self.lease_expires_at.map_or(false, |at| at < now)
    }
}

/// Fields supplied when a job is created.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: String,
    pub input: serde_json::Value,
    pub dedup_key: String,
}

impl NewJob {
    pub fn new(kind: impl Into<String>, input: serde_json::Value, dedup_key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            input,
            dedup_key: dedup_key.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure of a single attempt. Every attempt failure is retried until the
/// worker's attempt budget runs out; the last message is stored on the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    /// Error message
    pub message: String,
    /// Optional error code
    pub code: Option<String>,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Attempt exceeded its deadline.
    pub fn timed_out(limit: Duration) -> Self {
        Self::new(format!("task timed out after {:?}", limit))
            .with_code(ErrorCode::TaskTimeout.to_string())
    }

    /// Add an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for JobError {}

impl From<JoblineError> for JobError {
    fn from(error: JoblineError) -> Self {
        let message = match error.internal_message() {
            Some(internal) => format!("{}: {}", error.user_message(), internal),
            None => error.user_message().to_string(),
        };
        Self {
            message,
            code: Some(error.code().to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff Strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// Linear increase in delay (initial + increment * attempt)
    Linear {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        increment: Duration,
    },
    /// Exponential increase in delay (initial * multiplier^attempt), capped
    Exponential {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Calculate the delay for a given retry number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Linear { initial, increment } => *initial + increment.saturating_mul(attempt),
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exponent = attempt.min(i32::MAX as u32) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        }
    }

    /// Create a fixed backoff strategy.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// Create an exponential backoff strategy with sensible defaults.
    pub fn exponential() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_round_trips_through_str() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("dead".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_failed_does_not_block_resubmission() {
        assert!(JobStatus::Queued.blocks_resubmission());
        assert!(JobStatus::Processing.blocks_resubmission());
        assert!(JobStatus::Completed.blocks_resubmission());
        assert!(!JobStatus::Failed.blocks_resubmission());
    }

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let backoff = BackoffStrategy::default();
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(60));
        assert_eq!(backoff.delay_for_attempt(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_linear_backoff() {
        let backoff = BackoffStrategy::Linear {
            initial: Duration::from_secs(1),
            increment: Duration::from_secs(2),
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(7));
    }

    #[test]
    fn test_backoff_deserializes_humantime() {
        let backoff: BackoffStrategy =
            serde_json::from_str(r#"{"strategy":"fixed","delay":"250ms"}"#).unwrap();
        assert_eq!(backoff, BackoffStrategy::fixed(Duration::from_millis(250)));
    }

    #[test]
    fn test_job_error_from_jobline_error() {
        let err: JobError = JoblineError::invalid_job_input("missing field `query`").into();
        assert_eq!(err.code.as_deref(), Some("InvalidJobInput"));
        assert!(err.message.contains("missing field"));
    }

    #[test]
    fn test_timeout_error_carries_code() {
        let err = JobError::timed_out(Duration::from_secs(2));
        assert_eq!(err.message, "task timed out after 2s");
        assert_eq!(err.code.as_deref(), Some("TaskTimeout"));
    }
}
