//! Bounded retry state machine.
//!
//! The worker drives one [`RetryState`] per claimed job: `start_attempt` before
//! each run, `record_failure` after each failed run. The state never sleeps;
//! it only says how long to wait, so it can be tested without a runtime.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::job::{BackoffStrategy, JobError};

/// Configuration for job retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1)
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self::new(1, BackoffStrategy::default())
    }

    pub fn start(&self) -> RetryState {
        RetryState {
            policy: self.clone(),
            attempt: 0,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Wait, then run the next attempt.
    RetryAfter(Duration),
    /// No attempts left. Carries the last error.
    Exhausted(JobError),
}

/// Attempt counter for a single claimed job.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    /// Begin the next attempt, returning its 1-based number.
    pub fn start_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Attempts started so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }

    /// Decide what follows a failed attempt.
    pub fn record_failure(&self, error: JobError) -> RetryDecision {
        if self.attempt >= self.policy.max_attempts {
            return RetryDecision::Exhausted(error);
        }
        RetryDecision::RetryAfter(self.policy.backoff.delay_for_attempt(self.attempt.saturating_sub(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausts_after_max_attempts() {
        let policy = RetryPolicy::new(3, BackoffStrategy::default());
        let mut state = policy.start();

        assert_eq!(state.start_attempt(), 1);
        assert_eq!(
            state.record_failure(JobError::new("e1")),
            RetryDecision::RetryAfter(Duration::from_secs(1))
        );
        assert_eq!(state.start_attempt(), 2);
        assert_eq!(
            state.record_failure(JobError::new("e2")),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(state.start_attempt(), 3);
        assert_eq!(
            state.record_failure(JobError::new("e3")),
            RetryDecision::Exhausted(JobError::new("e3"))
        );
    }

    #[test]
    fn test_coded_errors_are_retried_like_any_other() {
        let mut state = RetryPolicy::new(2, BackoffStrategy::fixed(Duration::from_millis(5))).start();
        state.start_attempt();
        let rejected = JobError::new("HTTP 400: bad query").with_code("InvalidJobInput");
        assert_eq!(
            state.record_failure(rejected.clone()),
            RetryDecision::RetryAfter(Duration::from_millis(5))
        );
        state.start_attempt();
        assert_eq!(state.record_failure(rejected.clone()), RetryDecision::Exhausted(rejected));
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let policy = RetryPolicy::new(0, BackoffStrategy::fixed(Duration::from_millis(5)));
        assert_eq!(policy.max_attempts, 1);
        let mut state = policy.start();
        state.start_attempt();
        assert!(!state.is_retry());
        assert!(matches!(
            state.record_failure(JobError::new("x")),
            RetryDecision::Exhausted(_)
        ));
    }
}
