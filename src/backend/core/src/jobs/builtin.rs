//! Built-in job handlers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::job::JobError;
use super::registry::JobHandler;
use crate::error::JoblineError;

/// Input of a `query` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryInput {
    pub query: String,
}

/// Job: forward a query to an answering service and store its JSON reply.
#[derive(Debug, Clone)]
pub struct QueryJob {
    client: reqwest::Client,
    endpoint: String,
    timeout: Option<Duration>,
}

impl QueryJob {
    pub const KIND: &'static str = "query";

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout: None,
        }
    }

    /// Per-attempt deadline for this handler.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn request_failed(error: reqwest::Error) -> JobError {
    JoblineError::from(error).into()
}

#[async_trait]
impl JobHandler for QueryJob {
    type Input = QueryInput;
    type Output = serde_json::Value;

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn validate(&self, input: &QueryInput) -> Result<(), String> {
        if input.query.trim().is_empty() {
            return Err("query must not be empty".to_string());
        }
        Ok(())
    }

    async fn execute(&self, input: &QueryInput) -> Result<serde_json::Value, JobError> {
        let body = QueryInput {
            query: input.query.trim().to_string(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(request_failed)?;

        response.json::<serde_json::Value>().await.map_err(|e| {
            JobError::new(format!("query service returned an invalid body: {}", e))
        })
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_blank_query() {
        let job = QueryJob::new("http://localhost:9/answer");
        assert!(job
            .validate(&QueryInput {
                query: "   ".to_string()
            })
            .is_err());
        assert!(job
            .validate(&QueryInput {
                query: "hello".to_string()
            })
            .is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        // port 9 (discard) is closed on test hosts
        let job = QueryJob::new("http://127.0.0.1:9/answer");
        let err = job
            .execute(&QueryInput {
                query: "hello".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code.as_deref(), Some("NetworkError"));
        assert!(err.message.starts_with("Failed to connect to external service"));
    }
}
