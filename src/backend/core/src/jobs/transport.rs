//! Work queue transport: "a job exists, go look" notifications.
//!
//! Delivery is at-least-once and carries no authority; the worker always
//! claims through the store before acting on a message.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

use super::job::{Job, JobId};
use crate::error::{ErrorCode, JoblineError, Result};

/// Message pushed onto the transport for each queued job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: JobId,
    #[serde(rename = "type")]
    pub kind: String,
    pub input: serde_json::Value,
}

impl Envelope {
    pub fn for_job(job: &Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind.clone(),
            input: job.input.clone(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Trait for notification transports.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Append a notification to the tail of the queue.
    async fn push(&self, envelope: &Envelope) -> Result<()>;

    /// Take the head of the queue, waiting up to `timeout` for one to arrive.
    ///
    /// Returns the raw message so undecodable payloads can be dropped by the caller.
    async fn pop(&self, timeout: Duration) -> Result<Option<String>>;

    /// Number of pending notifications.
    async fn len(&self) -> Result<usize>;

    /// Connectivity probe.
    async fn ping(&self) -> Result<()> {
        self.len().await.map(|_| ())
    }
}

/// In-memory transport for testing and development.
#[derive(Default)]
pub struct InMemoryTransport {
    queue: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an arbitrary message, bypassing envelope encoding.
    pub fn push_raw(&self, raw: impl Into<String>) {
        self.queue.lock().push_back(raw.into());
        self.notify.notify_one();
    }

    /// Snapshot of queued messages.
    pub fn pending(&self) -> Vec<String> {
        self.queue.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn push(&self, envelope: &Envelope) -> Result<()> {
        self.push_raw(envelope.encode()?);
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(raw) = self.queue.lock().pop_front() {
                return Ok(Some(raw));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.queue.lock().len())
    }
}

/// Redis list transport (`RPUSH` / `BLPOP`).
pub struct RedisTransport {
    client: redis::Client,
    manager: redis::aio::ConnectionManager,
    blocking: tokio::sync::Mutex<Option<redis::aio::MultiplexedConnection>>,
    queue_key: String,
}

impl RedisTransport {
    /// Connect to Redis and bind to `queue_key`.
    pub async fn connect(url: &str, queue_key: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = redis::aio::ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            manager,
            blocking: tokio::sync::Mutex::new(None),
            queue_key: queue_key.into(),
        })
    }

    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    /// Blocking pops hold their connection for the whole wait, so they get
    /// one of their own instead of sharing the manager's.
    async fn blocking_conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        let mut slot = self.blocking.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                JoblineError::with_internal(
                    ErrorCode::TransportConnectionFailed,
                    "Failed to get Redis connection for job queue",
                    e.to_string(),
                )
            })?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_blocking_conn(&self) {
        *self.blocking.lock().await = None;
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn push(&self, envelope: &Envelope) -> Result<()> {
        let serialized = envelope.encode()?;

        let mut conn = self.manager.clone();
        redis::cmd("RPUSH")
            .arg(&self.queue_key)
            .arg(&serialized)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| {
                JoblineError::with_internal(
                    ErrorCode::TransportError,
                    "Failed to enqueue job notification",
                    e.to_string(),
                )
            })?;

        tracing::debug!(queue = %self.queue_key, job_id = %envelope.id, "Job notification pushed");
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.blocking_conn().await?;

        // BLPOP treats 0 as "forever"
        let secs = timeout.as_secs().max(1);
        let popped: std::result::Result<Option<(String, String)>, redis::RedisError> =
            redis::cmd("BLPOP")
                .arg(&self.queue_key)
                .arg(secs)
                .query_async(&mut conn)
                .await;

        match popped {
            Ok(Some((_key, value))) => Ok(Some(value)),
            Ok(None) => Ok(None),
            Err(e) => {
                self.reset_blocking_conn().await;
                Err(JoblineError::from(e))
            }
        }
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.manager.clone();
        let length: usize = redis::cmd("LLEN")
            .arg(&self.queue_key)
            .query_async(&mut conn)
            .await?;
        Ok(length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_envelope_wire_format() {
        let id = JobId::new();
        let envelope = Envelope {
            id,
            kind: "query".to_string(),
            input: json!({"query": "hello"}),
        };
        let value: serde_json::Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert_eq!(value["id"], json!(id.to_string()));
        assert_eq!(value["type"], json!("query"));
        assert_eq!(value["input"]["query"], json!("hello"));
    }

    #[test]
    fn test_envelope_rejects_garbage() {
        assert!(Envelope::decode("not json").is_err());
        assert!(Envelope::decode(r#"{"id":"nope","type":"q","input":{}}"#).is_err());
    }

    #[tokio::test]
    async fn test_in_memory_fifo() {
        let transport = InMemoryTransport::new();
        transport.push_raw("a");
        transport.push_raw("b");

        assert_eq!(transport.len().await.unwrap(), 2);
        assert_eq!(transport.pop(Duration::from_millis(10)).await.unwrap().as_deref(), Some("a"));
        assert_eq!(transport.pop(Duration::from_millis(10)).await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_memory_pop_times_out() {
        let transport = InMemoryTransport::new();
        assert_eq!(transport.pop(Duration::from_secs(5)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_in_memory_pop_wakes_on_push() {
        let transport = Arc::new(InMemoryTransport::new());
        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.pop(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        transport.push_raw("wake");

        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some("wake"));
    }
}
