//! Duplicate-submission suppression.
//!
//! A submission is fingerprinted either by the caller's explicit key or by a
//! SHA-256 digest of its normalized content, then checked against recent jobs.
//! The check and the later insert are separate statements: two identical
//! submissions landing in the same instant can both be admitted.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::job::JobId;
use super::store::JobStore;
use crate::error::Result;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A live or completed job with the same fingerprint exists.
    Existing(JobId),
    /// No duplicate; create a job carrying this fingerprint.
    Admitted(String),
}

/// Compute the dedup fingerprint for a submission.
pub fn fingerprint(kind: &str, input: &serde_json::Value, explicit_key: Option<&str>) -> String {
    if let Some(key) = explicit_key {
        return format!("client:{}", key);
    }

    let canonical = serde_json::json!({
        "kind": kind.trim().to_lowercase(),
        "input": normalize(input),
    });
    let bytes = canonical.to_string();
    format!("content:{}", hex::encode(Sha256::digest(bytes.as_bytes())))
}

/// Trim and case-fold strings, sort object keys, keep array order.
pub fn normalize(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;

    match value {
        Value::String(s) => Value::String(s.trim().to_lowercase()),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, normalize(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        other => other.clone(),
    }
}

/// Checks recent history before a job is created.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn JobStore>,
    window: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn JobStore>, window: Duration) -> Self {
        Self { store, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether a submission creates a new job.
    pub async fn admit(
        &self,
        kind: &str,
        input: &serde_json::Value,
        explicit_key: Option<&str>,
    ) -> Result<Admission> {
        let key = fingerprint(kind, input, explicit_key);
        match self.store.find_recent_by_dedup_key(&key, self.window).await? {
            Some(existing) => {
                tracing::debug!(job_id = %existing, dedup_key = %key, "Duplicate submission");
                Ok(Admission::Existing(existing))
            }
            None => Ok(Admission::Admitted(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::NewJob;
    use serde_json::json;

    #[test]
    fn test_explicit_key_wins() {
        let key = fingerprint("query", &json!({"query": "x"}), Some("abc-123"));
        assert_eq!(key, "client:abc-123");
    }

    #[test]
    fn test_explicit_key_is_used_verbatim() {
        let input = json!({"query": "x"});
        assert_eq!(fingerprint("query", &input, Some(" Order-42 ")), "client: Order-42 ");
        assert_ne!(
            fingerprint("query", &input, Some("order-42")),
            fingerprint("query", &input, Some(" order-42"))
        );
        assert_eq!(fingerprint("query", &input, Some("")), "client:");
    }

    #[test]
    fn test_content_fingerprint_normalizes() {
        let a = fingerprint("query", &json!({"query": "  Hello World "}), None);
        let b = fingerprint("query", &json!({"query": "hello world"}), None);
        assert_eq!(a, b);
        assert_eq!(a.len(), "content:".len() + 64);
    }

    #[test]
    fn test_content_fingerprint_ignores_key_order() {
        let a = fingerprint("k", &json!({"a": 1, "b": "X"}), None);
        let b = fingerprint("k", &json!({"b": "x", "a": 1}), None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_content_fingerprint_depends_on_kind_and_array_order() {
        let input = json!({"items": ["a", "b"]});
        assert_ne!(fingerprint("one", &input, None), fingerprint("two", &input, None));
        assert_ne!(
            fingerprint("one", &input, None),
            fingerprint("one", &json!({"items": ["b", "a"]}), None)
        );
    }

    #[tokio::test]
    async fn test_admit_returns_existing_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let guard = IdempotencyGuard::new(store.clone(), Duration::from_secs(300));
        let input = json!({"query": "hello"});

        let key = match guard.admit("query", &input, None).await.unwrap() {
            Admission::Admitted(key) => key,
            other => panic!("expected admission, got {:?}", other),
        };
        let job = store.create(NewJob::new("query", input.clone(), key)).await.unwrap();

        assert_eq!(
            guard.admit("query", &json!({"query": " HELLO "}), None).await.unwrap(),
            Admission::Existing(job.id)
        );
    }
}
