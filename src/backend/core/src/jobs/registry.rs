//! Job kind registry.
//!
//! Handlers are written against typed input and output; the registry erases
//! those types so the worker can dispatch on the stored `kind` string.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::job::JobError;

/// A task function for one job kind.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Decoded job input.
    type Input: DeserializeOwned + Send + Sync + 'static;
    /// Result stored on the job when the task succeeds.
    type Output: Serialize + Send + 'static;

    /// The `kind` tag this handler serves.
    fn kind(&self) -> &'static str;

    /// Run one attempt.
    async fn execute(&self, input: &Self::Input) -> Result<Self::Output, JobError>;

    /// Check decoded input before the first attempt. Failures are never retried.
    fn validate(&self, _input: &Self::Input) -> Result<(), String> {
        Ok(())
    }

    /// Per-attempt deadline overriding the worker default.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// A job whose input has been decoded and is ready to run.
#[async_trait]
pub trait PreparedJob: Send + Sync {
    async fn run(&self) -> Result<serde_json::Value, JobError>;

    fn timeout(&self) -> Option<Duration>;
}

/// Type-erased handler stored in the registry.
pub trait ErasedHandler: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Decode raw input. An error here means the payload can never succeed.
    fn prepare(&self, input: &serde_json::Value) -> Result<Box<dyn PreparedJob>, String>;
}

struct Typed<H>(Arc<H>);

struct Prepared<H: JobHandler> {
    handler: Arc<H>,
    input: H::Input,
}

impl<H: JobHandler> ErasedHandler for Typed<H> {
    fn kind(&self) -> &'static str {
        self.0.kind()
    }

    fn prepare(&self, input: &serde_json::Value) -> Result<Box<dyn PreparedJob>, String> {
        let decoded: H::Input = serde_json::from_value(input.clone()).map_err(|e| e.to_string())?;
        self.0.validate(&decoded)?;
        Ok(Box::new(Prepared {
            handler: self.0.clone(),
            input: decoded,
        }))
    }
}

#[async_trait]
impl<H: JobHandler> PreparedJob for Prepared<H> {
    async fn run(&self) -> Result<serde_json::Value, JobError> {
        let output = self.handler.execute(&self.input).await?;
        serde_json::to_value(output)
            .map_err(|e| JobError::new(format!("failed to encode job result: {}", e)))
    }

    fn timeout(&self) -> Option<Duration> {
        self.handler.timeout()
    }
}

/// Maps job kinds to their handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its kind, replacing any previous one.
    pub fn register<H: JobHandler>(&mut self, handler: H) -> &mut Self {
        let kind = handler.kind().to_string();
        if self.handlers.contains_key(&kind) {
            tracing::warn!(kind = %kind, "Replacing registered job handler");
        }
        self.handlers.insert(kind, Arc::new(Typed(Arc::new(handler))));
        self
    }

    /// Builder-style registration.
    pub fn with<H: JobHandler>(mut self, handler: H) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ErasedHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
