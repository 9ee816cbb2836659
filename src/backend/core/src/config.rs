//! Configuration management.
//!
//! Values come from `JOBLINE__SECTION__FIELD` environment variables, optionally
//! layered over a config file. Durations use humantime notation (`"30s"`, `"3m"`).

use serde::Deserialize;
use std::time::Duration;

use crate::error::{JoblineError, Result};
use crate::jobs::BackoffStrategy;
use crate::telemetry::LogFormat;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Worker configuration
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Reclaimer configuration
    #[serde(default)]
    pub reclaimer: ReclaimerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Socket address string for the listener.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// How long to wait for a pooled connection
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout: default_acquire_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Redis list holding job envelopes
    #[serde(default = "default_queue_key")]
    pub queue_key: String,

    /// Window in which identical submissions collapse into one job
    #[serde(default = "default_dedup_window", with = "humantime_serde")]
    pub dedup_window: Duration,

    /// Blocking pop timeout
    #[serde(default = "default_poll_timeout", with = "humantime_serde")]
    pub poll_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_key: default_queue_key(),
            dedup_window: default_dedup_window(),
            poll_timeout: default_poll_timeout(),
        }
    }
}

/// Worker settings as read from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// Maximum attempts per claimed job
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Visibility timeout granted by a claim or extension
    #[serde(default = "default_lease_duration", with = "humantime_serde")]
    pub lease_duration: Duration,

    /// Delay between attempts
    #[serde(default)]
    pub backoff: BackoffStrategy,

    /// Upper bound for a single attempt when the handler sets none
    #[serde(default = "default_task_timeout", with = "humantime_serde")]
    pub task_timeout: Duration,

    /// Endpoint used by the built-in `query` handler
    #[serde(default)]
    pub query_endpoint: Option<String>,

    /// Fixed worker identity; random when unset
    #[serde(default)]
    pub worker_id: Option<String>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            lease_duration: default_lease_duration(),
            backoff: BackoffStrategy::default(),
            task_timeout: default_task_timeout(),
            query_endpoint: None,
            worker_id: None,
        }
    }
}

impl WorkerSettings {
    /// A first attempt runs without renewing the lease, so it must finish
    /// before the lease can expire under it.
    pub fn validate(&self) -> Result<()> {
        if self.task_timeout >= self.lease_duration {
            return Err(JoblineError::configuration(format!(
                "worker.task_timeout ({:?}) must be shorter than worker.lease_duration ({:?})",
                self.task_timeout, self.lease_duration
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReclaimerConfig {
    /// Sweep period
    #[serde(default = "default_reclaim_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Run the sweep in this process
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            interval: default_reclaim_interval(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OpenTelemetry OTLP endpoint
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Prometheus listener address for processes without an HTTP API
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_addr: None,
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_queue_key() -> String {
    "jobs:queue".to_string()
}

fn default_dedup_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_retries() -> u32 {
    3
}

fn default_lease_duration() -> Duration {
    Duration::from_secs(3 * 60)
}

fn default_task_timeout() -> Duration {
    Duration::from_secs(2 * 60)
}

fn default_reclaim_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `DATABASE_URL` is accepted when `JOBLINE__DATABASE__URL` is absent.
    pub fn load() -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::Environment::with_prefix("JOBLINE").separator("__"));

        let cfg: Config = Self::with_database_fallback(builder)?.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("JOBLINE").separator("__"));

        let cfg: Config = Self::with_database_fallback(builder)?.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that cannot run together.
    pub fn validate(&self) -> Result<()> {
        self.worker.validate()
    }

    fn with_database_fallback(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> anyhow::Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(match std::env::var("DATABASE_URL") {
            Ok(url) => builder.set_default("database.url", url)?,
            Err(_) => builder,
        })
    }
}
