//! Telemetry: structured logging, distributed tracing and metrics.
//!
//! - **Logging**: `tracing-subscriber` fmt layer in JSON, pretty or compact form
//! - **Tracing**: optional OpenTelemetry OTLP export
//! - **Metrics**: Prometheus via the `metrics` facade
//!
//! # Example
//!
//! ```rust,no_run
//! use jobline_core::config::ObservabilityConfig;
//!
//! jobline_core::telemetry::init("jobline-worker", &ObservabilityConfig::default())
//!     .expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::LogFormat;

use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize the observability stack.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init(service_name: &str, config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let telemetry_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(
                    opentelemetry_sdk::trace::config().with_resource(opentelemetry_sdk::Resource::new(vec![
                        opentelemetry::KeyValue::new("service.name", service_name.to_string()),
                        opentelemetry::KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    ])),
                )
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(logging::fmt_layer(config.log_format))
        .with(telemetry_layer)
        .try_init()?;

    tracing::info!(
        service = service_name,
        format = ?config.log_format,
        otlp = config.otlp_endpoint.is_some(),
        "Telemetry initialized"
    );
    Ok(())
}

/// Flush and shut down OpenTelemetry.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}
