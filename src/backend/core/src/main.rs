//! Jobline Server - HTTP entry point for submitting and inspecting jobs.

use std::net::SocketAddr;
use std::sync::Arc;

use jobline_core::{
    api::{self, AppState},
    config::Config,
    db::Database,
    jobs::{JobService, RedisTransport},
    signal::shutdown_signal,
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = match std::env::var("JOBLINE_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::load()?,
    };

    telemetry::init("jobline-server", &config.observability)?;
    let metrics = telemetry::metrics::install_recorder()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Jobline server");

    let db = Database::new(&config.database).await?;
    db.migrate().await?;

    let transport = RedisTransport::connect(&config.redis.url, config.queue.queue_key.clone()).await?;
    tracing::info!(queue_key = %config.queue.queue_key, "Connected to Redis");

    let service = JobService::new(Arc::new(db), Arc::new(transport), config.queue.dedup_window);
    let app = api::build_router(AppState::new(service).with_metrics(metrics));

    let addr: SocketAddr = config.server.addr().parse()?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    telemetry::shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}
