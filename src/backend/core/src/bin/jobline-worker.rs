//! Jobline Worker - claims notified jobs and runs them, plus the lease reclaimer.

use std::sync::Arc;

use jobline_core::{
    config::Config,
    db::Database,
    jobs::{
        HandlerRegistry, JobStore, LifecycleManager, QueryJob, Reclaimer, RedisTransport,
        Transport, Worker, WorkerConfig,
    },
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

    telemetry::init("jobline-worker", &config.observability)?;
    match config.observability.metrics_addr.as_deref() {
        Some(addr) => telemetry::metrics::serve(addr.parse()?)?,
        None => telemetry::metrics::register_metrics(),
    }

    let db = Database::new(&config.database).await?;
    db.migrate().await?;
    let store: Arc<dyn JobStore> = Arc::new(db);

    let transport: Arc<dyn Transport> =
        Arc::new(RedisTransport::connect(&config.redis.url, config.queue.queue_key.clone()).await?);

    let mut registry = HandlerRegistry::new();
    match config.worker.query_endpoint.as_deref() {
        Some(endpoint) => {
            registry.register(QueryJob::new(endpoint).with_timeout(config.worker.task_timeout));
        }
        None => tracing::warn!("No query endpoint configured; query jobs will fail as unknown"),
    }

    let worker_config = WorkerConfig::from_settings(&config.worker, &config.queue);
    let lifecycle = LifecycleManager::new(store);

    let worker = Worker::new(worker_config, lifecycle.clone(), transport.clone(), Arc::new(registry)).start();

    let reclaimer = if config.reclaimer.enabled {
        Some(Reclaimer::new(lifecycle, transport, config.reclaimer.interval).start())
    } else {
        tracing::info!("Lease reclaimer disabled");
        None
    };

    shutdown_signal().await;

    worker.shutdown();
    if let Some(reclaimer) = &reclaimer {
        reclaimer.shutdown();
    }

    let stats = worker.stats().clone();
    worker.join().await;
    if let Some(reclaimer) = reclaimer {
        reclaimer.join().await;
    }

    tracing::info!(
        processed = stats.processed(),
        completed = stats.completed(),
        failed = stats.failed(),
        abandoned = stats.abandoned(),
        "Worker shutdown complete"
    );
    telemetry::shutdown();

    Ok(())
}
