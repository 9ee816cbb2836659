//! Reclaimer: periodic sweep returning abandoned jobs to the queue.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::lifecycle::LifecycleManager;
use super::transport::{Envelope, Transport};
use crate::error::Result;

/// Background sweep over expired leases.
#[derive(Clone)]
pub struct Reclaimer {
    lifecycle: LifecycleManager,
    transport: Arc<dyn Transport>,
    interval: Duration,
}

/// Handle for stopping a running reclaimer.
pub struct ReclaimerHandle {
    shutdown: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

impl ReclaimerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub async fn join(self) {
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Reclaimer task panicked");
        }
    }
}

impl Reclaimer {
    pub fn new(lifecycle: LifecycleManager, transport: Arc<dyn Transport>, interval: Duration) -> Self {
        Self {
            lifecycle,
            transport,
            interval,
        }
    }

    /// Run one sweep and re-notify each reclaimed job. Returns the count.
    ///
    /// A failed push is logged only. The job stays `queued` and any later
    /// notification for it can still claim it.
    pub async fn sweep_once(&self) -> Result<usize> {
        let reclaimed = self.lifecycle.reclaim_sweep().await?;

        for job in &reclaimed {
            tracing::info!(job_id = %job.id, kind = %job.kind, "Reclaimed job with expired lease");
            if let Err(e) = self.transport.push(&Envelope::for_job(job)).await {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to re-notify reclaimed job");
            }
        }

        Ok(reclaimed.len())
    }

    /// Spawn the sweep loop.
    pub fn start(self) -> ReclaimerHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_secs = self.interval.as_secs(), "Reclaimer started");

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // a dropped handle closes the channel
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match self.sweep_once().await {
                            Ok(0) => {}
                            Ok(count) => tracing::info!(reclaimed = count, "Reclaim sweep returned jobs to queue"),
                            Err(e) => tracing::warn!(error = %e, "Reclaim sweep failed"),
                        }
                    }
                }
            }

            tracing::info!("Reclaimer stopped");
        });

        ReclaimerHandle { shutdown, join }
    }
}
