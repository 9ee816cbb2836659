//! Prometheus metrics for the queue core.
//!
//! Recording goes through the `metrics` facade, so nothing is collected
//! until a recorder is installed by one of the binaries.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

const TASK_DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Install the Prometheus recorder and return a handle for rendering `/metrics`.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = builder()?.install_recorder()?;
    register_metrics();
    Ok(handle)
}

/// Install the Prometheus recorder behind its own HTTP listener.
pub fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    builder()?.with_http_listener(addr).install()?;
    register_metrics();
    tracing::info!(%addr, "Metrics listener started");
    Ok(())
}

fn builder() -> anyhow::Result<PrometheusBuilder> {
    Ok(PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("jobline_task_duration_seconds".to_string()),
        TASK_DURATION_BUCKETS,
    )?)
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "jobline_jobs_submitted_total",
        "Submissions by outcome (queued, existing, enqueue_failed)"
    );
    describe_counter!("jobline_jobs_claimed_total", "Successful claims");
    describe_counter!(
        "jobline_claim_conflicts_total",
        "Claims that matched no row because the job was owned or finished"
    );
    describe_counter!("jobline_jobs_completed_total", "Jobs completed");
    describe_counter!("jobline_jobs_failed_total", "Jobs failed, by reason");
    describe_counter!("jobline_task_attempts_total", "Task attempts, by kind");
    describe_counter!(
        "jobline_lease_extensions_total",
        "Lease renewals by outcome (extended, not_owner)"
    );
    describe_counter!(
        "jobline_jobs_reclaimed_total",
        "Jobs returned to the queue after their lease expired"
    );
    describe_counter!(
        "jobline_malformed_messages_total",
        "Transport messages dropped because they could not be decoded"
    );
    describe_counter!("jobline_errors_total", "Errors by code and category");
    describe_histogram!(
        "jobline_task_duration_seconds",
        Unit::Seconds,
        "Duration of a single task attempt"
    );
}

pub fn record_submitted(outcome: &'static str) {
    counter!("jobline_jobs_submitted_total", "outcome" => outcome).increment(1);
}

pub fn record_claimed() {
    counter!("jobline_jobs_claimed_total").increment(1);
}

pub fn record_claim_conflict() {
    counter!("jobline_claim_conflicts_total").increment(1);
}

pub fn record_completed() {
    counter!("jobline_jobs_completed_total").increment(1);
}

pub fn record_failed(reason: &'static str) {
    counter!("jobline_jobs_failed_total", "reason" => reason).increment(1);
}

pub fn record_attempt(kind: &str) {
    counter!("jobline_task_attempts_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_task_duration(kind: &str, seconds: f64) {
    histogram!("jobline_task_duration_seconds", "kind" => kind.to_string()).record(seconds);
}

pub fn record_lease_extension(outcome: &'static str) {
    counter!("jobline_lease_extensions_total", "outcome" => outcome).increment(1);
}

pub fn record_reclaimed(count: u64) {
    counter!("jobline_jobs_reclaimed_total").increment(count);
}

pub fn record_malformed() {
    counter!("jobline_malformed_messages_total").increment(1);
}
