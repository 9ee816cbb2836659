//! Job commands.
//!
//! Provides submit and status operations for jobs.

use anyhow::{Context, Result};
use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tabled::Tabled;
use uuid::Uuid;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum JobCommands {
    /// Submit a job
    Submit {
        /// Job kind, e.g. `query`
        #[arg(short, long)]
        kind: String,

        /// Job input as inline JSON
        #[arg(short, long, conflicts_with = "file")]
        input: Option<String>,

        /// Read job input from a JSON or YAML file
        #[arg(short, long)]
        file: Option<String>,

        /// Client idempotency key; identical keys within the dedup window return the existing job
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Show a job's status and result
    Status {
        /// Job ID
        job_id: Uuid,

        /// Poll until the job completes or fails
        #[arg(short, long)]
        wait: bool,

        /// Polling interval in milliseconds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "300")]
        timeout_secs: u64,
    },
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SubmitJobRequest {
    kind: String,
    input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct SubmitJobResponse {
    job_id: Uuid,
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct JobInfo {
    id: Uuid,
    kind: String,
    status: String,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    retry_count: i32,
    created_at: String,
    updated_at: String,
}

impl JobInfo {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "failed")
    }
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: i32,
    #[tabled(rename = "Updated")]
    updated_at: String,
}

impl From<&JobInfo> for JobRow {
    fn from(job: &JobInfo) -> Self {
        Self {
            id: job.id.to_string(),
            kind: job.kind.clone(),
            status: output::status_colored(&job.status).to_string(),
            attempts: job.retry_count,
            updated_at: job.updated_at.clone(),
        }
    }
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: JobCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        JobCommands::Submit {
            kind,
            input,
            file,
            idempotency_key,
        } => {
            let input = read_input(input.as_deref(), file.as_deref())?;
            let body = SubmitJobRequest {
                kind,
                input,
                idempotency_key,
            };

            let resp: SubmitJobResponse = client.post("/api/v1/jobs", &body).await?;

            match format {
                OutputFormat::Table => {
                    match resp.message.as_deref() {
                        Some(message) => output::print_info(message),
                        None => output::print_success("Job submitted"),
                    }
                    output::print_detail("Job ID", &resp.job_id.to_string());
                    output::print_detail("Status", &output::status_colored(&resp.status).to_string());
                }
                _ => output::print_item(&resp, format)?,
            }
        }

        JobCommands::Status {
            job_id,
            wait,
            interval_ms,
            timeout_secs,
        } => {
            let path = format!("/api/v1/jobs/{}", job_id);
            let job: JobInfo = if wait {
                wait_for_job(
                    client,
                    &path,
                    Duration::from_millis(interval_ms),
                    Duration::from_secs(timeout_secs),
                )
                .await?
            } else {
                client.get(&path).await?
            };

            match format {
                OutputFormat::Table => print_job(&job)?,
                _ => output::print_item(&job, format)?,
            }
        }
    }

    Ok(())
}

fn read_input(inline: Option<&str>, file: Option<&str>) -> Result<serde_json::Value> {
    match (inline, file) {
        (Some(raw), _) => serde_json::from_str(raw).context("Job input is not valid JSON"),
        (None, Some(path)) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read input file: {}", path))?;
            // YAML is a superset of JSON, so one parser covers both
            serde_yaml::from_str(&content).with_context(|| format!("Failed to parse input file: {}", path))
        }
        (None, None) => Ok(serde_json::json!({})),
    }
}

async fn wait_for_job(client: &ApiClient, path: &str, interval: Duration, limit: Duration) -> Result<JobInfo> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));

    let started = Instant::now();
    loop {
        let job: JobInfo = client.get(path).await?;
        if job.is_terminal() {
            spinner.finish_and_clear();
            return Ok(job);
        }

        spinner.set_message(format!("{} (attempt {})", job.status, job.retry_count));
        if started.elapsed() >= limit {
            spinner.finish_and_clear();
            anyhow::bail!("Job {} still {} after {:?}", job.id, job.status, limit);
        }
        tokio::time::sleep(interval).await;
    }
}

fn print_job(job: &JobInfo) -> Result<()> {
    output::print_header(&format!("Job: {}", job.id));
    output::print_table(&[JobRow::from(job)]);
    output::print_detail("Created", &job.created_at);

    if let Some(result) = &job.result {
        output::print_detail("Result", &serde_json::to_string_pretty(result)?);
    }
    if let Some(error) = &job.error {
        output::print_error(error);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_inline_input() {
        let value = read_input(Some(r#"{"query": "hello"}"#), None).unwrap();
        assert_eq!(value["query"], "hello");
    }

    #[test]
    fn test_read_input_rejects_invalid_json() {
        assert!(read_input(Some("{not json"), None).is_err());
    }

    #[test]
    fn test_missing_input_defaults_to_empty_object() {
        assert_eq!(read_input(None, None).unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_terminal_statuses() {
        let job: JobInfo = serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "kind": "query",
            "status": "failed",
            "error": "boom",
            "retry_count": 3,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:05Z"
        }))
        .unwrap();
        assert!(job.is_terminal());
        assert_eq!(JobRow::from(&job).attempts, 3);
    }
}
