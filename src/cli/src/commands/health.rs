//! Health check command.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Include detailed component checks
    #[arg(short, long)]
    detailed: bool,
}

fn component_line(check: Option<&serde_json::Value>) -> String {
    let Some(check) = check else {
        return "unknown".to_string();
    };
    let healthy = check.get("healthy").and_then(|v| v.as_bool()).unwrap_or(false);
    match (healthy, check.get("error").and_then(|v| v.as_str())) {
        (true, _) => "healthy".to_string(),
        (false, Some(error)) => format!("unhealthy ({})", error),
        (false, None) => "unhealthy".to_string(),
    }
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (http_status, health) = client.get_raw("/health").await?;

    match format {
        OutputFormat::Table => {
            let status = health
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");

            output::print_header("System Health");
            output::print_detail("Status", status);
            output::print_detail("API URL", client.base_url());

            if let Some(version) = health.get("version").and_then(|v| v.as_str()) {
                output::print_detail("Version", version);
            }

            if let Some(ts) = health.get("timestamp").and_then(|v| v.as_str()) {
                output::print_detail("Timestamp", ts);
            }

            if args.detailed {
                let checks = health.get("checks");
                println!();
                output::print_header("Components");
                output::print_detail("Database", &component_line(checks.and_then(|c| c.get("database"))));
                output::print_detail("Transport", &component_line(checks.and_then(|c| c.get("transport"))));
                if let Some(depth) = checks.and_then(|c| c.get("queue_depth")).and_then(|v| v.as_u64()) {
                    output::print_detail("Queue depth", &depth.to_string());
                }
            }

            if http_status.is_success() && status == "healthy" {
                output::print_success("All systems operational");
            } else {
                anyhow::bail!("System status: {}", status);
            }
        }
        _ => output::print_item(&health, format)?,
    }

    Ok(())
}
