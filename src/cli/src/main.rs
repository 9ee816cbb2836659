//! Jobline CLI - Command-line interface for submitting and inspecting jobs.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{health, job};
use output::OutputFormat;

/// Jobline - reliable job queue CLI
#[derive(Parser)]
#[command(
    name = "jobline",
    version,
    about = "Jobline - reliable job queue",
    long_about = "CLI tool for submitting jobs to a Jobline server and following their progress.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "JOBLINE_API_URL", default_value = "http://localhost:8080")]
    api_url: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Job operations
    #[command(subcommand)]
    Job(job::JobCommands),

    /// Check system health
    Health(health::HealthArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let client = client::ApiClient::new(&cli.api_url)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Job(cmd) => job::execute(cmd, &client, format).await,
        Commands::Health(args) => health::execute(args, &client, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
