//! Command-line client for the aggregation runtime: the spec'd historical
//! runner (drives `fetchHistorical` in-process, no server needed) plus a
//! thin operator client for `run`/`stop`/`status` against a running API.

mod client;
mod historical;

use clap::{Parser, Subcommand};
use client::ApiClient;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "agg-cli")]
#[command(about = "Historical runner and operator client for the aggregation runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drives `fetchHistorical` on one source plugin over a date window.
    Historical {
        #[arg(long)]
        source: String,
        #[arg(long)]
        date: Option<i64>,
        #[arg(long)]
        after: Option<i64>,
        #[arg(long)]
        before: Option<i64>,
        #[arg(long)]
        output: Option<String>,
    },
    /// Starts a one-shot platform-mode job for a stored configuration.
    Run {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
        config_id: Uuid,
    },
    /// Cooperatively cancels a running job.
    Stop {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
        job_id: Uuid,
    },
    /// Prints the current snapshot of a job.
    Status {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
        job_id: Uuid,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Command::Historical { source, date, after, before, output } => {
            historical::run(historical::HistoricalArgs { source, date, after, before, output }).await
        }
        Command::Run { server, config_id } => match ApiClient::new(server).run_once(config_id).await {
            Ok(job_id) => {
                println!("{job_id}");
                0
            }
            Err(err) => {
                eprintln!("{err}");
                2
            }
        },
        Command::Stop { server, job_id } => match ApiClient::new(server).stop(job_id).await {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("{err}");
                2
            }
        },
        Command::Status { server, job_id } => match ApiClient::new(server).status(job_id).await {
            Ok(status) => {
                println!("{}", serde_json::to_string_pretty(&status).unwrap_or_default());
                0
            }
            Err(err) => {
                eprintln!("{err}");
                2
            }
        },
    };

    std::process::exit(exit_code);
}
