use clap::{Parser, Subcommand};
use dedup_harness::table_print::print_metrics_table;
use dedup_harness::{HarnessError, TestConfig, TestMetrics, TestStatus};
use reqwest::blocking::{Client, Response};

#[derive(Parser)]
#[command(name = "harness_ctl")]
#[command(about = "Control client for a running dedup-harness server", long_about = None)]
struct Cli {
    /// Base URL of the harness control API
    #[arg(long, env = "HARNESS_URL", default_value = "http://127.0.0.1:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a test run
    Start {
        #[arg(long)]
        num_keys: i64,
        #[arg(long)]
        key_delay: i64,
        #[arg(long)]
        key_ttl: i64,
        #[arg(long)]
        dedup_window: i64,
    },
    /// Stop the active run
    Stop,
    /// Show running flag and totals
    Status,
    /// Show totals and per-consumer counts
    Metrics,
}

fn check(response: Response) -> Result<Response, HarnessError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(HarnessError::Http(format!("{}: {}", status, body)))
}

fn main() -> Result<(), HarnessError> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let client = Client::new();
    let url = |path: &str| format!("{}{}", cli.url.trim_end_matches('/'), path);
    let http = |e: reqwest::Error| HarnessError::Http(e.to_string());

    match cli.command {
        Commands::Start { num_keys, key_delay, key_ttl, dedup_window } => {
            let config = TestConfig { num_keys, key_delay, key_ttl, dedup_window };
            check(client.post(url("/api/start")).json(&config).send().map_err(http)?)?;
            println!("started: {} keys", num_keys);
        }
        Commands::Stop => {
            let status: TestStatus = check(client.post(url("/api/stop")).send().map_err(http)?)?
                .json()
                .map_err(http)?;
            println!("stopped: generated={} consumed={}", status.generated, status.consumed);
        }
        Commands::Status => {
            let status: TestStatus = check(client.get(url("/api/status")).send().map_err(http)?)?
                .json()
                .map_err(http)?;
            println!(
                "running={} generated={} consumed={}",
                status.is_running, status.generated, status.consumed
            );
        }
        Commands::Metrics => {
            let metrics: TestMetrics = check(client.get(url("/api/metrics")).send().map_err(http)?)?
                .json()
                .map_err(http)?;
            print_metrics_table(&metrics);
        }
    }
    Ok(())
}
