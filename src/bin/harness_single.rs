use clap::Parser;
use dedup_harness::config::default_consumer_prefix;
use dedup_harness::table_print::print_metrics_table;
use dedup_harness::{Harness, HarnessError, HarnessSettings, TestConfig};
use std::time::Duration;
use tracing::{info, warn};

/// Runs one test in-process and prints the final tallies.
#[derive(Parser, Debug)]
#[command(name = "harness_single")]
#[command(about = "Run a single key-expiration dedup test without the HTTP API", long_about = None)]
struct Cli {
    #[arg(long)]
    num_keys: i64,
    /// Milliseconds between keys
    #[arg(long)]
    key_delay: i64,
    /// Milliseconds each key lives
    #[arg(long)]
    key_ttl: i64,
    /// Milliseconds repeats of an event id are suppressed
    #[arg(long)]
    dedup_window: i64,

    #[arg(long, default_value_t = 3)]
    consumers: usize,
    #[arg(long, default_value_t = 1)]
    delivery_copies: u32,
    /// Give up waiting for the pipeline to drain after this many seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), HarnessError> {
    dotenv::dotenv().ok();
    dedup_harness::init_tracing("harness-single");
    let cli = Cli::parse();

    let harness = Harness::new(HarnessSettings {
        consumers: cli.consumers,
        consumer_prefix: default_consumer_prefix(),
        delivery_copies: cli.delivery_copies,
        ..HarnessSettings::default()
    });
    let config = TestConfig {
        num_keys: cli.num_keys,
        key_delay: cli.key_delay,
        key_ttl: cli.key_ttl,
        dedup_window: cli.dedup_window,
    };
    harness.start(config).await?;

    let drained = harness.wait_until_drained(Duration::from_secs(cli.timeout_secs)).await;
    let pending_keys = harness.pending_keys().await;
    if !drained {
        warn!(timeout_secs = cli.timeout_secs, pending_keys, "pipeline did not drain before timeout");
    }
    harness.stop().await;

    let metrics = harness.metrics();
    info!(duplicates = harness.duplicates(), pending_keys, drained, "run finished");
    print_metrics_table(&metrics);
    Ok(())
}
