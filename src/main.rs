use clap::Parser;
use dedup_harness::config::default_consumer_prefix;
use dedup_harness::{Harness, HarnessError, HarnessSettings, server};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "dedup-harness")]
#[command(about = "Key-expiration deduplication load-test harness with an HTTP control API", long_about = None)]
struct Cli {
    /// Address the control API listens on
    #[arg(long, env = "HARNESS_BIND", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Number of consumers subscribed to the expiration bus
    #[arg(long, env = "HARNESS_CONSUMERS", default_value_t = 3)]
    consumers: usize,

    /// Consumer id prefix (defaults to HOSTNAME)
    #[arg(long, env = "HARNESS_CONSUMER_PREFIX")]
    consumer_prefix: Option<String>,

    /// Times each expiration event is delivered to each consumer
    #[arg(long, env = "HARNESS_DELIVERY_COPIES", default_value_t = 1)]
    delivery_copies: u32,

    /// Interval between sweeps of expired dedup records, in milliseconds
    #[arg(long, env = "HARNESS_SWEEP_INTERVAL_MS", default_value_t = 1_000)]
    sweep_interval_ms: u64,

    /// OTLP/HTTP collector endpoint for span export
    #[cfg(feature = "remote")]
    #[arg(long, env = "HARNESS_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

impl Cli {
    fn settings(&self) -> HarnessSettings {
        HarnessSettings {
            consumers: self.consumers,
            consumer_prefix: self.consumer_prefix.clone().unwrap_or_else(default_consumer_prefix),
            delivery_copies: self.delivery_copies,
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
        }
    }

    #[cfg(feature = "remote")]
    fn init_tracing(&self) -> Result<(), HarnessError> {
        match &self.otlp_endpoint {
            Some(endpoint) => {
                dedup_harness::telemetry::init_tracing_otlp(SERVICE_NAME, endpoint)?;
                info!(endpoint = %endpoint, "exporting spans over OTLP");
            }
            None => dedup_harness::init_tracing(SERVICE_NAME),
        }
        Ok(())
    }

    #[cfg(not(feature = "remote"))]
    fn init_tracing(&self) -> Result<(), HarnessError> {
        dedup_harness::init_tracing(SERVICE_NAME);
        Ok(())
    }
}

const SERVICE_NAME: &str = "dedup-harness";

fn main() -> Result<(), HarnessError> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    // Tracing goes in before the runtime exists; the OTLP exporter builds a
    // blocking HTTP client.
    cli.init_tracing()?;
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> Result<(), HarnessError> {
    let harness = Arc::new(Harness::new(cli.settings()));
    info!(settings = ?harness.settings(), "harness ready");

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received shutdown signal"),
            Err(e) => {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        }
    };
    server::serve(Arc::clone(&harness), &cli.bind, shutdown).await?;

    let status = harness.stop().await;
    info!(generated = status.generated, consumed = status.consumed, "shut down");
    Ok(())
}
