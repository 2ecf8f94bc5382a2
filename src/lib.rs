pub mod bus;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod dedup;
pub mod error;
pub mod generator;
pub mod harness;
pub mod key_store;
pub mod metrics;
pub mod server;
pub mod table_print;
pub mod telemetry;

pub use config::{HarnessSettings, RunConfig, TestConfig};
pub use error::*;
pub use harness::Harness;
pub use metrics::{TestMetrics, TestStatus};
pub use telemetry::init_tracing;
