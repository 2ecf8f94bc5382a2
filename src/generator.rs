use crate::config::RunConfig;
use crate::key_store::{key_id, SharedKeyStore};
use crate::metrics::Metrics;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

const PROGRESS_EVERY: u64 = 100;

pub struct Generator {
    config: RunConfig,
    store: Arc<SharedKeyStore>,
    metrics: Metrics,
}

impl Generator {
    pub fn new(config: RunConfig, store: Arc<SharedKeyStore>, metrics: Metrics) -> Self {
        Self { config, store, metrics }
    }

    /// Emits `num_keys` keys, one per `key_delay`, and returns how many were
    /// emitted. Stops early once `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!(
            num_keys = self.config.num_keys,
            key_delay_ms = self.config.key_delay_ms,
            key_ttl_ms = self.config.key_ttl_ms,
            "starting key generation"
        );
        let mut emitted = 0;
        for seq in 0..self.config.num_keys {
            if *shutdown.borrow() {
                info!(emitted, "test stopped during generation");
                return emitted;
            }
            // Counted before insertion so a key can never be consumed ahead
            // of being counted as generated.
            self.metrics.record_generated();
            self.store.insert(key_id(seq), self.config.key_ttl_ms);
            emitted += 1;

            if emitted % PROGRESS_EVERY == 0 {
                info!(emitted, "generated keys");
            }

            if seq + 1 < self.config.num_keys && self.config.key_delay_ms > 0 {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!(emitted, "test stopped during generation");
                            return emitted;
                        }
                    }
                    _ = tokio::time::sleep(self.config.key_delay()) => {}
                }
            } else {
                tokio::task::yield_now().await;
            }
        }
        info!(emitted, "key generation complete");
        emitted
    }
}
