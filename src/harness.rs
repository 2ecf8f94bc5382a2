use crate::bus::{InMemoryBus, NotificationBus};
use crate::clock::{Clock, MonotonicClock};
use crate::config::{HarnessSettings, RunConfig, TestConfig};
use crate::consumer::Consumer;
use crate::dedup::{Deduplicator, ShardedDeduplicator};
use crate::error::HarnessError;
use crate::generator::Generator;
use crate::key_store::SharedKeyStore;
use crate::metrics::{Metrics, TestMetrics, TestStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Pipeline tasks and shutdown signal of the run in progress.
struct ActiveRun {
    config: RunConfig,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    dedup: Arc<ShardedDeduplicator>,
    store: Arc<SharedKeyStore>,
    bus: Arc<InMemoryBus>,
}

/// Test-run state machine: `Stopped` until [`Harness::start`] succeeds,
/// `Running` until [`Harness::stop`].
///
/// Start and stop are serialized on one async mutex, so two concurrent starts
/// can never launch two generators. Status and metrics reads skip that mutex
/// and go straight to the atomic tallies.
pub struct Harness {
    settings: HarnessSettings,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    running: AtomicBool,
    active: Mutex<Option<ActiveRun>>,
}

impl Harness {
    pub fn new(settings: HarnessSettings) -> Self {
        Self::with_clock(settings, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(settings: HarnessSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            metrics: Metrics::new(),
            running: AtomicBool::new(false),
            active: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Validates `config`, resets all tallies and launches the pipeline.
    ///
    /// Rejected with [`HarnessError::AlreadyRunning`] while a run is active.
    /// Must be called from within a tokio runtime.
    pub async fn start(&self, config: TestConfig) -> Result<RunConfig, HarnessError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(HarnessError::AlreadyRunning);
        }
        let run_config = config.validate()?;
        info!(
            num_keys = run_config.num_keys,
            key_delay_ms = run_config.key_delay_ms,
            key_ttl_ms = run_config.key_ttl_ms,
            dedup_window_ms = run_config.dedup_window_ms,
            consumers = self.settings.consumers,
            delivery_copies = self.settings.delivery_copies,
            "starting test"
        );

        self.metrics.reset();
        let dedup = Arc::new(ShardedDeduplicator::new(run_config.dedup_window_ms));
        let bus = Arc::new(InMemoryBus::with_delivery_copies(self.settings.delivery_copies));
        let store = Arc::new(SharedKeyStore::new(Arc::clone(&self.clock)));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(self.settings.consumers + 3);

        // Consumers subscribe before the first key exists.
        for index in 0..self.settings.consumers {
            let consumer_id = self.settings.consumer_id(index);
            let subscription = bus.subscribe(&consumer_id);
            let consumer = Consumer::new(
                self.metrics.register_consumer(&consumer_id),
                dedup.clone(),
                self.metrics.clone_handle(),
                Arc::clone(&self.clock),
            );
            tasks.push(tokio::spawn(consumer.run(subscription, shutdown_rx.clone())));
        }

        let expiry_store = Arc::clone(&store);
        let expiry_bus: Arc<dyn NotificationBus> = bus.clone();
        let expiry_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            expiry_store.run_expirations(expiry_bus, expiry_shutdown).await;
        }));

        tasks.push(tokio::spawn(sweep_dedup(
            dedup.clone(),
            Arc::clone(&self.clock),
            self.metrics.clone_handle(),
            self.settings.sweep_interval,
            shutdown_rx.clone(),
        )));

        let generator = Generator::new(run_config, Arc::clone(&store), self.metrics.clone_handle());
        tasks.push(tokio::spawn(async move {
            generator.run(shutdown_rx).await;
        }));

        self.running.store(true, Ordering::SeqCst);
        *active = Some(ActiveRun { config: run_config, shutdown, tasks, dedup, store, bus });
        Ok(run_config)
    }

    /// Signals every pipeline task and waits for them to exit. No-op when
    /// nothing is running.
    pub async fn stop(&self) -> TestStatus {
        let mut active = self.active.lock().await;
        let Some(run) = active.take() else {
            return self.status();
        };
        // Receivers only go away once their task has finished.
        let _ = run.shutdown.send(true);
        for task in run.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "pipeline task ended abnormally");
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!(
            generated = self.metrics.generated(),
            consumed = self.metrics.consumed(),
            duplicates = self.metrics.duplicates(),
            purged = self.metrics.purged(),
            dedup_records = run.dedup.len(),
            pending_keys = run.store.pending(),
            "test stopped"
        );
        self.status()
    }

    pub fn status(&self) -> TestStatus {
        self.metrics.status(self.is_running())
    }

    pub fn metrics(&self) -> TestMetrics {
        self.metrics.metrics()
    }

    /// Rejected duplicate deliveries in the current or last run.
    pub fn duplicates(&self) -> u64 {
        self.metrics.duplicates()
    }

    /// Configuration of the active run.
    pub async fn config(&self) -> Option<RunConfig> {
        self.active.lock().await.as_ref().map(|run| run.config)
    }

    /// Polls until every configured key has expired and every delivery of its
    /// event has been handled by a consumer, or `timeout` passes. Returns
    /// `false` on timeout or when nothing is running.
    ///
    /// Handled means admitted or rejected, so this holds however many
    /// consumers end up counting the same key.
    pub async fn wait_until_drained(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let Some((num_keys, store, bus)) = self
                .active
                .lock()
                .await
                .as_ref()
                .map(|run| (run.config.num_keys, Arc::clone(&run.store), Arc::clone(&run.bus)))
            else {
                return false;
            };
            // Expired before delivered: once every key is published, the
            // delivery total is final.
            if store.expired() == num_keys {
                let delivered = bus.delivered();
                let handled = self.metrics.consumed() + self.metrics.duplicates();
                if handled >= delivered {
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }

    /// Keys generated but not yet expired, for the active run.
    pub async fn pending_keys(&self) -> usize {
        self.active.lock().await.as_ref().map_or(0, |run| run.store.pending())
    }
}

async fn sweep_dedup(
    dedup: Arc<ShardedDeduplicator>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let purged = dedup.purge_expired(clock.now_ms());
                if purged > 0 {
                    metrics.record_purged(purged);
                    debug!(purged, occupancy = dedup.len(), "swept expired dedup records");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(consumers: usize) -> HarnessSettings {
        HarnessSettings {
            consumers,
            consumer_prefix: "test".to_string(),
            delivery_copies: 1,
            sweep_interval: Duration::from_millis(50),
        }
    }

    fn config() -> TestConfig {
        TestConfig { num_keys: 10, key_delay: 1, key_ttl: 20, dedup_window: 100 }
    }

    #[tokio::test]
    async fn test_initial_state_is_stopped() {
        let harness = Harness::new(settings(2));
        assert_eq!(harness.status(), TestStatus::default());
        assert!(harness.metrics().consumers.is_empty());
        assert!(harness.config().await.is_none());
    }

    #[tokio::test]
    async fn test_start_registers_consumers() {
        let harness = Harness::new(settings(3));
        harness.start(config()).await.unwrap();
        assert!(harness.is_running());
        let ids: Vec<_> = harness.metrics().consumers.keys().cloned().collect();
        assert_eq!(ids, vec!["test-0", "test-1", "test-2"]);
        assert_eq!(harness.config().await.unwrap().num_keys, 10);
        harness.stop().await;
        assert!(!harness.is_running());
    }

    #[tokio::test]
    async fn test_start_while_running_rejected() {
        let harness = Harness::new(settings(1));
        harness.start(config()).await.unwrap();
        let err = harness.start(config()).await.unwrap_err();
        assert!(matches!(err, HarnessError::AlreadyRunning));
        assert!(harness.is_running());
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_config_leaves_harness_stopped() {
        let harness = Harness::new(settings(1));
        let err = harness.start(TestConfig { key_ttl: 0, ..config() }).await.unwrap_err();
        assert!(matches!(err, HarnessError::Configuration(_)));
        assert!(!harness.is_running());
        assert!(harness.config().await.is_none());
    }

    #[tokio::test]
    async fn test_pending_keys_tracks_unexpired_keys() {
        let harness = Harness::new(settings(1));
        assert_eq!(harness.pending_keys().await, 0);
        harness
            .start(TestConfig { num_keys: 3, key_delay: 0, key_ttl: 60_000, dedup_window: 100 })
            .await
            .unwrap();
        for _ in 0..100 {
            if harness.pending_keys().await == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(harness.pending_keys().await, 3);
        assert!(!harness.wait_until_drained(Duration::from_millis(20)).await);
        harness.stop().await;
        assert_eq!(harness.pending_keys().await, 0);
    }

    #[tokio::test]
    async fn test_sweeper_purges_expired_records() {
        let dedup = Arc::new(ShardedDeduplicator::new(10));
        let clock = Arc::new(crate::clock::ManualClock::new(0));
        let metrics = Metrics::new();
        dedup.admit("a", 0);
        dedup.admit("b", 0);
        clock.set(1_000);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sweep_dedup(
            dedup.clone(),
            clock,
            metrics.clone_handle(),
            Duration::from_millis(5),
            rx,
        ));
        for _ in 0..100 {
            if dedup.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(dedup.is_empty());
        assert_eq!(metrics.purged(), 2);
    }
}
