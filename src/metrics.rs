use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStatus {
    pub is_running: bool,
    pub generated: u64,
    pub consumed: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMetrics {
    pub generated: u64,
    pub consumed: u64,
    pub consumers: BTreeMap<String, u64>,
}

/// Processed-event counter owned by one consumer.
#[derive(Clone, Debug)]
pub struct ConsumerCounter {
    id: String,
    count: Arc<AtomicU64>,
}

impl ConsumerCounter {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

/// Run-wide tallies shared by the generator, the consumers and the API.
///
/// Consumers increment under the read side of the consumer map and
/// [`Metrics::metrics`] snapshots under the write side, so a snapshot never
/// sees a consumer count without its matching `consumed` increment.
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    generated: AtomicU64,
    consumed: AtomicU64,
    duplicates: AtomicU64,
    purged: AtomicU64,
    consumers: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self { inner: Arc::new(MetricsInner::default()) }
    }

    pub fn clone_handle(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }

    pub fn record_generated(&self) {
        self.inner.generated.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_consumed(&self, counter: &ConsumerCounter) {
        let _gate = self.inner.consumers.read().unwrap_or_else(PoisonError::into_inner);
        counter.count.fetch_add(1, Ordering::SeqCst);
        self.inner.consumed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_duplicate(&self) {
        self.inner.duplicates.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_purged(&self, count: usize) {
        self.inner.purged.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Creates a zeroed counter for `consumer_id`, replacing any earlier one.
    pub fn register_consumer(&self, consumer_id: &str) -> ConsumerCounter {
        let count = Arc::new(AtomicU64::new(0));
        self.inner
            .consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(consumer_id.to_string(), Arc::clone(&count));
        ConsumerCounter { id: consumer_id.to_string(), count }
    }

    /// Zeroes every tally and forgets all consumers.
    pub fn reset(&self) {
        let mut consumers = self.inner.consumers.write().unwrap_or_else(PoisonError::into_inner);
        consumers.clear();
        self.inner.generated.store(0, Ordering::SeqCst);
        self.inner.consumed.store(0, Ordering::SeqCst);
        self.inner.duplicates.store(0, Ordering::SeqCst);
        self.inner.purged.store(0, Ordering::SeqCst);
    }

    pub fn generated(&self) -> u64 {
        self.inner.generated.load(Ordering::SeqCst)
    }

    pub fn consumed(&self) -> u64 {
        self.inner.consumed.load(Ordering::SeqCst)
    }

    pub fn duplicates(&self) -> u64 {
        self.inner.duplicates.load(Ordering::SeqCst)
    }

    pub fn purged(&self) -> u64 {
        self.inner.purged.load(Ordering::Relaxed)
    }

    /// Lock-free status read. `consumed` is loaded before `generated`, so a
    /// key counted once never shows up as consumed before it is generated.
    /// With a zero dedup window every consumer counts every key and
    /// `consumed` grows past `generated`.
    pub fn status(&self, is_running: bool) -> TestStatus {
        let consumed = self.consumed();
        let generated = self.generated();
        TestStatus { is_running, generated, consumed }
    }

    pub fn metrics(&self) -> TestMetrics {
        let consumers = self.inner.consumers.write().unwrap_or_else(PoisonError::into_inner);
        let consumed = self.consumed();
        let generated = self.generated();
        TestMetrics {
            generated,
            consumed,
            consumers: consumers
                .iter()
                .map(|(id, count)| (id.clone(), count.load(Ordering::SeqCst)))
                .collect(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_counts_sum_to_consumed() {
        let metrics = Metrics::new();
        let a = metrics.register_consumer("a");
        let b = metrics.register_consumer("b");
        for _ in 0..3 {
            metrics.record_generated();
        }
        metrics.record_consumed(&a);
        metrics.record_consumed(&a);
        metrics.record_consumed(&b);

        let snapshot = metrics.metrics();
        assert_eq!(snapshot.generated, 3);
        assert_eq!(snapshot.consumed, 3);
        assert_eq!(snapshot.consumers.get("a"), Some(&2));
        assert_eq!(snapshot.consumers.get("b"), Some(&1));
        assert_eq!(a.get(), 2);
    }

    #[test]
    fn test_reset_clears_everything() {
        let metrics = Metrics::new();
        let a = metrics.register_consumer("a");
        metrics.record_generated();
        metrics.record_consumed(&a);
        metrics.record_duplicate();
        metrics.reset();

        assert_eq!(metrics.status(false), TestStatus::default());
        assert!(metrics.metrics().consumers.is_empty());
        assert_eq!(metrics.duplicates(), 0);
    }

    #[test]
    fn test_snapshots_conserve_counts_under_contention() {
        let metrics = Metrics::new();
        let counters: Vec<_> = (0..4).map(|i| metrics.register_consumer(&format!("c-{}", i))).collect();

        let writers: Vec<_> = counters
            .into_iter()
            .map(|counter| {
                let metrics = metrics.clone_handle();
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        metrics.record_generated();
                        metrics.record_consumed(&counter);
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            let snapshot = metrics.metrics();
            let sum: u64 = snapshot.consumers.values().sum();
            assert_eq!(sum, snapshot.consumed);
            assert!(snapshot.consumed <= snapshot.generated);
        }
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(metrics.metrics().consumed, 8_000);
    }

    #[test]
    fn test_status_serializes_with_api_field_names() {
        let status = TestStatus { is_running: true, generated: 5, consumed: 4 };
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#"{"is_running":true,"generated":5,"consumed":4}"#);
    }
}
