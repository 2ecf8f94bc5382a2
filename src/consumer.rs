use crate::bus::{ExpirationEvent, Subscription};
use crate::clock::Clock;
use crate::dedup::Deduplicator;
use crate::metrics::{ConsumerCounter, Metrics};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, trace};

pub struct Consumer {
    counter: ConsumerCounter,
    dedup: Arc<dyn Deduplicator>,
    metrics: Metrics,
    clock: Arc<dyn Clock>,
}

impl Consumer {
    pub fn new(
        counter: ConsumerCounter,
        dedup: Arc<dyn Deduplicator>,
        metrics: Metrics,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { counter, dedup, metrics, clock }
    }

    pub fn id(&self) -> &str {
        self.counter.id()
    }

    /// Counts `event` if the deduplicator admits it. Returns whether it did.
    pub fn handle(&self, event: &ExpirationEvent) -> bool {
        if self.dedup.admit(&event.id, self.clock.now_ms()) {
            self.metrics.record_consumed(&self.counter);
            debug!(consumer = %self.id(), key = %event.id, "processed expired key");
            true
        } else {
            self.metrics.record_duplicate();
            trace!(consumer = %self.id(), key = %event.id, "duplicate dropped");
            false
        }
    }

    /// Receive loop. Ends when `shutdown` flips or the bus drops the
    /// subscription.
    pub async fn run(self, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
        info!(consumer = %self.id(), "consumer started");
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
                event = subscription.recv() => match event {
                    Some(event) => {
                        self.handle(&event);
                    }
                    None => break,
                }
            }
        }
        info!(consumer = %self.id(), processed = self.counter.get(), "consumer stopped");
    }
}
