use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// One logical expiration. The event id is the expired key's id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationEvent {
    pub id: String,
    pub emitted_ms: u64,
}

/// Fan-out transport between the key store and the consumers.
///
/// Delivery is at-least-once per subscriber and unordered across events.
pub trait NotificationBus: Send + Sync {
    /// Registers a subscriber. Every event published after this returns is
    /// delivered to it.
    fn subscribe(&self, consumer_id: &str) -> Subscription;

    fn publish(&self, event: ExpirationEvent);
}

/// Receiving half handed to a consumer.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<ExpirationEvent>,
}

impl Subscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<ExpirationEvent>) -> Self {
        Self { receiver }
    }

    /// Next event, or `None` once the bus has dropped this subscriber.
    pub async fn recv(&mut self) -> Option<ExpirationEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ExpirationEvent> {
        self.receiver.try_recv().ok()
    }
}

struct Subscriber {
    consumer_id: String,
    sender: mpsc::UnboundedSender<ExpirationEvent>,
}

/// In-process bus over unbounded channels.
///
/// `delivery_copies > 1` delivers every event that many times to each
/// subscriber, standing in for a transport that retries.
pub struct InMemoryBus {
    subscribers: Mutex<Vec<Subscriber>>,
    delivery_copies: u32,
    delivered: AtomicU64,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_delivery_copies(1)
    }

    pub fn with_delivery_copies(delivery_copies: u32) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            delivery_copies: delivery_copies.max(1),
            delivered: AtomicU64::new(0),
        }
    }

    /// Deliveries accepted by a live subscriber channel so far, copies included.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus for InMemoryBus {
    fn subscribe(&self, consumer_id: &str) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().push(Subscriber { consumer_id: consumer_id.to_string(), sender });
        Subscription::new(receiver)
    }

    fn publish(&self, event: ExpirationEvent) {
        let mut subscribers = self.lock();
        subscribers.retain(|subscriber| {
            for _ in 0..self.delivery_copies {
                if subscriber.sender.send(event.clone()).is_err() {
                    debug!(consumer = %subscriber.consumer_id, "dropping disconnected subscriber");
                    return false;
                }
                self.delivered.fetch_add(1, Ordering::SeqCst);
            }
            true
        });
    }
}
