use crate::bus::{ExpirationEvent, NotificationBus};
use crate::clock::Clock;
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, info};

pub const KEY_PREFIX: &str = "gen-key:";

pub fn key_id(seq: u64) -> String {
    format!("{}{}", KEY_PREFIX, seq)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Key {
    pub id: String,
    pub created_ms: u64,
    pub ttl_ms: u64,
}

impl Key {
    pub fn deadline_ms(&self) -> u64 {
        self.created_ms.saturating_add(self.ttl_ms)
    }
}

/// Live keys ordered by deadline.
///
/// Each key leaves the store exactly once, through [`KeyStore::drain_expired`].
#[derive(Default)]
pub struct KeyStore {
    deadlines: BinaryHeap<Reverse<(u64, String)>>,
    live: FxHashMap<String, Key>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` with deadline `now_ms + ttl_ms`. Re-inserting a live id
    /// replaces its deadline.
    pub fn insert(&mut self, id: String, ttl_ms: u64, now_ms: u64) {
        let key = Key { id: id.clone(), created_ms: now_ms, ttl_ms };
        self.deadlines.push(Reverse((key.deadline_ms(), id.clone())));
        self.live.insert(id, key);
    }

    /// Removes and returns every key whose deadline is at or before `now_ms`,
    /// earliest first.
    pub fn drain_expired(&mut self, now_ms: u64) -> Vec<Key> {
        let mut expired = Vec::new();
        while let Some(Reverse((deadline, _))) = self.deadlines.peek() {
            if *deadline > now_ms {
                break;
            }
            let Some(Reverse((deadline, id))) = self.deadlines.pop() else {
                break;
            };
            // Heap entries left behind by a re-insert no longer match the live key.
            let current = self.live.get(&id).map(|key| key.deadline_ms());
            if current == Some(deadline) {
                if let Some(key) = self.live.remove(&id) {
                    expired.push(key);
                }
            }
        }
        expired
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.deadlines.peek().map(|Reverse((deadline, _))| *deadline)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

/// Key store shared between the generator (inserts) and the expiration task
/// (drains). Inserts wake the expiration task so a new, earlier deadline is
/// never slept through.
pub struct SharedKeyStore {
    store: Mutex<KeyStore>,
    inserted: Notify,
    clock: Arc<dyn Clock>,
    expired: AtomicU64,
}

impl SharedKeyStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(KeyStore::new()),
            inserted: Notify::new(),
            clock,
            expired: AtomicU64::new(0),
        }
    }

    pub fn insert(&self, id: String, ttl_ms: u64) {
        let now = self.clock.now_ms();
        self.lock().insert(id, ttl_ms, now);
        self.inserted.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Keys whose expiration has been published. Bumped only after the
    /// publish returns.
    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, KeyStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes expired keys to `bus` until `shutdown` flips to `true`.
    pub async fn run_expirations(
        &self,
        bus: Arc<dyn NotificationBus>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let now = self.clock.now_ms();
            let (expired, next_deadline) = {
                let mut store = self.lock();
                let expired = store.drain_expired(now);
                (expired, store.next_deadline())
            };
            for key in expired {
                debug!(key = %key.id, deadline_ms = key.deadline_ms(), now_ms = now, "key expired");
                bus.publish(ExpirationEvent { id: key.id, emitted_ms: now });
                self.expired.fetch_add(1, Ordering::SeqCst);
            }

            match next_deadline {
                Some(deadline) => {
                    let wait = Duration::from_millis(deadline.saturating_sub(self.clock.now_ms()).max(1));
                    tokio::select! {
                        changed = shutdown.changed() => if changed.is_err() { break },
                        _ = self.inserted.notified() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                None => {
                    tokio::select! {
                        changed = shutdown.changed() => if changed.is_err() { break },
                        _ = self.inserted.notified() => {}
                    }
                }
            }
        }
        info!(published = self.expired(), pending = self.pending(), "expiration trigger stopped");
    }
}
