use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

const DEFAULT_SHARDS: usize = 64;

/// Windowed first-arrival filter consulted by every consumer.
///
/// `admit` must be atomic per event id: two callers racing on the same id at
/// the same time never both get `true`.
pub trait Deduplicator: Send + Sync {
    /// Returns `true` when `event_id` has no active record at `now_ms`, and
    /// records the admission.
    fn admit(&self, event_id: &str, now_ms: u64) -> bool;

    /// Drops every record whose window has passed. Returns the number removed.
    fn purge_expired(&self, now_ms: u64) -> usize;

    /// Number of records currently held, expired or not.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DedupRecord {
    pub first_seen_ms: u64,
    pub expiry_ms: u64,
}

impl DedupRecord {
    fn is_active(&self, now_ms: u64) -> bool {
        now_ms < self.expiry_ms
    }
}

/// Sharded map of event id to [`DedupRecord`], one mutex per shard.
pub struct ShardedDeduplicator {
    shards: Vec<Mutex<FxHashMap<String, DedupRecord>>>,
    window_ms: u64,
}

impl ShardedDeduplicator {
    pub fn new(window_ms: u64) -> Self {
        Self::with_shards(window_ms, DEFAULT_SHARDS)
    }

    pub fn with_shards(window_ms: u64, num_shards: usize) -> Self {
        let num_shards = num_shards.max(1);
        Self {
            shards: (0..num_shards).map(|_| Mutex::new(FxHashMap::default())).collect(),
            window_ms,
        }
    }

    /// Record for `event_id`, if one is held.
    pub fn record(&self, event_id: &str) -> Option<DedupRecord> {
        self.shard(event_id).get(event_id).copied()
    }

    fn shard(&self, event_id: &str) -> MutexGuard<'_, FxHashMap<String, DedupRecord>> {
        let mut hasher = FxHasher::default();
        event_id.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        lock(&self.shards[idx])
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Deduplicator for ShardedDeduplicator {
    fn admit(&self, event_id: &str, now_ms: u64) -> bool {
        let fresh = DedupRecord {
            first_seen_ms: now_ms,
            expiry_ms: now_ms.saturating_add(self.window_ms),
        };
        let mut shard = self.shard(event_id);
        match shard.get_mut(event_id) {
            Some(record) if record.is_active(now_ms) => false,
            // Stale record: overwrite in place.
            Some(record) => {
                *record = fresh;
                true
            }
            None => {
                if self.window_ms > 0 {
                    shard.insert(event_id.to_string(), fresh);
                }
                true
            }
        }
    }

    fn purge_expired(&self, now_ms: u64) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = lock(shard);
            let before = shard.len();
            shard.retain(|_, record| record.is_active(now_ms));
            removed += before - shard.len();
        }
        removed
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|shard| lock(shard).len()).sum()
    }
}
