//! Bounded, invalidation-aware LRU cache of `path -> StatRecord`.
//!
//! Shaped after the teacher's `NvmeCacheAdapter` (an `Arc<RwLock<HashMap>>`
//! of entries evicted by a policy-driven sort), narrowed from a
//! byte-budgeted disk cache to a count-budgeted in-memory stat cache: no
//! bytes are ever written to disk (spec: "Persisted state: None").

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::StatRecord;

struct Entry {
    record: StatRecord,
    inserted_at: Instant,
    /// Monotonically increasing insertion sequence number, used to find
    /// the least-recently-inserted entry when the cache is full.
    sequence: u64,
}

struct Inner {
    entries: HashMap<String, Entry>,
    next_sequence: u64,
    enabled: bool,
}

/// Default capacity: 5,000 entries (spec default).
pub const DEFAULT_CAPACITY: usize = 5_000;
/// Default time-to-live: 60 seconds (spec default).
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

pub struct StatCache {
    inner: RwLock<Inner>,
    capacity: usize,
    ttl: Duration,
}

impl StatCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                next_sequence: 0,
                enabled: true,
            }),
            capacity,
            ttl,
        }
    }

    /// Looks up `path` (already absolute-normalized by the caller). An
    /// expired entry behaves as a miss and is evicted on the spot.
    pub fn get(&self, path: &str) -> Option<StatRecord> {
        let mut inner = self.inner.write();
        if !inner.enabled {
            return None;
        }
        let expired = match inner.entries.get(path) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            inner.entries.remove(path);
            return None;
        }
        inner.entries.get(path).map(|e| e.record.clone())
    }

    /// Inserts or replaces the entry for `path`. Evicts the
    /// least-recently-inserted entry first if the cache is at capacity.
    pub fn insert(&self, path: String, record: StatRecord) {
        let mut inner = self.inner.write();
        if !inner.enabled {
            return;
        }
        if !inner.entries.contains_key(&path) && inner.entries.len() >= self.capacity {
            if let Some(oldest_key) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.sequence)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&oldest_key);
            }
        }
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.entries.insert(
            path,
            Entry {
                record,
                inserted_at: Instant::now(),
                sequence,
            },
        );
    }

    /// Removes the entry for `path`, if any. A no-op if absent.
    pub fn invalidate(&self, path: &str) {
        self.inner.write().entries.remove(path);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.write().enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.read().enabled
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StatCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}
