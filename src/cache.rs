use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time source for cache expiry. Injected so tests can advance time without
/// sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock backed `Clock` used outside of tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
}

/// Bounded read-through cache with per-entry TTL.
///
/// Entries expire lazily on read and are evicted oldest-first when the
/// capacity bound is hit. Racy overwrites are harmless: values are pure reads
/// of an idempotent external source.
pub struct TtlCache<V: Clone + Send + Sync + 'static> {
    entries: DashMap<String, CacheEntry<V>>,
    ttl: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self::with_clock(ttl, capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity,
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
        }
        // Expired entry: drop it so the map does not accumulate dead keys.
        self.entries
            .remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let now = self.clock.now();
        if self.entries.len() >= self.capacity {
            self.evict(now);
        }
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at: now,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Eagerly drops one key, used when an external update event for the
    /// underlying record is observed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&self, now: Instant) {
        self.entries.retain(|_, entry| entry.expires_at > now);
        // Still full after dropping expired entries: evict the oldest one.
        // O(n), acceptable at the configured capacities.
        while self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.inserted_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}
