use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Process-wide LRU cache whose entries expire after a fixed TTL.
pub struct TtlCache<V> {
    entries: Mutex<LruCache<String, Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries();
        let expired = entries.get(key)?.expires_at <= Instant::now();
        if expired {
            entries.pop(key);
            return None;
        }
        entries.peek(key).map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: &str, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries()
            .put(key.to_string(), Entry { value, expires_at });
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries().pop(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}
