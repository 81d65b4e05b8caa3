use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

type EvictCallback<K, V> = Box<dyn Fn(&K, &V) + Send + Sync>;

/// LRU cache with per-entry TTL and an optional on-evict callback.
///
/// The callback fires only for capacity evictions, not TTL expiry or
/// explicit removal — it exists to persist entries squeezed out while
/// still fresh (e.g. mined solutions).
pub struct TtlCache<K: Hash + Eq + Clone, V: Clone> {
    inner: Mutex<LruCache<K, (V, Instant)>>,
    ttl: Duration,
    on_evict: Option<EvictCallback<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1"),
            )),
            ttl,
            on_evict: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_evict_callback(
        capacity: usize,
        ttl: Duration,
        callback: EvictCallback<K, V>,
    ) -> Self {
        let mut cache = Self::new(capacity, ttl);
        cache.on_evict = Some(callback);
        cache
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        match inner.get(key) {
            Some((value, inserted)) if inserted.elapsed() <= self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            Some(_) => {
                inner.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: K, value: V) {
        let evicted = {
            let mut inner = self.inner.lock();
            inner.push(key.clone(), (value, Instant::now()))
        };
        if let (Some(cb), Some((k, (v, inserted)))) = (&self.on_evict, evicted) {
            // push() also returns the old value on key overwrite; only a
            // true capacity eviction (different key) goes to the callback,
            // and only while still fresh.
            if k != key && inserted.elapsed() <= self.ttl {
                cb(&k, &v);
            }
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().pop(key).map(|(v, _)| v)
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hits / (hits + misses); 0 when never queried.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }
}
