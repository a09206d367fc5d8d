//! Bounded LRU cache.
//!
//! Used by the request manager to remember block hashes already handed
//! upstream. Thread-safe via an internal mutex.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash as StdHash;

/// LRU cache with bounded capacity.
pub struct LruCache<K, V> {
    inner: Mutex<LruCacheInner<K, V>>,
}

struct LruCacheInner<K, V> {
    map: HashMap<K, V>,

    /// Keys from least to most recently used.
    order: VecDeque<K>,

    capacity: usize,
}

impl<K: Clone + Eq + StdHash, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be positive");
        Self {
            inner: Mutex::new(LruCacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
                capacity,
            }),
        }
    }

    /// Insert a value, evicting the least recently used entry at capacity.
    pub fn put(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        if inner.map.contains_key(&key) {
            inner.map.insert(key.clone(), value);
            Self::touch(&mut inner, &key);
            return;
        }
        if inner.map.len() >= inner.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
            }
        }
        inner.map.insert(key.clone(), value);
        inner.order.push_back(key);
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let value = inner.map.get(key).cloned()?;
        Self::touch(&mut inner, key);
        Some(value)
    }

    /// Membership check; does not refresh recency.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    fn touch(inner: &mut LruCacheInner<K, V>, key: &K) {
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            inner.order.remove(pos);
            inner.order.push_back(key.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let cache: LruCache<u32, &str> = LruCache::new(4);
        cache.put(1, "a");
        assert_eq!(cache.get(&1), Some("a"));
        assert!(cache.contains(&1));
        assert_eq!(cache.get(&2), None);
    }

    #[test]
    fn test_eviction_is_lru() {
        let cache: LruCache<u32, u32> = LruCache::new(2);
        cache.put(1, 10);
        cache.put(2, 20);

        // Touch 1 so 2 becomes the eviction candidate.
        cache.get(&1);
        cache.put(3, 30);

        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_overwrite_does_not_grow() {
        let cache: LruCache<u32, u32> = LruCache::new(2);
        cache.put(1, 10);
        cache.put(1, 11);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&1), Some(11));
    }
}
