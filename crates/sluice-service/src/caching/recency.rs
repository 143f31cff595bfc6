use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

use super::ConfigError;

/// A fixed-capacity map that evicts its least recently used key.
///
/// Recency only changes through [`get`](Self::get) and [`set`](Self::set). Lookups that miss,
/// and the observers [`peek`](Self::peek), [`contains`](Self::contains) and [`keys`](Self::keys),
/// never reorder entries.
///
/// The cache is not synchronized. Callers that share it between threads need to put it behind
/// a lock.
pub struct RecencyCache<K: Hash + Eq, V> {
    inner: LruCache<K, V>,
}

impl<K: Hash + Eq, V> RecencyCache<K, V> {
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// Fails with [`ConfigError::ZeroCapacity`] for a capacity of `0`.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(ConfigError::ZeroCapacity)?;
        Ok(Self {
            inner: LruCache::new(capacity),
        })
    }

    /// Returns the value for `key` and marks it as most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.get(key)
    }

    /// Returns the value for `key` without touching its recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.peek(key)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.contains(key)
    }

    /// Inserts or replaces the value for `key`, making it the most recently used entry.
    ///
    /// Replacing an existing key never evicts. Inserting a new key into a full cache evicts
    /// exactly the least recently used entry, which is returned.
    pub fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.inner.contains(&key) {
            self.inner.put(key, value);
            None
        } else {
            self.inner.push(key, value)
        }
    }

    /// Iterates over the keys, from most to least recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.cap().get()
    }
}

impl<K: Hash + Eq, V> fmt::Debug for RecencyCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecencyCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys<V>(cache: &RecencyCache<&'static str, V>) -> Vec<&'static str> {
        cache.keys().copied().collect()
    }

    #[test]
    fn test_zero_capacity() {
        let cache = RecencyCache::<&str, u32>::new(0);
        assert_eq!(cache.unwrap_err(), ConfigError::ZeroCapacity);
    }

    #[test]
    fn test_eviction_order() {
        let mut cache = RecencyCache::new(2).unwrap();
        assert_eq!(cache.set("a", 1), None);
        assert_eq!(cache.set("b", 2), None);
        assert_eq!(cache.set("c", 3), Some(("a", 1)));
        assert_eq!(keys(&cache), ["c", "b"]);

        // promoting `b` leaves `c` as the least recently used entry
        assert_eq!(cache.get("b"), Some(&2));
        assert_eq!(cache.set("d", 4), Some(("c", 3)));
        assert_eq!(keys(&cache), ["d", "b"]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_replace_promotes_without_eviction() {
        let mut cache = RecencyCache::new(2).unwrap();
        cache.set("a", 1);
        cache.set("b", 2);

        assert_eq!(cache.set("a", 10), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(keys(&cache), ["a", "b"]);
        assert_eq!(cache.peek("a"), Some(&10));

        assert_eq!(cache.set("c", 3), Some(("b", 2)));
    }

    #[test]
    fn test_miss_keeps_order() {
        let mut cache = RecencyCache::new(3).unwrap();
        cache.set("a", 1);
        cache.set("b", 2);
        let before = keys(&cache);

        assert_eq!(cache.get("zzz"), None);
        assert_eq!(keys(&cache), before);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_observers_keep_order() {
        let mut cache = RecencyCache::new(2).unwrap();
        cache.set("a", 1);
        cache.set("b", 2);

        assert_eq!(cache.peek("a"), Some(&1));
        assert!(cache.contains("a"));
        assert_eq!(cache.set("c", 3), Some(("a", 1)));
    }

    #[test]
    fn test_holds_most_recently_touched() {
        let capacity = 5;
        let mut cache = RecencyCache::new(capacity).unwrap();
        let mut touched = Vec::new();

        for i in 0..50u32 {
            cache.set(i, i);
            touched.push(i);
            if i % 3 == 0 {
                let older = i / 2;
                if cache.get(&older).is_some() {
                    touched.push(older);
                }
            }
            assert!(cache.len() <= capacity);
        }

        let mut expected = Vec::new();
        for key in touched.iter().rev() {
            if !expected.contains(key) {
                expected.push(*key);
            }
            if expected.len() == capacity {
                break;
            }
        }
        let actual: Vec<u32> = cache.keys().copied().collect();
        assert_eq!(actual, expected);
    }
}
