//! Bounded resource caches.
//!
//! [`LruCache`] is a generic capacity-limited map that evicts the least
//! recently used entry on insert and hands every evicted value to a release
//! hook exactly once. [`ResourcePool`] owns the two instances the engine
//! uses (full images and thumbnail crops) and is the single code path
//! through which decoded images are fetched.

mod pool;

pub use pool::ResourcePool;

use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;

type ReleaseHook<K, V> = Box<dyn FnMut(&K, V)>;

struct Entry<V> {
    value: V,
    tick: u64,
}

/// Capacity-limited key/value cache with LRU eviction.
///
/// Recency is tracked with a monotonically increasing tick; `order` maps
/// each live tick back to its key so the oldest entry is the first key.
pub struct LruCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    order: BTreeMap<u64, K>,
    capacity: usize,
    next_tick: u64,
    hits: u64,
    misses: u64,
    on_release: Option<ReleaseHook<K, V>>,
}

/// Counters reported by [`LruCache::stats`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hits as a percentage of lookups, 0 when nothing was looked up.
    pub hit_rate: f64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} entries, {} hits, {} misses ({:.2}% hit rate)",
            self.size, self.capacity, self.hits, self.misses, self.hit_rate
        )
    }
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            capacity: capacity.max(1),
            next_tick: 0,
            hits: 0,
            misses: 0,
            on_release: None,
        }
    }

    /// Installs a hook that receives every value leaving the cache.
    pub fn with_release_hook<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&K, V) + 'static,
    {
        self.on_release = Some(Box::new(hook));
        self
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn release(&mut self, key: &K, value: V) {
        if let Some(hook) = self.on_release.as_mut() {
            hook(key, value);
        }
    }

    /// Looks up `key`, promoting it to most recently used on a hit.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if !self.entries.contains_key(key) {
            self.misses += 1;
            return None;
        }
        self.hits += 1;
        let tick = self.bump();
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&entry.tick);
        entry.tick = tick;
        self.order.insert(tick, key.clone());
        Some(&entry.value)
    }

    /// Checks for `key` without touching recency or counters.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or overwrites `key`.
    ///
    /// Inserting a new key into a full cache first evicts the least recently
    /// used entry. Overwriting releases the previous value and never evicts.
    pub fn set(&mut self, key: K, value: V) {
        let tick = self.bump();

        if let Some(entry) = self.entries.get_mut(&key) {
            self.order.remove(&entry.tick);
            entry.tick = tick;
            let old = std::mem::replace(&mut entry.value, value);
            self.order.insert(tick, key.clone());
            self.release(&key, old);
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.order.insert(tick, key.clone());
        self.entries.insert(key, Entry { value, tick });
    }

    fn evict_oldest(&mut self) {
        let Some((_, oldest)) = self.order.pop_first() else {
            return;
        };
        if let Some(entry) = self.entries.remove(&oldest) {
            debug!("Cache at capacity {}, evicting oldest entry", self.capacity);
            self.release(&oldest, entry.value);
        }
    }

    /// Releases every held value and resets the counters.
    pub fn clear(&mut self) {
        self.order.clear();
        let drained: Vec<(K, Entry<V>)> = self.entries.drain().collect();
        for (key, entry) in drained {
            self.release(&key, entry.value);
        }
        self.hits = 0;
        self.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys from least to most recently used.
    pub fn keys_by_recency(&self) -> Vec<K> {
        self.order.values().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        let hit_rate = if total > 0 {
            self.hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        CacheStats {
            size: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            hit_rate,
        }
    }
}

impl<K, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}
