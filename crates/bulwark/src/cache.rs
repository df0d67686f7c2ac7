//! Size- and count-bounded LRU cache with TTL
//!
//! Guards repeated reads and parses of the same files. Two bounds hold after
//! every insert:
//! - the number of entries never exceeds `max_entries`
//! - the sum of entry size estimates never exceeds `max_bytes`
//!
//! When an insert would break either bound the least-recently-used entries
//! are evicted until it fits. A successful `get` makes an entry the most
//! recently used. Entries older than the TTL (measured from insertion) read
//! as absent and are dropped on that read.

use crate::{BulwarkError, CacheConfig, Result};
use bulwark_core::observe;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Approximate in-memory size of a cached value, in bytes.
pub trait SizeEstimate {
    fn estimated_size(&self) -> usize;
}

impl SizeEstimate for String {
    fn estimated_size(&self) -> usize {
        self.len()
    }
}

impl SizeEstimate for Vec<u8> {
    fn estimated_size(&self) -> usize {
        self.len()
    }
}

impl SizeEstimate for serde_json::Value {
    fn estimated_size(&self) -> usize {
        use serde_json::Value;
        match self {
            Value::Null | Value::Bool(_) => 1,
            Value::Number(_) => 8,
            Value::String(s) => s.len(),
            Value::Array(items) => items.iter().map(SizeEstimate::estimated_size).sum(),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| k.len() + v.estimated_size())
                .sum(),
        }
    }
}

impl<T: SizeEstimate + ?Sized> SizeEstimate for Arc<T> {
    fn estimated_size(&self) -> usize {
        (**self).estimated_size()
    }
}

type NodeIdx = usize;

struct LruNode<K, V> {
    key: K,
    value: V,
    size: usize,
    inserted_at: Instant,
    prev: Option<NodeIdx>,
    next: Option<NodeIdx>,
}

impl<K, V> LruNode<K, V> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

/// Index-based doubly-linked list, most recent at the head, holding the
/// entries themselves and their byte total.
struct LruList<K, V> {
    nodes: Vec<Option<LruNode<K, V>>>,
    free: Vec<NodeIdx>,
    head: Option<NodeIdx>,
    tail: Option<NodeIdx>,
    index: HashMap<K, NodeIdx>,
    bytes: usize,
}

impl<K: Eq + Hash + Clone, V> LruList<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            index: HashMap::with_capacity(capacity),
            bytes: 0,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn node(&mut self, idx: NodeIdx) -> &mut LruNode<K, V> {
        self.nodes[idx]
            .as_mut()
            .unwrap_or_else(|| unreachable!("linked node {} is vacant", idx))
    }

    fn find(&mut self, key: &K) -> Option<&mut LruNode<K, V>> {
        let idx = *self.index.get(key)?;
        self.nodes[idx].as_mut()
    }

    fn push_front(&mut self, key: K, value: V, size: usize) {
        let node = LruNode {
            key: key.clone(),
            value,
            size,
            inserted_at: Instant::now(),
            prev: None,
            next: self.head,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };

        if let Some(old_head) = self.head {
            self.node(old_head).prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
        self.index.insert(key, idx);
        self.bytes += size;
    }

    fn promote(&mut self, key: &K) {
        let Some(&idx) = self.index.get(key) else {
            return;
        };
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        let old_head = self.head;
        {
            let node = self.node(idx);
            node.prev = None;
            node.next = old_head;
        }
        if let Some(old_head) = old_head {
            self.node(old_head).prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    /// Unlink the least-recently-used entry, returning its key.
    fn pop_tail(&mut self) -> Option<K> {
        let idx = self.tail?;
        self.detach(idx);
        let node = self.nodes[idx].take()?;
        self.index.remove(&node.key);
        self.free.push(idx);
        self.bytes -= node.size;
        Some(node.key)
    }

    fn remove(&mut self, key: &K) -> bool {
        let Some(idx) = self.index.remove(key) else {
            return false;
        };
        self.detach(idx);
        if let Some(node) = self.nodes[idx].take() {
            self.bytes -= node.size;
        }
        self.free.push(idx);
        true
    }

    fn expired_keys(&self, ttl: Duration) -> Vec<K> {
        self.nodes
            .iter()
            .flatten()
            .filter(|node| node.is_expired(ttl))
            .map(|node| node.key.clone())
            .collect()
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.index.clear();
        self.bytes = 0;
    }

    fn detach(&mut self, idx: NodeIdx) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev.take(), node.next.take())
        };
        match prev {
            Some(p) => self.node(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node(n).prev = prev,
            None => self.tail = prev,
        }
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
    pub bytes: usize,
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Thread-safe bounded LRU cache.
///
/// Every read promotes its entry, so entries, recency order and byte
/// accounting all live behind one mutex.
pub struct BoundedCache<K, V> {
    lru: Mutex<LruList<K, V>>,
    config: CacheConfig,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            lru: Mutex::new(LruList::new(config.max_entries)),
            ttl: config.ttl(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a live value, making it the most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut lru = self.lru.lock();
        let lookup = lru
            .find(key)
            .map(|node| (node.is_expired(self.ttl), node.value.clone()));

        let value = match lookup {
            None => None,
            Some((true, _)) => {
                lru.remove(key);
                observe::set_cache_size(lru.len(), lru.bytes);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some((false, value)) => {
                lru.promote(key);
                Some(value)
            }
        };
        drop(lru);

        self.record_lookup(value.is_some());
        value
    }

    /// Whether a live entry exists. Does not affect recency.
    pub fn contains(&self, key: &K) -> bool {
        self.lru
            .lock()
            .find(key)
            .is_some_and(|node| !node.is_expired(self.ttl))
    }

    /// Insert with an explicit size estimate in bytes.
    ///
    /// Returns false, and drops any previous value for `key`, if the entry
    /// can never fit.
    pub fn insert_with_size(&self, key: K, value: V, size: usize) -> bool {
        if size > self.config.max_bytes || self.config.max_entries == 0 {
            tracing::debug!(
                "Not caching entry of {} bytes (max_bytes {}, max_entries {})",
                size,
                self.config.max_bytes,
                self.config.max_entries
            );
            self.delete(&key);
            return false;
        }

        let mut lru = self.lru.lock();
        lru.remove(&key);

        let mut evicted = 0u64;
        while lru.bytes + size > self.config.max_bytes || lru.len() >= self.config.max_entries {
            if lru.pop_tail().is_none() {
                break;
            }
            evicted += 1;
        }

        lru.push_front(key, value, size);
        let (entries, bytes) = (lru.len(), lru.bytes);
        drop(lru);

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            tracing::debug!("Evicted {} cache entries", evicted);
        }
        observe::set_cache_size(entries, bytes);
        true
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&self, key: &K) -> bool {
        let mut lru = self.lru.lock();
        let removed = lru.remove(key);
        observe::set_cache_size(lru.len(), lru.bytes);
        removed
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut lru = self.lru.lock();
        let expired = lru.expired_keys(self.ttl);
        for key in &expired {
            lru.remove(key);
        }
        observe::set_cache_size(lru.len(), lru.bytes);
        drop(lru);

        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    pub fn clear(&self) {
        self.lru.lock().clear();
        observe::set_cache_size(0, 0);
    }

    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the size estimates of all entries, expired ones included.
    pub fn total_bytes(&self) -> usize {
        self.lru.lock().bytes
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, bytes) = {
            let lru = self.lru.lock();
            (lru.len(), lru.bytes)
        };
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries,
            bytes,
            max_entries: self.config.max_entries,
            max_bytes: self.config.max_bytes,
        }
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        observe::record_cache_lookup(hit);
    }
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + SizeEstimate,
{
    /// Insert using the value's own size estimate.
    pub fn insert(&self, key: K, value: V) -> bool {
        let size = value.estimated_size();
        self.insert_with_size(key, value, size)
    }

    /// Return the cached value or load, cache, and return it.
    ///
    /// Concurrent misses for the same key may each run the loader.
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: K, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = loader().await.map_err(BulwarkError::Other)?;
        self.insert(key, value.clone());
        Ok(value)
    }
}
