// Copyright (C) 2026 Maestro Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded LRU cache with byte-size accounting and staleness sweeps.
//!
//! Used by the processor to keep reconstructed instance histories across
//! work items. Entries are charged their caller-reported byte size;
//! inserting past capacity evicts from the least-recently-used end.
//! A background sweep evicts entries untouched for longer than the
//! staleness threshold.
//!
//! The implementation is a mutex-guarded hash index over a slab-backed
//! doubly-linked recency list. No per-entry allocation beyond the slab
//! slot, and every operation is O(1) except the sweep.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct Node<K, V> {
    key: K,
    value: V,
    size: usize,
    last_access: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

struct CacheInner<K, V> {
    index: HashMap<K, usize>,
    slab: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    /// Most recently used entry.
    head: Option<usize>,
    /// Least recently used entry.
    tail: Option<usize>,
    total_size: usize,
}

/// Thread-safe LRU cache bounded by a total byte size.
pub struct BoundedCache<K, V> {
    inner: Mutex<CacheInner<K, V>>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V: Clone> BoundedCache<K, V> {
    /// Create a cache with the given byte capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. A zero-capacity cache is a
    /// configuration bug, not a runtime condition.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be positive");
        Self {
            inner: Mutex::new(CacheInner {
                index: HashMap::new(),
                slab: Vec::new(),
                free: Vec::new(),
                head: None,
                tail: None,
                total_size: 0,
            }),
            capacity,
        }
    }

    /// Insert or replace an entry, charging it `size` bytes.
    ///
    /// Entries at or above 75% of capacity are rejected outright: they
    /// would flush most of the cache for a single instance. Returns
    /// whether the entry was stored.
    pub fn put(&self, key: K, value: V, size: usize) -> bool {
        // size * 4 >= capacity * 3  <=>  size >= 75% of capacity
        if size * 4 >= self.capacity * 3 {
            warn!(size, capacity = self.capacity, "rejecting oversized cache entry");
            return false;
        }

        let mut inner = self.lock();
        if let Some(&idx) = inner.index.get(&key) {
            inner.unlink(idx);
            inner.release(idx);
        }

        while inner.total_size + size > self.capacity {
            let Some(tail) = inner.tail else { break };
            inner.unlink(tail);
            inner.release_indexed(tail);
        }

        let node = Node {
            key: key.clone(),
            value,
            size,
            last_access: Instant::now(),
            prev: None,
            next: None,
        };
        let idx = inner.allocate(node);
        inner.index.insert(key, idx);
        inner.link_front(idx);
        inner.total_size += size;
        true
    }

    /// Look up an entry, refreshing its recency and access time.
    pub fn try_get(&self, key: &K) -> Option<V> {
        self.try_get_with_size(key).map(|(value, _)| value)
    }

    /// Look up an entry together with its charged size.
    pub fn try_get_with_size(&self, key: &K) -> Option<(V, usize)> {
        let mut inner = self.lock();
        let idx = *inner.index.get(key)?;
        inner.unlink(idx);
        inner.link_front(idx);
        let node = inner.slab[idx].as_mut()?;
        node.last_access = Instant::now();
        Some((node.value.clone(), node.size))
    }

    /// Whether an entry exists, without refreshing its recency.
    pub fn contains_key(&self, key: &K) -> bool {
        self.lock().index.contains_key(key)
    }

    /// Remove an entry, returning its value if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let idx = inner.index.remove(key)?;
        inner.unlink(idx);
        let node = inner.take(idx)?;
        inner.total_size -= node.size;
        Some(node.value)
    }

    /// Evict entries untouched for longer than `threshold`.
    ///
    /// The recency list is ordered by access time, so the walk starts at
    /// the least-recently-used end and stops at the first fresh entry.
    /// Returns the number of evicted entries.
    pub fn sweep_stale(&self, threshold: Duration) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let mut evicted = 0;

        while let Some(tail) = inner.tail {
            let stale = inner.slab[tail]
                .as_ref()
                .is_some_and(|node| is_stale(node.last_access, now, threshold));
            if !stale {
                break;
            }
            inner.unlink(tail);
            inner.release_indexed(tail);
            evicted += 1;
        }

        if evicted > 0 {
            debug!(evicted, "cache staleness sweep evicted entries");
        }
        evicted
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().index.is_empty()
    }

    /// Total charged bytes.
    pub fn total_size(&self) -> usize {
        self.lock().total_size
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner<K, V>> {
        // The mutex is only held for short, non-panicking sections;
        // recover the guard if a poisoned lock ever surfaces.
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl<K: Hash + Eq + Clone, V: Clone + Send + 'static> BoundedCache<K, V>
where
    K: Send + 'static,
{
    /// Run the periodic staleness sweep until cancelled.
    ///
    /// # Panics
    ///
    /// Panics if `period` or `threshold` is zero.
    pub async fn run_sweeper(
        self: std::sync::Arc<Self>,
        period: Duration,
        threshold: Duration,
        cancel: CancellationToken,
    ) {
        assert!(!period.is_zero(), "sweep period must be positive");
        assert!(!threshold.is_zero(), "staleness threshold must be positive");

        debug!(period_ms = period.as_millis() as u64, "cache sweeper started");
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("cache sweeper cancelled");
                    break;
                }

                _ = tokio::time::sleep(period) => {
                    self.sweep_stale(threshold);
                }
            }
        }
    }
}

/// An entry untouched for exactly the threshold is already stale.
fn is_stale(last_access: Instant, now: Instant, threshold: Duration) -> bool {
    now.duration_since(last_access) >= threshold
}

impl<K, V> CacheInner<K, V> {
    fn allocate(&mut self, node: Node<K, V>) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slab[idx] = Some(node);
            idx
        } else {
            self.slab.push(Some(node));
            self.slab.len() - 1
        }
    }

    fn take(&mut self, idx: usize) -> Option<Node<K, V>> {
        let node = self.slab[idx].take();
        if node.is_some() {
            self.free.push(idx);
        }
        node
    }

    /// Detach a node from the recency list without freeing its slot.
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slab[idx].as_ref() {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.slab[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.slab[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(node) = self.slab[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    /// Attach a detached node at the most-recently-used end.
    fn link_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.slab[idx].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head
            && let Some(node) = self.slab[h].as_mut()
        {
            node.prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    /// Free an unlinked node's slot and drop it from the index and size
    /// accounting.
    fn release(&mut self, idx: usize)
    where
        K: Hash + Eq,
    {
        if let Some(node) = self.take(idx) {
            self.total_size -= node.size;
        }
    }

    /// Like `release`, but also removes the node's key from the index.
    fn release_indexed(&mut self, idx: usize)
    where
        K: Hash + Eq,
    {
        if let Some(node) = self.take(idx) {
            self.total_size -= node.size;
            self.index.remove(&node.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn lru_eviction_on_capacity() {
        let cache = BoundedCache::new(100);
        assert!(cache.put("a", 1, 40));
        assert!(cache.put("b", 2, 40));

        // Touch "a" so "b" becomes least recently used.
        assert_eq!(cache.try_get(&"a"), Some(1));

        // Inserting 40 more bytes must evict "b", not "a".
        assert!(cache.put("c", 3, 40));
        assert_eq!(cache.try_get(&"a"), Some(1));
        assert_eq!(cache.try_get(&"b"), None);
        assert_eq!(cache.try_get(&"c"), Some(3));
        assert!(cache.total_size() <= 100);
    }

    #[test]
    fn evicts_multiple_entries_to_fit() {
        let cache = BoundedCache::new(100);
        cache.put("a", 1, 30);
        cache.put("b", 2, 30);
        cache.put("c", 3, 30);

        assert!(cache.put("d", 4, 70));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains_key(&"d"));
        assert!(cache.contains_key(&"c"));
        assert_eq!(cache.total_size(), 100);
    }

    #[test]
    fn oversized_entry_rejected_at_75_percent() {
        let cache = BoundedCache::new(100);
        // 75 * 4 >= 100 * 3 holds, so exactly 75% is rejected.
        assert!(!cache.put("big", 1, 75));
        assert!(cache.is_empty());

        // Just under the threshold is accepted.
        assert!(cache.put("ok", 2, 74));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn replace_updates_size_accounting() {
        let cache = BoundedCache::new(100);
        cache.put("a", 1, 60);
        cache.put("a", 2, 20);
        assert_eq!(cache.total_size(), 20);
        assert_eq!(cache.try_get(&"a"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_returns_value_and_releases_size() {
        let cache = BoundedCache::new(100);
        cache.put("a", 7, 50);
        assert_eq!(cache.remove(&"a"), Some(7));
        assert_eq!(cache.remove(&"a"), None);
        assert_eq!(cache.total_size(), 0);
    }

    #[test]
    fn staleness_sweep_evicts_only_stale_entries() {
        let cache = BoundedCache::new(1000);
        cache.put("old", 1, 10);
        std::thread::sleep(Duration::from_millis(30));
        cache.put("fresh", 2, 10);

        let evicted = cache.sweep_stale(Duration::from_millis(20));
        assert_eq!(evicted, 1);
        assert!(!cache.contains_key(&"old"));
        assert!(cache.contains_key(&"fresh"));
    }

    #[test]
    fn staleness_boundary_is_inclusive() {
        let threshold = Duration::from_secs(300);
        let accessed = Instant::now();

        assert!(is_stale(accessed, accessed + threshold, threshold));
        assert!(is_stale(
            accessed,
            accessed + threshold + Duration::from_nanos(1),
            threshold
        ));
        assert!(!is_stale(
            accessed,
            accessed + threshold - Duration::from_nanos(1),
            threshold
        ));
    }

    #[test]
    fn get_refreshes_staleness_clock() {
        let cache = BoundedCache::new(1000);
        cache.put("a", 1, 10);
        std::thread::sleep(Duration::from_millis(30));

        // The read renews the access time, so the sweep keeps the entry.
        assert_eq!(cache.try_get(&"a"), Some(1));
        assert_eq!(cache.sweep_stale(Duration::from_millis(20)), 0);
        assert!(cache.contains_key(&"a"));
    }

    #[test]
    fn contains_key_does_not_refresh_recency() {
        let cache = BoundedCache::new(80);
        cache.put("a", 1, 40);
        cache.put("b", 2, 40);

        // A contains_key probe must not rescue "a" from eviction.
        assert!(cache.contains_key(&"a"));
        cache.put("c", 3, 40);
        assert!(!cache.contains_key(&"a"));
        assert!(cache.contains_key(&"b"));
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn zero_capacity_panics() {
        let _ = BoundedCache::<&str, u32>::new(0);
    }

    #[test]
    fn try_get_with_size_reports_charged_size() {
        let cache = BoundedCache::new(100);
        cache.put("a", 5, 33);
        assert_eq!(cache.try_get_with_size(&"a"), Some((5, 33)));
    }

    #[tokio::test]
    async fn sweeper_task_runs_and_cancels() {
        let cache = Arc::new(BoundedCache::new(1000));
        cache.put("old".to_string(), 1u32, 10);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&cache).run_sweeper(
            Duration::from_millis(10),
            Duration::from_millis(5),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
