//! Concurrent map with heap-pressure-driven eviction.
//!
//! A [`EvictionMap`] is a concurrent hash table threaded with a
//! doubly-linked ring that records eviction order. Capacity is not an entry
//! count: the map watches a [`HeapSampler`] and starts evicting when used
//! heap crosses a configured percentage of the maximum, shrinking to 90% of
//! the entry count it observed when the eviction run started.
//!
//! The overflow probe is rate-limited to one memory sample per 500ms, and a
//! single thread (winner of the `evicting` flag) runs an eviction pass at a
//! time, so heap pressure relief is eventual rather than immediate:
//! allocation bursts may briefly exceed the threshold.

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::heap::HeapSampler;
use crate::cache::ring::{CacheNode, Ring};
use crate::cache::{CacheConfig, EvictionListener, EvictionPolicy};

/// Minimum spacing between two heap samples.
const OVERFLOW_PROBE_INTERVAL_MS: u64 = 500;

/// A concurrent hash table with FIFO / second-chance / LRU eviction
/// triggered by heap pressure.
pub struct EvictionMap<K, V> {
    /// The map's name, used for logging
    name: String,

    /// Replacement policy applied on overflow
    policy: EvictionPolicy,

    /// Key to node mapping
    data: DashMap<K, Arc<CacheNode<K, V>>>,

    /// Eviction-order ring behind the single link-lock
    ring: Mutex<Ring<K, V>>,

    /// Entry count; transiently negative under racing removals
    length: AtomicIsize,

    /// Percentage of max heap at which eviction starts
    heap_percentage: AtomicU32,

    /// Heap occupancy probe
    sampler: Arc<dyn HeapSampler>,

    /// Notified after each eviction; must be fast and non-reentrant
    listener: Option<EvictionListener<K, V>>,

    /// Guards against concurrent eviction runs
    evicting: AtomicBool,

    /// Last overflow probe, in ms since `origin`
    last_probe_ms: AtomicU64,

    origin: Instant,
}

impl<K, V> EvictionMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    /// Creates a map with the given policy and heap threshold.
    pub fn new(config: CacheConfig, sampler: Arc<dyn HeapSampler>) -> Self {
        Self::build(config, sampler, None)
    }

    /// Creates a map notifying `listener` after each eviction.
    pub fn with_listener(
        config: CacheConfig,
        sampler: Arc<dyn HeapSampler>,
        listener: EvictionListener<K, V>,
    ) -> Self {
        Self::build(config, sampler, Some(listener))
    }

    fn build(
        config: CacheConfig,
        sampler: Arc<dyn HeapSampler>,
        listener: Option<EvictionListener<K, V>>,
    ) -> Self {
        Self {
            name: config.name,
            policy: config.policy,
            data: DashMap::new(),
            ring: Mutex::new(Ring::new()),
            length: AtomicIsize::new(0),
            heap_percentage: AtomicU32::new(config.heap_percentage),
            sampler,
            listener,
            evicting: AtomicBool::new(false),
            last_probe_ms: AtomicU64::new(0),
            origin: Instant::now(),
        }
    }

    /// Number of entries currently mapped.
    pub fn len(&self) -> usize {
        self.length.load(Ordering::Relaxed).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The heap percentage at which eviction starts.
    pub fn heap_percentage(&self) -> u32 {
        self.heap_percentage.load(Ordering::Relaxed)
    }

    /// Updates the eviction threshold and eagerly evicts down to it.
    pub fn set_heap_percentage(&self, percentage: u32) {
        self.heap_percentage.store(percentage, Ordering::Relaxed);
        self.evict();
    }

    /// Looks up `key`, counting the hit as an access for the policy.
    pub fn get(&self, key: &K) -> Option<V> {
        self.evict();
        let node = self.data.get(key).map(|entry| Arc::clone(entry.value()))?;
        self.on_access(&node);
        Some(node.value())
    }

    /// Inserts or replaces, returning the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let node = Arc::new(CacheNode::new(key, value.clone()));
        self.put_if_absent_node(node).map(|old| old.set_value(value))
    }

    /// Inserts unless present, returning the existing value on a hit.
    pub fn put_if_absent(&self, key: K, value: V) -> Option<V> {
        let node = Arc::new(CacheNode::new(key, value));
        self.put_if_absent_node(node).map(|old| old.value())
    }

    fn put_if_absent_node(&self, node: Arc<CacheNode<K, V>>) -> Option<Arc<CacheNode<K, V>>> {
        self.evict();
        let existing = match self.data.entry(node.key.clone()) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&node));
                None
            }
        };
        match existing {
            Some(old) => {
                self.on_access(&old);
                Some(old)
            }
            None => {
                self.length.fetch_add(1, Ordering::Relaxed);
                self.ring.lock().append_to_tail(&node);
                None
            }
        }
    }

    /// Removes `key`, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        let (_, node) = self.data.remove(key)?;
        self.length.fetch_sub(1, Ordering::Relaxed);
        self.unlink_node(&node);
        Some(node.value())
    }

    /// Removes `key` only while it still maps to `value`.
    pub fn remove_entry(&self, key: &K, value: &V) -> bool
    where
        V: PartialEq,
    {
        let Some(node) = self.data.get(key).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        if node.value() != *value {
            return false;
        }
        if self
            .data
            .remove_if(key, |_, mapped| Arc::ptr_eq(mapped, &node))
            .is_some()
        {
            self.length.fetch_sub(1, Ordering::Relaxed);
            self.unlink_node(&node);
            true
        } else {
            false
        }
    }

    /// Replaces the value of an existing key, returning the old value.
    pub fn replace(&self, key: &K, value: V) -> Option<V> {
        let node = self.data.get(key).map(|entry| Arc::clone(entry.value()))?;
        Some(node.set_value(value))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.data.contains_key(key)
    }

    /// Whether any entry holds `value`; a hit counts as an access.
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        let mut found = None;
        for entry in self.data.iter() {
            if entry.value().value() == *value {
                found = Some(Arc::clone(entry.value()));
                break;
            }
        }
        match found {
            Some(node) => {
                self.on_access(&node);
                true
            }
            None => false,
        }
    }

    /// A snapshot of the currently mapped keys.
    pub fn keys(&self) -> Vec<K> {
        self.data.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        for key in self.keys() {
            let _ = self.remove(&key);
        }
    }

    /// Determines whether used heap has crossed the eviction threshold.
    ///
    /// Probes at most once per [`OVERFLOW_PROBE_INTERVAL_MS`]; calls inside
    /// the interval report no overflow without sampling memory.
    fn is_overflow(&self) -> bool {
        let now_ms = self.origin.elapsed().as_millis() as u64;
        let last = self.last_probe_ms.load(Ordering::Relaxed);
        if now_ms < last + OVERFLOW_PROBE_INTERVAL_MS {
            return false;
        }
        let _ = self
            .last_probe_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed);

        let max = self.sampler.max_bytes();
        let trigger =
            (max as u128 * self.heap_percentage.load(Ordering::Relaxed) as u128 / 100) as u64;
        let used = self.sampler.used_bytes();
        let overflow = used > trigger;
        if overflow {
            debug!(
                cache = %self.name,
                used_mb = used / 1024 / 1024,
                trigger_mb = trigger / 1024 / 1024,
                max_mb = max / 1024 / 1024,
                "heap threshold exceeded"
            );
        }
        overflow
    }

    /// Evicts entries while the map is over its heap threshold.
    ///
    /// Only one thread runs the pass; concurrent callers skip. The pass
    /// walks the ring from the head, offering each node to the policy, and
    /// stops once the entry count drops below 90% of what it was when the
    /// pass started, or the ring empties.
    fn evict(&self) {
        if !self.is_overflow() || self.len() == 0 {
            return;
        }
        if self
            .evicting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let starting = self.len();
        let start = Instant::now();

        loop {
            let head = { self.ring.lock().head() };
            let Some(node) = head else { break };

            if self.offer(&node) {
                // Remove only if the key still maps to this exact node
                let removed = self
                    .data
                    .remove_if(&node.key, |_, mapped| Arc::ptr_eq(mapped, &node))
                    .is_some();
                if removed {
                    self.length.fetch_sub(1, Ordering::Relaxed);
                    self.unlink_node(&node);
                    if let Some(listener) = &self.listener {
                        listener(&node.key, &node.value());
                    }
                }
            }

            if (self.len() as f64) < starting as f64 * 0.9 {
                break;
            }
        }

        self.evicting.store(false, Ordering::Release);
        debug!(
            cache = %self.name,
            size = self.len(),
            removed = starting.saturating_sub(self.len()),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "eviction finished"
        );
    }

    /// Splices a node out of the ring, waiting out a racing append.
    ///
    /// Must only be called by the thread that won the map removal for this
    /// node; the node is then guaranteed to be linked or about to be.
    fn unlink_node(&self, node: &Arc<CacheNode<K, V>>) {
        loop {
            if node.is_unlinked() {
                std::hint::spin_loop();
                continue;
            }
            let mut ring = self.ring.lock();
            if node.is_unlinked() {
                continue;
            }
            ring.unlink(node);
            return;
        }
    }

    fn on_access(&self, node: &Arc<CacheNode<K, V>>) {
        match self.policy {
            EvictionPolicy::Fifo => {}
            EvictionPolicy::SecondChance => node.set_marked(true),
            EvictionPolicy::Lru => self.ring.lock().move_to_tail(node),
        }
    }

    /// Asks the policy whether the ring head should be evicted.
    fn offer(&self, node: &Arc<CacheNode<K, V>>) -> bool {
        match self.policy {
            EvictionPolicy::Fifo | EvictionPolicy::Lru => true,
            EvictionPolicy::SecondChance => {
                if node.is_marked() {
                    node.set_marked(false);
                    self.ring.lock().move_to_tail(node);
                    false
                } else {
                    true
                }
            }
        }
    }
}
