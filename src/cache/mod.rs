//! Heap-pressure-driven eviction cache.
//!
//! The cache module provides a concurrent map whose capacity is a live
//! reading of process heap utilisation rather than a fixed entry count:
//!
//! 1. **Eviction map**: hash table threaded with a doubly-linked ring
//! 2. **Policies**: FIFO, second-chance, and LRU replacement
//! 3. **Heap probe**: pluggable `(max, free)` sampler with a rate-limited
//!    overflow check
//!
//! Eviction shrinks the map to 90% of the entry count observed when the
//! threshold was crossed; it is an entry-count target, not a memory target,
//! so relief of heap pressure is eventual by design.

pub mod heap;
pub mod map;
mod ring;

pub use heap::{HeapSampler, StaticHeapSampler, SystemHeapSampler};
pub use map::EvictionMap;

/// Replacement policy applied when the map overflows its heap threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Evicts in insertion order. Cheapest to maintain: accesses leave the
    /// ring untouched.
    Fifo,

    /// FIFO that spares entries accessed since they last reached the head:
    /// a marked entry is moved to the tail with its mark cleared instead of
    /// being evicted. Degrades to FIFO when everything is marked.
    SecondChance,

    /// Evicts the least recently used entry. Every access moves the entry
    /// to the tail, which costs a pass through the link-lock.
    Lru,
}

/// Callback invoked after an entry has been evicted.
///
/// Runs on the evicting thread with no locks held; it must be fast and must
/// not call back into the map.
pub type EvictionListener<K, V> = Box<dyn Fn(&K, &V) + Send + Sync>;

/// Configuration for an [`EvictionMap`].
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Name of the map, used for logging.
    pub name: String,

    /// Replacement policy applied on overflow.
    pub policy: EvictionPolicy,

    /// Percentage of the maximum heap at which eviction starts. Not a hard
    /// cap: entries are evicted down to 90% of the entry count observed
    /// when the threshold was crossed.
    pub heap_percentage: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "cache".to_string(),
            policy: EvictionPolicy::SecondChance,
            heap_percentage: 80,
        }
    }
}
