//! The doubly-linked ring threaded through the eviction map.
//!
//! Nodes live simultaneously in the concurrent map (by key) and on this
//! ring (in eviction order, anchored at a sentinel). The ring is an arena
//! of integer-handle slots owned by the map's single link-lock; a node
//! holds its slot handle in an atomic, with the distinguished [`UNLINKED`]
//! value covering both the window between map insertion and append-to-tail
//! and the state after removal. The only mutator of slot links is the
//! holder of the link-lock; the handle atomic is what racing removers
//! observe.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Slot handle marking a node that is not on the ring.
pub(crate) const UNLINKED: usize = usize::MAX;

/// Handle of the sentinel slot.
const SENTINEL: usize = 0;

/// A map entry that is also a ring member.
pub(crate) struct CacheNode<K, V> {
    pub(crate) key: K,
    value: RwLock<V>,
    marked: AtomicBool,
    slot: AtomicUsize,
}

impl<K, V: Clone> CacheNode<K, V> {
    pub(crate) fn new(key: K, value: V) -> Self {
        Self {
            key,
            value: RwLock::new(value),
            marked: AtomicBool::new(false),
            slot: AtomicUsize::new(UNLINKED),
        }
    }

    pub(crate) fn value(&self) -> V {
        self.value.read().clone()
    }

    /// Swaps in a new value, returning the old one.
    pub(crate) fn set_value(&self, value: V) -> V {
        std::mem::replace(&mut *self.value.write(), value)
    }

    pub(crate) fn is_marked(&self) -> bool {
        self.marked.load(Ordering::Relaxed)
    }

    pub(crate) fn set_marked(&self, marked: bool) {
        self.marked.store(marked, Ordering::Relaxed);
    }

    /// Whether the node is currently off the ring.
    pub(crate) fn is_unlinked(&self) -> bool {
        self.slot.load(Ordering::Acquire) == UNLINKED
    }
}

struct RingSlot<K, V> {
    prev: usize,
    next: usize,
    node: Option<Arc<CacheNode<K, V>>>,
}

/// Sentinel-anchored eviction order; all access goes through the link-lock.
pub(crate) struct Ring<K, V> {
    slots: Vec<RingSlot<K, V>>,
    free: Vec<usize>,
}

impl<K, V> Ring<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: vec![RingSlot {
                prev: SENTINEL,
                next: SENTINEL,
                node: None,
            }],
            free: Vec::new(),
        }
    }

    /// The node at the head of the eviction order, if any.
    pub(crate) fn head(&self) -> Option<Arc<CacheNode<K, V>>> {
        let first = self.slots[SENTINEL].next;
        if first == SENTINEL {
            None
        } else {
            self.slots[first].node.clone()
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots[SENTINEL].next == SENTINEL
    }

    fn alloc(&mut self, slot: RingSlot<K, V>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                idx
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        }
    }

    /// Splices `node` in before the sentinel and publishes its handle.
    pub(crate) fn append_to_tail(&mut self, node: &Arc<CacheNode<K, V>>) {
        let tail = self.slots[SENTINEL].prev;
        let idx = self.alloc(RingSlot {
            prev: tail,
            next: SENTINEL,
            node: Some(Arc::clone(node)),
        });
        self.slots[tail].next = idx;
        self.slots[SENTINEL].prev = idx;
        node.slot.store(idx, Ordering::Release);
    }

    /// Splices `node` out, freeing its slot. Returns false when the node is
    /// not on the ring.
    pub(crate) fn unlink(&mut self, node: &Arc<CacheNode<K, V>>) -> bool {
        let idx = node.slot.load(Ordering::Acquire);
        if idx == UNLINKED {
            return false;
        }
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
        self.slots[idx].node = None;
        self.free.push(idx);
        node.slot.store(UNLINKED, Ordering::Release);
        true
    }

    /// Moves `node` to the tail; no-ops when already there or unlinked.
    pub(crate) fn move_to_tail(&mut self, node: &Arc<CacheNode<K, V>>) {
        let idx = node.slot.load(Ordering::Acquire);
        if idx == UNLINKED || self.slots[idx].next == SENTINEL {
            return;
        }
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        self.slots[prev].next = next;
        self.slots[next].prev = prev;

        let tail = self.slots[SENTINEL].prev;
        self.slots[idx].prev = tail;
        self.slots[idx].next = SENTINEL;
        self.slots[tail].next = idx;
        self.slots[SENTINEL].prev = idx;
    }
}
