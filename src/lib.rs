//! # veld: versioned in-memory storage core
//!
//! veld is the local, per-node storage stack of a distributed versioned
//! key-value store. It provides three tightly-coupled subsystems:
//!
//! - **Versioned engine**: an in-memory store keeping every causally
//!   concurrent version of a key, with optimistic vector-clock conflict
//!   detection on writes
//! - **Eviction cache**: a concurrent hash map threaded with a doubly-linked
//!   ring offering FIFO / second-chance / LRU replacement, triggered by live
//!   heap pressure rather than a fixed entry count
//! - **Request statistics**: sliding-window counters exposing per-operation
//!   count, throughput, and mean latency
//!
//! Network transport, replication, and persistence live elsewhere in the
//! system; this crate is the piece every node runs locally.
//!
//! # Usage
//!
//! ```
//! use veld::store::{MemoryStore, Store};
//! use veld::versioning::{VectorClock, Versioned};
//!
//! let store: MemoryStore<String, String> = MemoryStore::new("catalog");
//! let clock: VectorClock = [(1, 1)].into_iter().collect();
//! store.put(&"a".to_string(), Versioned::new("x".to_string(), clock)).unwrap();
//! assert_eq!(store.get(&"a".to_string()).unwrap().len(), 1);
//! ```

// Core modules
pub mod cache;
pub mod stats;
pub mod store;
pub mod versioning;

// Re-export main types at crate root for convenience
pub use cache::{CacheConfig, EvictionMap, EvictionPolicy, HeapSampler};
pub use stats::{StoreStats, Tracked};
pub use store::{MemoryStore, StatTrackingStore, Store, StoreError, StoreResult};
pub use versioning::{Occurred, VectorClock, Version, Versioned};
