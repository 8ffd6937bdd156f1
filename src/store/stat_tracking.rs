//! Statistics-tracking store wrapper.
//!
//! Wraps any store and times every call on the monotonic clock. Successful
//! calls record into the matching operation kind; failed calls record under
//! `Exception`, with obsolete-version failures additionally counted under
//! `Obsolete`. Errors always propagate unchanged.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use crate::stats::{StoreStats, Tracked};
use crate::store::{
    Capability, CapabilityTag, MatchType, Store, StoreError, StoreResult,
};
use crate::versioning::{Version, Versioned};

/// A store wrapper feeding per-operation statistics to a registry.
pub struct StatTrackingStore<S> {
    inner: S,
    stats: Arc<StoreStats>,
}

impl<S> StatTrackingStore<S> {
    /// Wraps `inner`, optionally aggregating into a `parent` registry.
    pub fn new(inner: S, parent: Option<Arc<StoreStats>>) -> Self {
        Self {
            inner,
            stats: Arc::new(StoreStats::with_parent(parent)),
        }
    }

    /// The registry this wrapper records into.
    pub fn stats(&self) -> Arc<StoreStats> {
        Arc::clone(&self.stats)
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn timed<T>(&self, op: Tracked, call: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
        let start = Instant::now();
        let result = call();
        let elapsed_ns = start.elapsed().as_nanos() as u64;

        match &result {
            Ok(_) => self.stats.record_time(op, elapsed_ns),
            Err(err) => {
                if matches!(err, StoreError::ObsoleteVersion { .. }) {
                    self.stats.record_time(Tracked::Obsolete, elapsed_ns);
                }
                self.stats.record_time(Tracked::Exception, elapsed_ns);
            }
        }
        result
    }
}

impl<K, V, C, S> Store<K, V, C> for StatTrackingStore<S>
where
    K: Eq + Hash,
    C: Version,
    S: Store<K, V, C>,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get(&self, key: &K) -> StoreResult<Vec<Versioned<V, C>>> {
        self.timed(Tracked::Get, || self.inner.get(key))
    }

    fn get_all(&self, keys: &[K]) -> StoreResult<HashMap<K, Vec<Versioned<V, C>>>> {
        self.timed(Tracked::GetAll, || self.inner.get_all(keys))
    }

    fn put(&self, key: &K, value: Versioned<V, C>) -> StoreResult<()> {
        self.timed(Tracked::Put, || self.inner.put(key, value))
    }

    fn delete(&self, key: &K, version: Option<&C>) -> StoreResult<bool> {
        self.timed(Tracked::Delete, || self.inner.delete(key, version))
    }

    fn delete_all(&self, keys: &HashMap<K, Option<C>>) -> StoreResult<bool> {
        self.timed(Tracked::DeleteAll, || self.inner.delete_all(keys))
    }

    fn delete_matching(&self, match_type: MatchType, expression: &str) -> StoreResult<bool> {
        self.timed(Tracked::DeleteAll, || {
            self.inner.delete_matching(match_type, expression)
        })
    }

    fn capability(&self, tag: CapabilityTag) -> StoreResult<Capability> {
        self.inner.capability(tag)
    }
}
