//! Logging store wrapper.
//!
//! Logs every operation with its elapsed time and outcome at `debug` level,
//! then hands the result through untouched.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

use tracing::debug;

use crate::store::{Capability, CapabilityTag, MatchType, Store, StoreResult};
use crate::versioning::{Version, Versioned};

/// A store wrapper tracing each call.
pub struct LoggingStore<S> {
    inner: S,
}

impl<S> LoggingStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn logged<T>(&self, op: &str, name: &str, call: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
        let start = Instant::now();
        let result = call();
        debug!(
            store = name,
            op,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            success = result.is_ok(),
            "store operation"
        );
        result
    }
}

impl<K, V, C, S> Store<K, V, C> for LoggingStore<S>
where
    K: Eq + Hash,
    C: Version,
    S: Store<K, V, C>,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get(&self, key: &K) -> StoreResult<Vec<Versioned<V, C>>> {
        self.logged("get", self.inner.name(), || self.inner.get(key))
    }

    fn get_all(&self, keys: &[K]) -> StoreResult<HashMap<K, Vec<Versioned<V, C>>>> {
        self.logged("getAll", self.inner.name(), || self.inner.get_all(keys))
    }

    fn put(&self, key: &K, value: Versioned<V, C>) -> StoreResult<()> {
        self.logged("put", self.inner.name(), || self.inner.put(key, value))
    }

    fn delete(&self, key: &K, version: Option<&C>) -> StoreResult<bool> {
        self.logged("delete", self.inner.name(), || self.inner.delete(key, version))
    }

    fn delete_all(&self, keys: &HashMap<K, Option<C>>) -> StoreResult<bool> {
        self.logged("deleteAll", self.inner.name(), || self.inner.delete_all(keys))
    }

    fn delete_matching(&self, match_type: MatchType, expression: &str) -> StoreResult<bool> {
        self.logged("deleteMatching", self.inner.name(), || {
            self.inner.delete_matching(match_type, expression)
        })
    }

    fn capability(&self, tag: CapabilityTag) -> StoreResult<Capability> {
        self.inner.capability(tag)
    }
}
