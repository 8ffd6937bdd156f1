//! The versioned in-memory storage engine.
//!
//! Each key maps to the list of its causally concurrent versions. Writes run
//! an optimistic loop: fetch the key's list, lock it, re-check it is still
//! the mapped list (a concurrent delete may have unmapped it), then resolve
//! the new version against every existing one:
//!
//! - dominated by an existing version: the put is obsolete and fails
//! - dominates (or equals) an existing version: that version is superseded
//! - concurrent with everything: the new version joins the list
//!
//! Two invariants hold at all times: a mapped key never points at an empty
//! list, and versions co-present in a list are pairwise concurrent.
//!
//! Lock discipline: a map-shard guard is never held across a list-lock
//! acquisition (the `Arc` is cloned and the guard dropped first). The list
//! lock may be held while touching the map, which gives the engine a single
//! lock ordering.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tracing::{debug, error, warn};

use crate::store::{
    Capability, CapabilityTag, ClosableIterator, ExpressionEvaluator, KeySerializer, MatchType,
    StorageEngine, Store, StoreError, StoreResult,
};
use crate::versioning::{Occurred, VectorClock, Version, Versioned};

/// A key's versions, locked independently of every other key.
type VersionList<V, C> = Arc<Mutex<Vec<Versioned<V, C>>>>;

/// A non-persistent, version-aware store keeping every concurrent version
/// of a key.
pub struct MemoryStore<K, V, C = VectorClock> {
    /// The store's name, used for logging
    name: String,

    /// Key to version-list mapping
    map: DashMap<K, VersionList<V, C>>,

    /// Serializer consumed by expression-based deletion
    key_serializer: RwLock<Option<Arc<dyn KeySerializer>>>,

    /// External predicate engine for expression deletes
    evaluator: RwLock<Option<Arc<dyn ExpressionEvaluator>>>,
}

impl<K, V, C> MemoryStore<K, V, C>
where
    K: Eq + Hash + Clone + AsRef<[u8]> + Send + Sync,
    V: Clone + Send + Sync,
    C: Version,
{
    /// Creates an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            map: DashMap::new(),
            key_serializer: RwLock::new(None),
            evaluator: RwLock::new(None),
        }
    }

    /// Registers the serializer backing expression-based deletion.
    pub fn set_key_serializer(&self, serializer: Arc<dyn KeySerializer>) {
        *self.key_serializer.write() = Some(serializer);
    }

    /// Registers the predicate engine backing [`MatchType::Expression`].
    pub fn set_expression_evaluator(&self, evaluator: Arc<dyn ExpressionEvaluator>) {
        *self.evaluator.write() = Some(evaluator);
    }

    /// Number of keys currently mapped.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn assert_valid_key(&self, key: &K) -> StoreResult<()> {
        if key.as_ref().is_empty() {
            return Err(StoreError::InvalidKey);
        }
        Ok(())
    }

    /// Fetches the live list for `key` without holding a shard guard.
    fn list_for(&self, key: &K) -> Option<VersionList<V, C>> {
        self.map.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn key_snapshot(&self) -> Vec<K> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Deletes every key whose string form satisfies `pred`, returning the
    /// number of matches. Keys the serializer cannot render are skipped.
    fn delete_where<F>(&self, serializer: &dyn KeySerializer, pred: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut matched = 0;
        for key in self.key_snapshot() {
            let form = match serializer.to_string_form(key.as_ref()) {
                Ok(form) => form,
                Err(err) => {
                    warn!(store = %self.name, %err, "skipping key with unreadable string form");
                    continue;
                }
            };
            if pred(&form) {
                let _ = self.map.remove(&key);
                matched += 1;
            }
        }
        matched
    }
}

impl<K, V, C> Store<K, V, C> for MemoryStore<K, V, C>
where
    K: Eq + Hash + Clone + AsRef<[u8]> + Send + Sync,
    V: Clone + Send + Sync,
    C: Version,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &K) -> StoreResult<Vec<Versioned<V, C>>> {
        self.assert_valid_key(key)?;
        let Some(list) = self.list_for(key) else {
            return Ok(Vec::new());
        };
        let items = list.lock();
        Ok(items.clone())
    }

    fn get_all(&self, keys: &[K]) -> StoreResult<HashMap<K, Vec<Versioned<V, C>>>> {
        for key in keys {
            self.assert_valid_key(key)?;
        }
        let mut result = HashMap::new();
        for key in keys {
            let versions = self.get(key)?;
            if !versions.is_empty() {
                result.insert(key.clone(), versions);
            }
        }
        Ok(result)
    }

    fn put(&self, key: &K, value: Versioned<V, C>) -> StoreResult<()> {
        self.assert_valid_key(key)?;

        loop {
            let Some(list) = self.list_for(key) else {
                // No list yet: optimistically try to map a fresh one
                let fresh = Arc::new(Mutex::new(vec![value.clone()]));
                match self.map.entry(key.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(fresh);
                        return Ok(());
                    }
                    Entry::Occupied(_) => continue,
                }
            };

            let mut items = list.lock();

            // If this check fails the list was unmapped by a concurrent
            // delete, so we retry against whatever replaced it.
            let still_mapped = self
                .map
                .get(key)
                .map(|entry| Arc::ptr_eq(entry.value(), &list))
                .unwrap_or(false);
            if !still_mapped {
                drop(items);
                continue;
            }

            let mut retained = Vec::with_capacity(items.len() + 1);
            for existing in items.iter() {
                match value.version.compare(&existing.version) {
                    Occurred::Before => {
                        return Err(StoreError::ObsoleteVersion {
                            key: String::from_utf8_lossy(key.as_ref()).into_owned(),
                            version: format!("{:?}", value.version),
                        });
                    }
                    // Dominated and identical versions are superseded
                    Occurred::After | Occurred::Equal => {}
                    Occurred::Concurrent => retained.push(existing.clone()),
                }
            }
            retained.push(value);
            *items = retained;
            return Ok(());
        }
    }

    fn delete(&self, key: &K, version: Option<&C>) -> StoreResult<bool> {
        self.assert_valid_key(key)?;

        let Some(version) = version else {
            return Ok(self.map.remove(key).is_some());
        };

        let Some(list) = self.list_for(key) else {
            return Ok(false);
        };

        let mut items = list.lock();
        let before = items.len();
        items.retain(|item| item.version.compare(version) != Occurred::Before);
        let removed = items.len() < before;

        if items.is_empty() {
            // Losing this race means another delete unmapped the key first,
            // which is not an error.
            let _ = self
                .map
                .remove_if(key, |_, mapped| Arc::ptr_eq(mapped, &list));
        }
        Ok(removed)
    }

    fn delete_all(&self, keys: &HashMap<K, Option<C>>) -> StoreResult<bool> {
        for key in keys.keys() {
            self.assert_valid_key(key)?;
        }
        let mut removed = false;
        for (key, version) in keys {
            if self.delete(key, version.as_ref())? {
                removed = true;
            }
        }
        Ok(removed)
    }

    fn delete_matching(&self, match_type: MatchType, expression: &str) -> StoreResult<bool> {
        let serializer = self.key_serializer.read().clone().ok_or_else(|| {
            StoreError::Unsupported("expression deletion requires a key serializer".to_string())
        })?;

        let matched = match match_type {
            MatchType::StartsWith => {
                // Prefix matching works on raw key bytes, no string form
                let prefix = serializer.to_bytes(expression);
                let mut matched = 0;
                for key in self.key_snapshot() {
                    if key.as_ref().starts_with(&prefix) {
                        let _ = self.map.remove(&key);
                        matched += 1;
                    }
                }
                matched
            }
            MatchType::Contains => {
                self.delete_where(serializer.as_ref(), |form| form.contains(expression))
            }
            MatchType::EndsWith => {
                self.delete_where(serializer.as_ref(), |form| form.ends_with(expression))
            }
            MatchType::Regex => {
                let pattern = Regex::new(expression).map_err(|err| {
                    StoreError::Unsupported(format!("invalid regular expression: {}", err))
                })?;
                self.delete_where(serializer.as_ref(), |form| pattern.is_match(form))
            }
            MatchType::Expression => {
                let evaluator = self.evaluator.read().clone().ok_or_else(|| {
                    StoreError::Unsupported("no expression evaluator registered".to_string())
                })?;
                self.delete_where(serializer.as_ref(), |form| {
                    match evaluator.evaluate(expression, form) {
                        Ok(selected) => selected,
                        Err(err) => {
                            error!(store = %self.name, %err, "expression evaluation failed");
                            false
                        }
                    }
                })
            }
        };

        debug!(store = %self.name, ?match_type, matched, "bulk delete by expression");
        Ok(matched > 0)
    }

    fn capability(&self, tag: CapabilityTag) -> StoreResult<Capability> {
        match tag {
            CapabilityTag::KeySerializer => self
                .key_serializer
                .read()
                .clone()
                .map(Capability::KeySerializer)
                .ok_or(StoreError::NoSuchCapability(tag)),
            _ => Err(StoreError::NoSuchCapability(tag)),
        }
    }
}

impl<K, V, C> StorageEngine<K, V, C> for MemoryStore<K, V, C>
where
    K: Eq + Hash + Clone + AsRef<[u8]> + Send + Sync,
    V: Clone + Send + Sync,
    C: Version,
{
    fn entries(&self) -> Box<dyn ClosableIterator<Item = (K, Versioned<V, C>)> + '_> {
        Box::new(MemoryEntryIterator {
            map: &self.map,
            keys: self.key_snapshot().into_iter(),
            current_key: None,
            current: Vec::new().into_iter(),
        })
    }

    fn keys(&self) -> Box<dyn ClosableIterator<Item = K> + '_> {
        Box::new(MemoryKeyIterator {
            keys: self.key_snapshot().into_iter(),
        })
    }

    fn truncate(&self) {
        self.map.clear();
        debug!(store = %self.name, "truncated");
    }
}

/// Flattens keys into their versioned records.
///
/// Keys are a snapshot taken at creation; each key's versions are
/// snapshotted under the list lock when the iterator reaches that key, and
/// iterated outside the lock. Keys deleted or emptied in the meantime are
/// skipped.
pub struct MemoryEntryIterator<'a, K, V, C> {
    map: &'a DashMap<K, VersionList<V, C>>,
    keys: std::vec::IntoIter<K>,
    current_key: Option<K>,
    current: std::vec::IntoIter<Versioned<V, C>>,
}

impl<K, V, C> Iterator for MemoryEntryIterator<'_, K, V, C>
where
    K: Eq + Hash + Clone,
    V: Clone,
    C: Version,
{
    type Item = (K, Versioned<V, C>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.next() {
                if let Some(key) = &self.current_key {
                    return Some((key.clone(), item));
                }
            }

            let key = self.keys.next()?;
            let Some(list) = self.map.get(&key).map(|entry| Arc::clone(entry.value())) else {
                continue;
            };
            let snapshot = { list.lock().clone() };
            if snapshot.is_empty() {
                continue;
            }
            self.current_key = Some(key);
            self.current = snapshot.into_iter();
        }
    }
}

impl<K, V, C> ClosableIterator for MemoryEntryIterator<'_, K, V, C>
where
    K: Eq + Hash + Clone,
    V: Clone,
    C: Version,
{
    fn close(&mut self) {
        self.keys = Vec::new().into_iter();
        self.current = Vec::new().into_iter();
        self.current_key = None;
    }
}

/// Iterates a snapshot of the store's keys.
pub struct MemoryKeyIterator<K> {
    keys: std::vec::IntoIter<K>,
}

impl<K> Iterator for MemoryKeyIterator<K> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        self.keys.next()
    }
}

impl<K> ClosableIterator for MemoryKeyIterator<K> {
    fn close(&mut self) {
        self.keys = Vec::new().into_iter();
    }
}
