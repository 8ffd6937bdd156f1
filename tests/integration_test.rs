//! Integration tests for veld
//! Exercises the versioned engine, the wrappers, the eviction cache, and
//! the statistics core together, end to end.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use veld::cache::{CacheConfig, EvictionMap, EvictionPolicy, StaticHeapSampler};
use veld::stats::{RequestCounter, Tracked};
use veld::store::{
    EvaluationError, ExpressionEvaluator, MatchType, MemoryStore, StatTrackingStore, Store,
    StoreError, StoreResult, Utf8KeySerializer,
};
use veld::versioning::{VectorClock, Version, Versioned};

fn clock(entries: &[(u16, u64)]) -> VectorClock {
    entries.iter().copied().collect()
}

fn engine() -> MemoryStore<String, String> {
    MemoryStore::new("test")
}

fn put(store: &impl Store<String, String>, key: &str, value: &str, version: VectorClock) {
    store
        .put(&key.to_string(), Versioned::new(value.to_string(), version))
        .unwrap();
}

// ============================================================================
// Versioned engine, end to end
// ============================================================================

#[test]
fn test_obsolete_put_rejected() {
    let store = engine();

    put(&store, "a", "x", clock(&[(1, 1)]));
    let result = store.put(
        &"a".to_string(),
        Versioned::new("y".to_string(), clock(&[(1, 0)])),
    );
    assert!(matches!(result, Err(StoreError::ObsoleteVersion { .. })));

    let versions = store.get(&"a".to_string()).unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].value, "x");
    assert_eq!(versions[0].version, clock(&[(1, 1)]));
}

#[test]
fn test_concurrent_versions_coexist() {
    let store = engine();

    put(&store, "k", "v1", clock(&[(1, 1)]));
    put(&store, "k", "v2", clock(&[(2, 1)]));

    assert_eq!(store.get(&"k".to_string()).unwrap().len(), 2);
}

#[test]
fn test_version_scoped_delete_clears_dominated() {
    let store = engine();

    put(&store, "k", "v1", clock(&[(1, 1)]));
    put(&store, "k", "v2", clock(&[(2, 1)]));

    // Dominates both concurrent versions
    let removed = store
        .delete(&"k".to_string(), Some(&clock(&[(1, 1), (2, 1)])))
        .unwrap();

    assert!(removed);
    assert!(store.get(&"k".to_string()).unwrap().is_empty());
}

#[test]
fn test_round_trips() {
    let store = engine();

    put(&store, "a", "x", clock(&[(1, 1)]));
    assert_eq!(store.get(&"a".to_string()).unwrap().len(), 1);

    // Re-putting the identical version leaves the list contents unchanged
    put(&store, "a", "x", clock(&[(1, 1)]));
    assert_eq!(store.get(&"a".to_string()).unwrap().len(), 1);

    assert!(store.delete(&"a".to_string(), None).unwrap());
    assert!(store.get(&"a".to_string()).unwrap().is_empty());

    // Batch delete over absent keys reports nothing removed, without error
    let mut batch: HashMap<String, Option<VectorClock>> = HashMap::new();
    batch.insert("missing".to_string(), None);
    assert!(!store.delete_all(&batch).unwrap());
}

#[test]
fn test_get_all_omits_absent_keys() {
    let store = engine();

    put(&store, "a", "x", clock(&[(1, 1)]));
    put(&store, "b", "y", clock(&[(1, 1)]));

    let keys = vec!["a".to_string(), "b".to_string(), "missing".to_string()];
    let result = store.get_all(&keys).unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(result[&"a".to_string()][0].value, "x");
    assert!(!result.contains_key(&"missing".to_string()));
}

// ============================================================================
// Expression-based deletion
// ============================================================================

#[test]
fn test_expression_delete_starts_with() {
    let store = engine();
    store.set_key_serializer(Arc::new(Utf8KeySerializer));

    for name in ["foo", "foobar", "bar"] {
        put(&store, name, "v", clock(&[(1, 1)]));
    }

    assert!(store.delete_matching(MatchType::StartsWith, "foo").unwrap());
    assert!(store.get(&"foo".to_string()).unwrap().is_empty());
    assert!(store.get(&"foobar".to_string()).unwrap().is_empty());
    assert_eq!(store.get(&"bar".to_string()).unwrap().len(), 1);
}

#[test]
fn test_expression_delete_without_serializer_unsupported() {
    let store = engine();
    let result = store.delete_matching(MatchType::Contains, "foo");
    assert!(matches!(result, Err(StoreError::Unsupported(_))));
}

/// Evaluates only expressions of the form `key == 'literal'`.
struct EqualsEvaluator;

impl ExpressionEvaluator for EqualsEvaluator {
    fn evaluate(&self, expression: &str, key: &str) -> Result<bool, EvaluationError> {
        match expression.strip_prefix("key == ") {
            Some(literal) => Ok(key == literal.trim_matches('\'')),
            None => Err(EvaluationError(format!(
                "cannot parse expression: {}",
                expression
            ))),
        }
    }
}

#[test]
fn test_expression_delete_with_evaluator() {
    let store = engine();
    store.set_key_serializer(Arc::new(Utf8KeySerializer));
    store.set_expression_evaluator(Arc::new(EqualsEvaluator));

    put(&store, "foo", "v", clock(&[(1, 1)]));
    put(&store, "bar", "v", clock(&[(1, 1)]));

    assert!(store
        .delete_matching(MatchType::Expression, "key == 'foo'")
        .unwrap());
    assert!(store.get(&"foo".to_string()).unwrap().is_empty());
    assert_eq!(store.get(&"bar".to_string()).unwrap().len(), 1);

    // An evaluator failure is logged and treated as a non-match
    assert!(!store
        .delete_matching(MatchType::Expression, "unparseable")
        .unwrap());
    assert_eq!(store.get(&"bar".to_string()).unwrap().len(), 1);
}

#[test]
fn test_expression_delete_without_evaluator_unsupported() {
    let store = engine();
    store.set_key_serializer(Arc::new(Utf8KeySerializer));

    let result = store.delete_matching(MatchType::Expression, "key == 'foo'");
    assert!(matches!(result, Err(StoreError::Unsupported(_))));
}

// ============================================================================
// Statistics
// ============================================================================

#[test]
fn test_sliding_window_throughput_bound() {
    let counter = RequestCounter::new(30_000, 10_000);

    // Pace samples 20ms apart so throughput stays under 50/s
    for _ in 0..10 {
        thread::sleep(Duration::from_millis(20));
        counter.record(1_000_000);
    }
    thread::sleep(Duration::from_millis(20));

    assert_eq!(counter.count(), 10);
    assert!(counter.average_latency_ms() > 0.0);

    let throughput = counter.throughput();
    assert!(throughput > 0.0);
    // 51 rather than 50 because sleep is not exact on every platform
    assert!(throughput <= 51.0, "throughput was {}", throughput);
}

#[test]
fn test_stat_tracking_store_counts_paced_operations() {
    let store = StatTrackingStore::new(engine(), None);
    let stats = store.stats();

    for i in 0..10 {
        thread::sleep(Duration::from_millis(20));
        put(&store, &format!("k{}", i), "v", clock(&[(1, 1)]));
    }
    thread::sleep(Duration::from_millis(20));

    assert_eq!(stats.count(Tracked::Put), 10);
    assert!(stats.average_latency_ms(Tracked::Put) > 0.0);
    let throughput = stats.throughput(Tracked::Put);
    assert!(throughput > 0.0);
    assert!(throughput <= 51.0, "throughput was {}", throughput);

    assert_eq!(stats.count(Tracked::Get), 0);
    assert_eq!(stats.count(Tracked::Delete), 0);
    assert_eq!(stats.count(Tracked::GetAll), 0);
    assert_eq!(stats.count(Tracked::Exception), 0);

    for i in 0..10 {
        thread::sleep(Duration::from_millis(20));
        store.get(&format!("k{}", i)).unwrap();
    }

    assert_eq!(stats.count(Tracked::Get), 10);
    assert_eq!(stats.count(Tracked::Exception), 0);
}

/// Delegate that fails every operation, for exception accounting.
struct FailingStore;

impl Store<String, String> for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    fn get(&self, _key: &String) -> StoreResult<Vec<Versioned<String>>> {
        Err(StoreError::OperationFailed("induced read failure".into()))
    }

    fn get_all(
        &self,
        _keys: &[String],
    ) -> StoreResult<HashMap<String, Vec<Versioned<String>>>> {
        Err(StoreError::OperationFailed("induced read failure".into()))
    }

    fn put(&self, _key: &String, _value: Versioned<String>) -> StoreResult<()> {
        Err(StoreError::OperationFailed("induced write failure".into()))
    }

    fn delete(&self, _key: &String, _version: Option<&VectorClock>) -> StoreResult<bool> {
        Err(StoreError::OperationFailed("induced write failure".into()))
    }

    fn delete_all(&self, _keys: &HashMap<String, Option<VectorClock>>) -> StoreResult<bool> {
        Err(StoreError::OperationFailed("induced write failure".into()))
    }

    fn delete_matching(&self, _match_type: MatchType, _expression: &str) -> StoreResult<bool> {
        Err(StoreError::OperationFailed("induced write failure".into()))
    }

    fn capability(
        &self,
        tag: veld::store::CapabilityTag,
    ) -> StoreResult<veld::store::Capability> {
        Err(StoreError::NoSuchCapability(tag))
    }
}

#[test]
fn test_stat_tracking_store_counts_exceptions() {
    let store = StatTrackingStore::new(FailingStore, None);
    let stats = store.stats();

    assert!(store.get(&"a".to_string()).is_err());
    assert!(store
        .put(
            &"a".to_string(),
            Versioned::new("x".to_string(), clock(&[(1, 1)]))
        )
        .is_err());

    assert_eq!(stats.count(Tracked::Exception), 2);
    assert_eq!(stats.count(Tracked::Get), 0);
    assert_eq!(stats.count(Tracked::Put), 0);
    assert_eq!(stats.count(Tracked::Obsolete), 0);
}

/// Delegate that delays every operation by a fixed amount.
struct SleepyStore<S> {
    delay: Duration,
    inner: S,
}

impl<K, V, C, S> Store<K, V, C> for SleepyStore<S>
where
    K: Eq + Hash,
    C: Version,
    S: Store<K, V, C>,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get(&self, key: &K) -> StoreResult<Vec<Versioned<V, C>>> {
        thread::sleep(self.delay);
        self.inner.get(key)
    }

    fn get_all(&self, keys: &[K]) -> StoreResult<HashMap<K, Vec<Versioned<V, C>>>> {
        thread::sleep(self.delay);
        self.inner.get_all(keys)
    }

    fn put(&self, key: &K, value: Versioned<V, C>) -> StoreResult<()> {
        thread::sleep(self.delay);
        self.inner.put(key, value)
    }

    fn delete(&self, key: &K, version: Option<&C>) -> StoreResult<bool> {
        thread::sleep(self.delay);
        self.inner.delete(key, version)
    }

    fn delete_all(&self, keys: &HashMap<K, Option<C>>) -> StoreResult<bool> {
        thread::sleep(self.delay);
        self.inner.delete_all(keys)
    }

    fn delete_matching(&self, match_type: MatchType, expression: &str) -> StoreResult<bool> {
        thread::sleep(self.delay);
        self.inner.delete_matching(match_type, expression)
    }

    fn capability(
        &self,
        tag: veld::store::CapabilityTag,
    ) -> StoreResult<veld::store::Capability> {
        self.inner.capability(tag)
    }
}

#[test]
fn test_stat_tracking_store_measures_slow_delegate() {
    let slow = SleepyStore {
        delay: Duration::from_millis(5),
        inner: engine(),
    };
    let store = StatTrackingStore::new(slow, None);

    put(&store, "a", "x", clock(&[(1, 1)]));
    store.get(&"a".to_string()).unwrap();

    let stats = store.stats();
    assert!(stats.average_latency_ms(Tracked::Get) >= 5.0);
    assert!(stats.average_latency_ms(Tracked::Put) >= 5.0);
}

#[test]
fn test_obsolete_counted_through_wrapper() {
    let store = StatTrackingStore::new(engine(), None);

    put(&store, "a", "x", clock(&[(1, 1)]));
    let result = store.put(
        &"a".to_string(),
        Versioned::new("y".to_string(), clock(&[(1, 0)])),
    );
    assert!(matches!(result, Err(StoreError::ObsoleteVersion { .. })));

    let stats = store.stats();
    assert_eq!(stats.count(Tracked::Obsolete), 1);
    assert_eq!(stats.count(Tracked::Exception), 1);
    assert_eq!(stats.count(Tracked::Put), 1);
}

// ============================================================================
// Eviction cache under pressure
// ============================================================================

/// A map whose heap threshold is permanently exceeded; eviction fires as
/// soon as the 500ms probe interval allows.
fn pressured_map(policy: EvictionPolicy) -> EvictionMap<String, String> {
    let config = CacheConfig {
        name: "pressured".to_string(),
        policy,
        heap_percentage: 0,
    };
    EvictionMap::new(config, Arc::new(StaticHeapSampler::new(1 << 30, 1 << 20)))
}

#[test]
fn test_fifo_eviction_keeps_most_recent_suffix() {
    let map = pressured_map(EvictionPolicy::Fifo);

    for i in 0..100 {
        let _ = map.put_if_absent(format!("k{}", i), format!("v{}", i));
    }
    assert_eq!(map.len(), 100);

    // Let the probe interval pass, then trigger the evictor
    thread::sleep(Duration::from_millis(600));
    let _ = map.put_if_absent("k100".to_string(), "v100".to_string());

    assert!(map.len() <= 90, "len was {}", map.len());

    // Survivors are the most recently inserted keys
    assert!(!map.contains_key(&"k0".to_string()));
    assert!(!map.contains_key(&"k5".to_string()));
    for i in 95..=100 {
        assert!(map.contains_key(&format!("k{}", i)), "k{} missing", i);
    }
}

#[test]
fn test_second_chance_retains_accessed_entry() {
    let map = pressured_map(EvictionPolicy::SecondChance);

    for i in 0..10 {
        let _ = map.put_if_absent(format!("k{}", i), format!("v{}", i));
    }

    // Reading k0 marks it, buying it one reprieve
    assert!(map.get(&"k0".to_string()).is_some());

    thread::sleep(Duration::from_millis(600));
    let _ = map.put_if_absent("k10".to_string(), "v10".to_string());

    assert!(map.contains_key(&"k0".to_string()));
    assert!(!map.contains_key(&"k1".to_string()));
}

#[test]
fn test_eviction_never_fires_below_threshold() {
    let config = CacheConfig {
        name: "calm".to_string(),
        policy: EvictionPolicy::Lru,
        heap_percentage: 90,
    };
    // 10% used, threshold 90%: never overflowing
    let map: EvictionMap<String, String> =
        EvictionMap::new(config, Arc::new(StaticHeapSampler::new(1000, 100)));

    for i in 0..50 {
        let _ = map.put_if_absent(format!("k{}", i), "v".to_string());
    }
    thread::sleep(Duration::from_millis(600));
    let _ = map.get(&"k0".to_string());

    assert_eq!(map.len(), 50);
}
