//! Store trait surface, the versioned in-memory engine, and its wrappers.
//!
//! A store maps byte-addressable keys to lists of causally concurrent
//! versioned values. The trait surface is deliberately small — the seven
//! engine operations plus a tagged capability lookup — so wrappers compose
//! by plain delegation:
//!
//! - [`MemoryStore`]: the versioned engine itself
//! - [`StatTrackingStore`]: times every call into a [`crate::stats::StoreStats`]
//! - [`LoggingStore`]: logs operation, elapsed time, and outcome

pub mod logging;
pub mod memory;
pub mod stat_tracking;

pub use logging::LoggingStore;
pub use memory::MemoryStore;
pub use stat_tracking::StatTrackingStore;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use thiserror::Error;

use crate::versioning::{Version, Versioned};

/// Store errors surfaced to callers.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid key: keys must be non-empty")]
    InvalidKey,

    #[error("obsolete version for key '{key}': {version}")]
    ObsoleteVersion { key: String, version: String },

    #[error("no such capability: {0}")]
    NoSuchCapability(CapabilityTag),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("operation failed: {0}")]
    OperationFailed(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Predicate kinds for expression-based bulk deletion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchType {
    /// Raw key bytes start with the serialized expression bytes.
    StartsWith,
    /// The key's string form contains the expression as a substring.
    Contains,
    /// The key's string form ends with the expression.
    EndsWith,
    /// The key's string form matches the expression as a regular expression.
    Regex,
    /// The expression is evaluated by a registered expression engine with
    /// the key's string form bound as the `key` variable.
    Expression,
}

/// Tags for the capability lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapabilityTag {
    KeySerializer,
    ValueSerializer,
}

impl fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CapabilityTag::KeySerializer => "key-serializer",
            CapabilityTag::ValueSerializer => "value-serializer",
        };
        write!(f, "{}", name)
    }
}

/// A capability answered by a store.
#[derive(Clone)]
pub enum Capability {
    KeySerializer(Arc<dyn KeySerializer>),
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::KeySerializer(_) => write!(f, "Capability::KeySerializer"),
        }
    }
}

/// Translates between expression text and raw key bytes.
///
/// Consumed only by expression-based deletion; a store without a registered
/// serializer rejects those deletes as unsupported.
pub trait KeySerializer: Send + Sync {
    /// Serializes expression text into raw key bytes.
    fn to_bytes(&self, text: &str) -> Vec<u8>;

    /// Renders raw key bytes into their string form.
    fn to_string_form(&self, raw: &[u8]) -> StoreResult<String>;
}

/// Serializer for keys that are UTF-8 text.
pub struct Utf8KeySerializer;

impl KeySerializer for Utf8KeySerializer {
    fn to_bytes(&self, text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }

    fn to_string_form(&self, raw: &[u8]) -> StoreResult<String> {
        String::from_utf8(raw.to_vec())
            .map_err(|err| StoreError::OperationFailed(format!("key is not valid UTF-8: {}", err)))
    }
}

/// Failure inside an external expression engine.
///
/// Never crosses the store boundary: evaluation failures are logged and the
/// predicate is treated as false for that key.
#[derive(Error, Debug)]
#[error("expression evaluation failed: {0}")]
pub struct EvaluationError(pub String);

/// An embeddable predicate engine for [`MatchType::Expression`] deletes.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluates `expression` with the key's string form bound as the
    /// `key` variable, returning whether the key is selected.
    fn evaluate(&self, expression: &str, key: &str) -> Result<bool, EvaluationError>;
}

/// A forward-only iterator that must be released explicitly.
///
/// `close` frees whatever the iterator still holds; a closed iterator
/// yields nothing further. Removal through an iterator is not supported.
pub trait ClosableIterator: Iterator {
    /// Releases any resources held by the iterator.
    fn close(&mut self);
}

/// The capability set every store exposes.
///
/// Wrappers implement this by delegation; only [`MemoryStore`] carries
/// state of its own.
pub trait Store<K, V, C = crate::versioning::VectorClock>: Send + Sync
where
    K: Eq + Hash,
    C: Version,
{
    /// The store's name, used for logging and aggregation.
    fn name(&self) -> &str;

    /// Returns a snapshot of every version currently held for `key`.
    /// The list is empty when the key is absent, never missing.
    fn get(&self, key: &K) -> StoreResult<Vec<Versioned<V, C>>>;

    /// Fetches versions for many keys; keys without versions are omitted.
    fn get_all(&self, keys: &[K]) -> StoreResult<HashMap<K, Vec<Versioned<V, C>>>>;

    /// Stores a versioned value, superseding every version it dominates.
    /// Fails with [`StoreError::ObsoleteVersion`] when an existing version
    /// dominates the new one.
    fn put(&self, key: &K, value: Versioned<V, C>) -> StoreResult<()>;

    /// Deletes versions of `key` strictly dominated by `version`, or the
    /// whole key when `version` is `None`. Returns whether anything was
    /// removed.
    fn delete(&self, key: &K, version: Option<&C>) -> StoreResult<bool>;

    /// Applies [`Store::delete`] semantics across many keys. Returns
    /// whether anything was removed.
    fn delete_all(&self, keys: &HashMap<K, Option<C>>) -> StoreResult<bool>;

    /// Deletes every key matched by `expression` under `match_type`.
    /// Returns whether any key matched.
    fn delete_matching(&self, match_type: MatchType, expression: &str) -> StoreResult<bool>;

    /// Tagged capability lookup; tags the store does not implement fail
    /// with [`StoreError::NoSuchCapability`].
    fn capability(&self, tag: CapabilityTag) -> StoreResult<Capability>;
}

/// A store that can additionally enumerate its contents.
pub trait StorageEngine<K, V, C = crate::versioning::VectorClock>: Store<K, V, C>
where
    K: Eq + Hash,
    C: Version,
{
    /// Iterates every (key, versioned value) pair. Keys observed are a
    /// snapshot taken when the iterator is created; each key's versions are
    /// snapshotted when the iterator reaches it.
    fn entries(&self) -> Box<dyn ClosableIterator<Item = (K, Versioned<V, C>)> + '_>;

    /// Iterates a snapshot of the store's keys.
    fn keys(&self) -> Box<dyn ClosableIterator<Item = K> + '_>;

    /// Removes every key and version.
    fn truncate(&self);
}
