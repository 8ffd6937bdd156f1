//! Request statistics: per-operation sliding-window counters.
//!
//! Each store keeps one [`RequestCounter`] per tracked operation kind and
//! exposes count, throughput, and mean latency over a configurable window.
//! A registry may forward every sample to a parent registry, letting one
//! aggregate view span many stores without cross-kind locking.

pub mod counter;

pub use counter::RequestCounter;

use std::fmt;
use std::sync::Arc;

/// Operation kinds tracked per store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tracked {
    Get,
    GetAll,
    Put,
    Delete,
    DeleteAll,
    Exception,
    Obsolete,
}

impl Tracked {
    /// All kinds, in registry slot order.
    pub const ALL: [Tracked; 7] = [
        Tracked::Get,
        Tracked::GetAll,
        Tracked::Put,
        Tracked::Delete,
        Tracked::DeleteAll,
        Tracked::Exception,
        Tracked::Obsolete,
    ];

    fn slot(self) -> usize {
        match self {
            Tracked::Get => 0,
            Tracked::GetAll => 1,
            Tracked::Put => 2,
            Tracked::Delete => 3,
            Tracked::DeleteAll => 4,
            Tracked::Exception => 5,
            Tracked::Obsolete => 6,
        }
    }
}

impl fmt::Display for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tracked::Get => "get",
            Tracked::GetAll => "getAll",
            Tracked::Put => "put",
            Tracked::Delete => "delete",
            Tracked::DeleteAll => "deleteall",
            Tracked::Exception => "exception",
            Tracked::Obsolete => "obsolete",
        };
        write!(f, "{}", name)
    }
}

/// Configuration for the per-operation counters.
#[derive(Clone, Debug)]
pub struct StatsConfig {
    /// Sliding window duration in milliseconds.
    pub window_ms: u64,

    /// Maximum samples retained per operation kind.
    pub max_ops_tracked: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            window_ms: 30_000,
            max_ops_tracked: 10_000,
        }
    }
}

/// Per-operation statistics registry with optional parent aggregation.
pub struct StoreStats {
    /// Optional parent receiving every sample recorded here
    parent: Option<Arc<StoreStats>>,

    /// One counter per `Tracked` kind, indexed by slot
    counters: Vec<RequestCounter>,
}

impl StoreStats {
    /// Creates a standalone registry with the default window.
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    /// Creates a registry forwarding every sample to `parent`.
    pub fn with_parent(parent: Option<Arc<StoreStats>>) -> Self {
        Self::with_config(StatsConfig::default(), parent)
    }

    /// Creates a registry with explicit window settings.
    pub fn with_config(config: StatsConfig, parent: Option<Arc<StoreStats>>) -> Self {
        let counters = Tracked::ALL
            .iter()
            .map(|_| RequestCounter::new(config.window_ms, config.max_ops_tracked))
            .collect();
        Self { parent, counters }
    }

    /// Records one operation of `duration_ns` under `op`, forwarding to the
    /// parent registry when one is configured.
    pub fn record_time(&self, op: Tracked, duration_ns: u64) {
        self.counters[op.slot()].record(duration_ns);
        if let Some(parent) = &self.parent {
            parent.record_time(op, duration_ns);
        }
    }

    /// Samples of `op` inside the current window.
    pub fn count(&self, op: Tracked) -> u64 {
        self.counters[op.slot()].count()
    }

    /// Samples of `op` recorded since creation.
    pub fn total_count(&self, op: Tracked) -> u64 {
        self.counters[op.slot()].total_count()
    }

    /// Throughput of `op` in samples per second.
    pub fn throughput(&self, op: Tracked) -> f64 {
        self.counters[op.slot()].throughput()
    }

    /// Mean latency of `op` over the window, in milliseconds.
    pub fn average_latency_ms(&self, op: Tracked) -> f64 {
        self.counters[op.slot()].average_latency_ms()
    }

    /// Direct access to the counter backing `op`.
    pub fn counter(&self, op: Tracked) -> &RequestCounter {
        &self.counters[op.slot()]
    }
}

impl Default for StoreStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_isolated() {
        let stats = StoreStats::new();

        stats.record_time(Tracked::Put, 1_000_000);
        stats.record_time(Tracked::Put, 1_000_000);
        stats.record_time(Tracked::Get, 1_000_000);

        assert_eq!(stats.count(Tracked::Put), 2);
        assert_eq!(stats.count(Tracked::Get), 1);
        assert_eq!(stats.count(Tracked::Delete), 0);
        assert_eq!(stats.count(Tracked::Exception), 0);
    }

    #[test]
    fn test_parent_receives_samples() {
        let parent = Arc::new(StoreStats::new());
        let child_a = StoreStats::with_parent(Some(Arc::clone(&parent)));
        let child_b = StoreStats::with_parent(Some(Arc::clone(&parent)));

        child_a.record_time(Tracked::Get, 1_000);
        child_b.record_time(Tracked::Get, 1_000);
        child_b.record_time(Tracked::Delete, 1_000);

        assert_eq!(child_a.count(Tracked::Get), 1);
        assert_eq!(child_b.count(Tracked::Get), 1);
        assert_eq!(parent.count(Tracked::Get), 2);
        assert_eq!(parent.count(Tracked::Delete), 1);
    }

    #[test]
    fn test_canonical_names() {
        let names: Vec<String> = Tracked::ALL.iter().map(|op| op.to_string()).collect();
        assert_eq!(
            names,
            vec!["get", "getAll", "put", "delete", "deleteall", "exception", "obsolete"]
        );
    }
}
