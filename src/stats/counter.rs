//! Sliding-window request counter.
//!
//! The counter keeps the last `max_ops_tracked` samples in a ring of two
//! parallel atomic arrays: arrival timestamp and operation duration, both in
//! nanoseconds on the counter's own monotonic timeline. A sample is inside
//! the window iff it arrived within the last `window_ms` milliseconds.
//!
//! Writers never block readers and readers never block writers. Two writers
//! landing on the same slot overwrite each other; one of the two samples is
//! lost from the window but both still count toward the running total. The
//! index is bumped before the slot is filled, so a reader can observe a
//! fresh arrival paired with a stale duration; negative durations are
//! therefore treated as absent.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

const NS_PER_MS: i64 = 1_000_000;

/// A thread-safe request counter that reports count, throughput, and mean
/// latency over a sliding window of wall time.
pub struct RequestCounter {
    /// Window duration in milliseconds
    window_ms: u64,

    /// Samples recorded since creation, monotonically non-decreasing
    total: AtomicU64,

    /// Slot selector, incremented per sample
    index: AtomicU32,

    /// Arrival timestamps in nanos since `origin`, -1 when unused
    arrivals: Box<[AtomicI64]>,

    /// Operation durations in nanos, -1 when unused
    durations: Box<[AtomicI64]>,

    /// Anchor for the counter's monotonic timeline
    origin: Instant,
}

impl RequestCounter {
    /// Creates a counter tracking up to `max_ops_tracked` samples over a
    /// `window_ms` sliding window.
    pub fn new(window_ms: u64, max_ops_tracked: usize) -> Self {
        let slots = max_ops_tracked.max(1);
        Self {
            window_ms,
            total: AtomicU64::new(0),
            index: AtomicU32::new(0),
            arrivals: (0..slots).map(|_| AtomicI64::new(-1)).collect(),
            durations: (0..slots).map(|_| AtomicI64::new(-1)).collect(),
            origin: Instant::now(),
        }
    }

    fn now_ns(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }

    fn window_ns(&self) -> i64 {
        self.window_ms as i64 * NS_PER_MS
    }

    fn in_window(&self, arrival: i64, now: i64) -> bool {
        arrival >= 0 && now - arrival <= self.window_ns()
    }

    /// Records one operation of `duration_ns` nanoseconds.
    pub fn record(&self, duration_ns: u64) {
        let idx = self.index.fetch_add(1, Ordering::Relaxed).wrapping_add(1) as usize
            % self.arrivals.len();

        // Arrival first; readers treat a negative duration as absent
        self.arrivals[idx].store(self.now_ns(), Ordering::Relaxed);
        self.durations[idx].store(duration_ns as i64, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of samples inside the current window.
    pub fn count(&self) -> u64 {
        let now = self.now_ns();
        self.arrivals
            .iter()
            .filter(|arrival| self.in_window(arrival.load(Ordering::Relaxed), now))
            .count() as u64
    }

    /// Samples recorded since the counter was created.
    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn total_time_in_window_ns(&self) -> i64 {
        let now = self.now_ns();
        let mut total = 0;
        for (arrival, duration) in self.arrivals.iter().zip(self.durations.iter()) {
            if self.in_window(arrival.load(Ordering::Relaxed), now) {
                let duration_ns = duration.load(Ordering::Relaxed);
                if duration_ns >= 0 {
                    total += duration_ns;
                }
            }
        }
        total
    }

    /// Mean latency over the window in milliseconds, zero when the window
    /// holds no samples.
    pub fn average_latency_ms(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.total_time_in_window_ns() as f64 / count as f64 / NS_PER_MS as f64
    }

    /// Effective start of the window, in milliseconds on the counter's
    /// monotonic timeline.
    ///
    /// Capped at `window_ms` ago, but no earlier than the oldest retained
    /// sample while the ring has not yet covered a full window.
    pub fn approximate_start_ms(&self) -> i64 {
        let now = self.now_ns();
        let mut oldest_age_ms = 0;

        for arrival in self.arrivals.iter() {
            let arrival = arrival.load(Ordering::Relaxed);
            if arrival < 0 {
                continue;
            }
            let age_ms = (now - arrival) / NS_PER_MS;
            if age_ms > oldest_age_ms {
                oldest_age_ms = age_ms;
            }
        }

        let now_ms = now / NS_PER_MS;
        if oldest_age_ms == 0 {
            now_ms - self.window_ms as i64
        } else {
            now_ms - oldest_age_ms.min(self.window_ms as i64)
        }
    }

    /// Samples per second over the effective window, -1.0 when no time has
    /// elapsed yet.
    pub fn throughput(&self) -> f64 {
        let now_ms = self.now_ns() / NS_PER_MS;
        let elapsed_secs = (now_ms - self.approximate_start_ms()) as f64 / 1000.0;
        if elapsed_secs > 0.0 {
            self.count() as f64 / elapsed_secs
        } else {
            -1.0
        }
    }
}
