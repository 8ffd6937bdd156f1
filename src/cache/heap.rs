//! Heap occupancy sampling for eviction decisions.
//!
//! The eviction map does not cap entries at a fixed count; it watches how
//! much of a configured heap budget the process is using and evicts when a
//! percentage threshold is crossed. The probe is a trait so platforms
//! without process-memory introspection can substitute their own reading.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sysinfo::{Pid, System};

/// A `(max, free)` heap reading; used space is `max - free`.
pub trait HeapSampler: Send + Sync {
    /// Maximum heap available to the process, in bytes.
    fn max_bytes(&self) -> u64;

    /// Free headroom below the maximum, in bytes.
    fn free_bytes(&self) -> u64;

    /// Bytes currently in use.
    fn used_bytes(&self) -> u64 {
        self.max_bytes().saturating_sub(self.free_bytes())
    }
}

/// Samples the process resident set against a configured maximum.
pub struct SystemHeapSampler {
    max_bytes: u64,
    pid: Pid,
    system: Mutex<System>,
}

impl SystemHeapSampler {
    /// Creates a sampler treating `max_bytes` as the process heap budget.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            pid: Pid::from(std::process::id() as usize),
            system: Mutex::new(System::new()),
        }
    }
}

impl HeapSampler for SystemHeapSampler {
    fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn free_bytes(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_process(self.pid);
        let used = system
            .process(self.pid)
            .map(|process| process.memory())
            .unwrap_or(0);
        self.max_bytes.saturating_sub(used)
    }
}

/// A sampler with fixed maximum and settable usage.
///
/// Serves platforms without memory introspection and drives eviction
/// deterministically in tests.
pub struct StaticHeapSampler {
    max_bytes: u64,
    used_bytes: AtomicU64,
}

impl StaticHeapSampler {
    pub fn new(max_bytes: u64, used_bytes: u64) -> Self {
        Self {
            max_bytes,
            used_bytes: AtomicU64::new(used_bytes),
        }
    }

    /// Updates the reported usage.
    pub fn set_used_bytes(&self, used_bytes: u64) {
        self.used_bytes.store(used_bytes, Ordering::Relaxed);
    }
}

impl HeapSampler for StaticHeapSampler {
    fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn free_bytes(&self) -> u64 {
        self.max_bytes
            .saturating_sub(self.used_bytes.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_sampler_reading() {
        let sampler = StaticHeapSampler::new(1000, 400);

        assert_eq!(sampler.max_bytes(), 1000);
        assert_eq!(sampler.free_bytes(), 600);
        assert_eq!(sampler.used_bytes(), 400);

        sampler.set_used_bytes(1200);
        assert_eq!(sampler.free_bytes(), 0);
        assert_eq!(sampler.used_bytes(), 1000);
    }

    #[test]
    fn test_system_sampler_reports_usage() {
        let sampler = SystemHeapSampler::new(u64::MAX);

        // A running process occupies some memory, so headroom shrinks
        assert!(sampler.used_bytes() > 0);
        assert!(sampler.free_bytes() < u64::MAX);
    }
}
