//! Per-pool memory statistics.
//!
//! Every pool owns one [`MemoryStats`] instance — counters are never global.
//! All fields are atomic so the lock-free pool can record through a shared
//! reference; the single-threaded pools use the same type for uniformity.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Atomic allocation counters owned by a single pool.
#[derive(Debug, Default)]
pub struct MemoryStats {
    total_allocated: AtomicUsize,
    total_freed: AtomicUsize,
    current_usage: AtomicUsize,
    peak_usage: AtomicUsize,
    allocation_count: AtomicUsize,
    deallocation_count: AtomicUsize,
}

/// Point-in-time copy of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Cumulative bytes handed out since construction (or last reset)
    pub total_allocated: usize,
    /// Cumulative bytes returned since construction (or last reset)
    pub total_freed: usize,
    /// Bytes currently outstanding
    pub current_usage: usize,
    /// High-water mark of `current_usage`
    pub peak_usage: usize,
    /// Number of successful allocations
    pub allocation_count: usize,
    /// Number of deallocations
    pub deallocation_count: usize,
}

impl MemoryStats {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful allocation of `size` bytes.
    pub fn record_allocation(&self, size: usize) {
        self.total_allocated.fetch_add(size, Ordering::Relaxed);
        let current = self.current_usage.fetch_add(size, Ordering::Relaxed) + size;
        self.allocation_count.fetch_add(1, Ordering::Relaxed);

        // Running max via CAS retry
        let mut peak = self.peak_usage.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_usage.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => peak = observed,
            }
        }
    }

    /// Record a deallocation of `size` bytes.
    pub fn record_deallocation(&self, size: usize) {
        self.total_freed.fetch_add(size, Ordering::Relaxed);
        self.current_usage.fetch_sub(size, Ordering::Relaxed);
        self.deallocation_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Bytes currently outstanding.
    #[must_use]
    pub fn current_usage(&self) -> usize {
        self.current_usage.load(Ordering::Relaxed)
    }

    /// Bytes allocated but never freed. Non-zero at pool teardown means a leak.
    #[must_use]
    pub fn leaked_bytes(&self) -> usize {
        self.total_allocated
            .load(Ordering::Relaxed)
            .saturating_sub(self.total_freed.load(Ordering::Relaxed))
    }

    /// Zero all counters. Explicit only — never called by the pools themselves.
    pub fn reset(&self) {
        self.total_allocated.store(0, Ordering::Relaxed);
        self.total_freed.store(0, Ordering::Relaxed);
        self.current_usage.store(0, Ordering::Relaxed);
        self.peak_usage.store(0, Ordering::Relaxed);
        self.allocation_count.store(0, Ordering::Relaxed);
        self.deallocation_count.store(0, Ordering::Relaxed);
    }

    /// Copy the counters out for display or assertions.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_allocated: self.total_allocated.load(Ordering::Relaxed),
            total_freed: self.total_freed.load(Ordering::Relaxed),
            current_usage: self.current_usage.load(Ordering::Relaxed),
            peak_usage: self.peak_usage.load(Ordering::Relaxed),
            allocation_count: self.allocation_count.load(Ordering::Relaxed),
            deallocation_count: self.deallocation_count.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "allocated {} bytes ({} ops), freed {} bytes ({} ops), current {}, peak {}",
            self.total_allocated,
            self.allocation_count,
            self.total_freed,
            self.deallocation_count,
            self.current_usage,
            self.peak_usage,
        )
    }
}
